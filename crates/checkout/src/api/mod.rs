//! Server cart API boundary.
//!
//! The engine treats the billing backend as an opaque, authoritative
//! pricing function reachable over REST. The [`CartApi`] trait is the
//! seam: production code uses the `reqwest`-backed [`HttpCartApi`],
//! tests substitute in-memory fakes.

mod http;
pub mod types;

pub use http::HttpCartApi;
pub use types::{
    CouponStatus, RequestedItem, ServerCart, ServerLine, ServerMessage, SyncRequest,
};

use thiserror::Error;

/// Errors that can occur when calling the cart API.
///
/// Everything here is a transport- or protocol-level failure; expected
/// business outcomes (rejected coupons, re-priced lines) arrive inside a
/// successful [`ServerCart`] instead.
#[derive(Debug, Error)]
pub enum CartApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be parsed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Server returned a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body for diagnostics.
        body: String,
    },

    /// Rate limited by the server.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// The request did not resolve within the configured bound.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),
}

/// Transport seam for cart synchronization.
///
/// One call carries the full desired cart and returns the authoritative
/// cart; the server never sees diffs.
pub trait CartApi: Send + Sync + 'static {
    /// Push the desired cart state and receive the authoritative cart.
    fn sync_cart(
        &self,
        request: SyncRequest,
    ) -> impl Future<Output = Result<ServerCart, CartApiError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_api_error_display() {
        let err = CartApiError::RateLimited(30);
        assert_eq!(err.to_string(), "rate limited, retry after 30 seconds");

        let err = CartApiError::Timeout(15);
        assert_eq!(err.to_string(), "request timed out after 15 seconds");

        let err = CartApiError::Status {
            status: 502,
            body: "upstream unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "server returned 502: upstream unavailable");
    }
}
