use std::time::Duration;
use thiserror::Error;

/// Why a URL was rejected before anything was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    ParseError,
    /// No host, e.g. a relative path
    MissingAuthority,
    MissingScheme,
}

/// Failure of a backend request
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// The backend exchange exceeded `request_timeout`
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Connect, I/O or protocol failure below HTTP
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The auth layer could not obtain credentials; nothing reached the
    /// backend.
    ///
    /// The source is the layer's own error type; recover it with
    /// `downcast_ref`.
    #[error("Authentication failed: {0}")]
    Auth(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The request's cancellation token fired
    #[error("Request cancelled")]
    Cancelled,

    /// Counted after decompression
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Non-2xx status, raised by the checked readers and `error_for_status`
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        /// At most `ERROR_BODY_PREVIEW_LIMIT` bytes, lossy UTF-8
        body_preview: String,
        content_type: Option<String>,
    },

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// The dispatch worker is gone (runtime shutting down)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// `reason` is for logs; match on `kind`
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// `http://` under `TlsOnly`, or a scheme other than http(s)
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = HttpError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().expect("transport error should have a source");
        let downcast = source.downcast_ref::<TestError>().unwrap();
        assert_eq!(downcast.0, "connection refused");
    }

    #[test]
    fn test_auth_error_preserves_source() {
        let err = HttpError::Auth(Box::new(TestError("token endpoint unreachable")));

        assert_eq!(
            err.to_string(),
            "Authentication failed: token endpoint unreachable"
        );
        let source = err.source().expect("auth error should have a source");
        assert!(source.downcast_ref::<TestError>().is_some());
    }

    #[test]
    fn test_cancelled_renders() {
        assert_eq!(HttpError::Cancelled.to_string(), "Request cancelled");
    }
}
