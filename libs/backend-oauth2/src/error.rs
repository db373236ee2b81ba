use backend_http::HttpError;
use thiserror::Error;

/// Context prefix for every token acquisition message.
const PREFIX: &str = "OAuth2 token";

/// Errors returned while acquiring a client-credentials token.
///
/// `Clone` so the outcome of one refresh can be handed to every caller that
/// waited on it. Messages never contain the client secret, the access token
/// or the token endpoint's response body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The token endpoint could not be reached, or did not answer in time.
    #[error("{0}")]
    Network(String),

    /// The token endpoint answered with a non-2xx status or an unusable body.
    #[error("{0}")]
    Protocol(String),

    /// The caller stopped waiting for a token.
    #[error("OAuth2 token wait cancelled")]
    Cancelled,
}

impl TokenError {
    /// `true` for failures caused by reaching the token endpoint.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// `true` for failures caused by what the token endpoint sent back.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Classify an HTTP client error raised during a token exchange.
    ///
    /// `HttpStatus` keeps only the status code.
    #[must_use]
    pub fn from_http(e: &HttpError) -> Self {
        match e {
            HttpError::Transport(err) => Self::Network(format!("{PREFIX} transport error: {err}")),
            HttpError::Timeout(after) => {
                Self::Network(format!(
                    "{PREFIX} request timed out after {}ms",
                    after.as_millis()
                ))
            }
            HttpError::Tls(err) => Self::Network(format!("{PREFIX} TLS error: {err}")),
            HttpError::ServiceClosed => Self::Network(format!("{PREFIX} service unavailable")),
            HttpError::Cancelled => Self::Cancelled,
            HttpError::HttpStatus { status, .. } => Self::Protocol(format!("{PREFIX} HTTP {status}")),
            HttpError::Json(err) => Self::Protocol(format!("{PREFIX} JSON parse failed: {err}")),
            HttpError::BodyTooLarge { limit, actual } => Self::Protocol(format!(
                "{PREFIX} response too large: limit {limit} bytes, got {actual} bytes"
            )),
            HttpError::InvalidUri { url, reason, .. } => {
                Self::Protocol(format!("{PREFIX} invalid URL '{url}': {reason}"))
            }
            HttpError::InvalidScheme { scheme, reason } => {
                Self::Protocol(format!("{PREFIX} invalid scheme '{scheme}': {reason}"))
            }
            HttpError::FormEncode(err) => {
                Self::Protocol(format!("{PREFIX} form encode error: {err}"))
            }
            // Header and build errors may echo credential material.
            _ => Self::Protocol(format!("{PREFIX} request failed")),
        }
    }

    pub(crate) fn invalid_response(reason: &str) -> Self {
        Self::Protocol(format!("{PREFIX} invalid response: {reason}"))
    }
}
