use std::fmt;
use std::time::Duration;

use http::HeaderValue;
use http::header::InvalidHeaderValue;
use tokio::time::Instant;
use zeroize::Zeroizing;

use crate::types::{SecretString, TokenResponse};

/// Token type used when the endpoint omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// An access token and its expiry.
///
/// Replaced as a whole on refresh, never mutated. `Debug` redacts the
/// token value.
#[derive(Clone)]
pub struct AccessToken {
    value: SecretString,
    token_type: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// `expires_at = None` means the token never expires.
    #[must_use]
    pub fn new(value: SecretString, token_type: impl Into<String>, expires_at: Option<Instant>) -> Self {
        Self {
            value,
            token_type: token_type.into(),
            expires_at,
        }
    }

    pub(crate) fn from_response(resp: TokenResponse, received_at: Instant) -> Self {
        let expires_at = resp
            .expires_in
            .and_then(|secs| received_at.checked_add(Duration::from_secs(secs)));
        let token_type = resp
            .token_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_owned());
        Self::new(SecretString::new(resp.access_token), token_type, expires_at)
    }

    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.value
    }

    /// Token type exactly as issued (e.g. `bearer`).
    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// `true` while `now` is more than `skew` before the expiry.
    #[must_use]
    pub fn is_fresh(&self, now: Instant, skew: Duration) -> bool {
        match self.expires_at {
            None => true,
            Some(at) => now.checked_add(skew).is_some_and(|deadline| deadline < at),
        }
    }

    /// `"<token_type> <access_token>"`, marked sensitive.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeaderValue` when the issued token contains bytes that
    /// are not allowed in a header.
    pub fn header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let raw = Zeroizing::new(format!("{} {}", self.token_type, self.value.expose()));
        let mut value = HeaderValue::from_str(&raw)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &self.value)
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
