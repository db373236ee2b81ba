use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret string, zeroed on drop.
///
/// `Debug` and `Display` both print `[REDACTED]`; use
/// [`expose`](Self::expose) when building a header or form body.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read-only access to the secret. Do not log or persist the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// How the client authenticates itself to the token endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// `Authorization: Basic base64(client_id:client_secret)`
    #[default]
    Basic,
    /// `client_id` and `client_secret` as form fields.
    Form,
}

impl ClientAuthMethod {
    /// Map the gateway's integer `auth_style` key.
    ///
    /// `0` lets the client pick (Basic), `1` sends credentials in the body,
    /// `2` forces Basic. Anything else is rejected.
    #[must_use]
    pub fn from_auth_style(style: i64) -> Option<Self> {
        match style {
            0 | 2 => Some(Self::Basic),
            1 => Some(Self::Form),
            _ => None,
        }
    }
}

/// Token endpoint response.
///
/// Deserialize-only, so an access token can never be serialized back out
/// by accident. Unknown fields are ignored.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds. `None` when absent or not positive.
    #[serde(default, deserialize_with = "lifetime_seconds")]
    pub expires_in: Option<u64>,
}

/// Accepts `3600` as well as `"3600"`, which some servers send.
fn lifetime_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(serde_json::Number),
        Text(String),
    }

    let text = match Option::<Seconds>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Seconds::Number(n)) => n.to_string(),
        Some(Seconds::Text(s)) => s,
    };
    let secs: i128 = text
        .trim()
        .parse()
        .map_err(|_| D::Error::custom("expires_in is not a whole number of seconds"))?;
    Ok(u64::try_from(secs).ok().filter(|&s| s > 0))
}
