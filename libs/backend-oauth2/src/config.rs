use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use http::header::{AUTHORIZATION, HeaderName};
use serde::Deserialize;
use url::Url;

use crate::types::{ClientAuthMethod, SecretString};

/// Key of the client-credentials block inside a backend's extra config.
pub const NAMESPACE: &str = "github.com/devopsfaith/krakend-oauth2-clientcredentials";

/// Untyped per-backend configuration map handed over by the gateway.
pub type ExtraConfig = serde_json::Map<String, serde_json::Value>;

/// Default safety margin subtracted from a token's nominal expiry.
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(10);

/// Client-credentials settings for one backend.
///
/// Read-only once built. `Debug` redacts the client secret.
#[derive(Clone)]
pub struct Settings {
    /// When `false`, [`ClientFactory`](crate::ClientFactory) builds a plain client.
    pub enabled: bool,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Absolute URL of the authorization server's token endpoint.
    pub token_url: Url,
    /// Requested scopes, sent space-joined in one `scope` field.
    pub scopes: Vec<String>,
    /// Extra token request fields, e.g. `audience`. Values of one key are
    /// sent in order.
    pub extra_params: BTreeMap<String, Vec<String>>,
    /// Header that carries the token on outbound requests (default: `authorization`).
    pub header_name: HeaderName,
    pub auth_method: ClientAuthMethod,
    /// A token counts as expired this long before its nominal expiry.
    pub expiry_skew: Duration,
    /// Replay a failed refresh's error for this long before fetching again.
    /// `None` (the default) retries on the next call.
    pub failure_cooldown: Option<Duration>,
}

impl Settings {
    /// Enabled settings with defaults for everything but the credentials.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: SecretString, token_url: Url) -> Self {
        Self {
            enabled: true,
            client_id: client_id.into(),
            client_secret,
            token_url,
            scopes: Vec::new(),
            extra_params: BTreeMap::new(),
            header_name: AUTHORIZATION,
            auth_method: ClientAuthMethod::default(),
            expiry_skew: DEFAULT_EXPIRY_SKEW,
            failure_cooldown: None,
        }
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_extra_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    #[must_use]
    pub fn with_header_name(mut self, header_name: HeaderName) -> Self {
        self.header_name = header_name;
        self
    }

    #[must_use]
    pub fn with_auth_method(mut self, auth_method: ClientAuthMethod) -> Self {
        self.auth_method = auth_method;
        self
    }

    #[must_use]
    pub fn with_expiry_skew(mut self, skew: Duration) -> Self {
        self.expiry_skew = skew;
        self
    }

    #[must_use]
    pub fn with_failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.failure_cooldown = Some(cooldown);
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Read the client-credentials block from a backend's extra config.
    ///
    /// Total: returns `None` when the block is absent, disabled, or does not
    /// have the expected shape, which callers treat as "no token injection
    /// for this backend". Rejected blocks are logged at `warn`.
    #[must_use]
    pub fn from_extra_config(extra: &ExtraConfig) -> Option<Self> {
        let value = extra.get(NAMESPACE)?;
        if !value.is_object() {
            reject("block is not an object");
            return None;
        }

        let raw = match RawConfig::deserialize(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(namespace = NAMESPACE, error = %e, "ignoring OAuth2 client-credentials config");
                return None;
            }
        };

        if raw.is_disabled {
            tracing::debug!(namespace = NAMESPACE, "OAuth2 client credentials disabled");
            return None;
        }

        match raw.into_settings() {
            Ok(settings) => Some(settings),
            Err(reason) => {
                reject(reason);
                None
            }
        }
    }
}

fn reject(reason: &str) {
    tracing::warn!(namespace = NAMESPACE, reason, "ignoring OAuth2 client-credentials config");
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("enabled", &self.enabled)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url.as_str())
            .field("scopes", &self.scopes)
            .field("extra_params", &self.extra_params)
            .field("header_name", &self.header_name)
            .field("auth_method", &self.auth_method)
            .field("expiry_skew", &self.expiry_skew)
            .field("failure_cooldown", &self.failure_cooldown)
            .finish()
    }
}

/// Wire shape of the gateway block. Every key is optional.
#[derive(Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    is_disabled: bool,
    client_id: String,
    client_secret: String,
    token_url: String,
    /// Comma-separated.
    scopes: String,
    endpoint_params: BTreeMap<String, Vec<String>>,
    /// `1` and `1.0` are the same style.
    auth_style: Option<serde_json::Number>,
    auth_header_name: String,
}

/// Integral value of a JSON number written either way.
fn integral(n: &serde_json::Number) -> Option<i64> {
    n.as_i64()
        .or_else(|| n.as_f64().and_then(|f| f.to_string().parse().ok()))
}

impl RawConfig {
    fn into_settings(self) -> Result<Settings, &'static str> {
        if self.client_id.is_empty() {
            return Err("client_id is empty");
        }

        let token_url = Url::parse(&self.token_url).map_err(|_| "token_url is not an absolute URL")?;
        if !matches!(token_url.scheme(), "http" | "https") {
            return Err("token_url must use http or https");
        }

        let style = match &self.auth_style {
            Some(n) => integral(n).ok_or("auth_style is not an integer")?,
            None => 0,
        };
        let auth_method = ClientAuthMethod::from_auth_style(style).ok_or("unknown auth_style")?;

        let header_name = if self.auth_header_name.is_empty() {
            AUTHORIZATION
        } else {
            HeaderName::from_bytes(self.auth_header_name.as_bytes())
                .map_err(|_| "auth_header_name is not a valid header name")?
        };

        let scopes: Vec<String> = self
            .scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        if !scopes.is_empty() && self.endpoint_params.contains_key("scope") {
            return Err("endpoint_params cannot overwrite scope");
        }
        if auth_method == ClientAuthMethod::Form
            && (self.endpoint_params.contains_key("client_id")
                || self.endpoint_params.contains_key("client_secret"))
        {
            return Err("endpoint_params cannot overwrite client credentials");
        }

        Ok(Settings {
            enabled: true,
            client_id: self.client_id,
            client_secret: SecretString::new(self.client_secret),
            token_url,
            scopes,
            extra_params: self.endpoint_params,
            header_name,
            auth_method,
            expiry_skew: DEFAULT_EXPIRY_SKEW,
            failure_cooldown: None,
        })
    }
}
