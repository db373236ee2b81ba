use async_trait::async_trait;
use backend_http::{HttpClient, HttpClientBuilder, HttpClientConfig, HttpError};
use base64::{Engine as _, engine::general_purpose};
use http::header::AUTHORIZATION;
use tokio::time::Instant;
use url::Url;
use zeroize::Zeroizing;

use crate::config::Settings;
use crate::error::TokenError;
use crate::token::AccessToken;
use crate::types::{ClientAuthMethod, SecretString, TokenResponse};

/// One token exchange against an authorization server.
///
/// Implementations perform exactly one round trip per call and never retry.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TokenError::Network`] when the endpoint cannot be reached
    /// and [`TokenError::Protocol`] when its answer is unusable.
    async fn fetch(&self) -> Result<AccessToken, TokenError>;
}

/// Client-credentials grant (RFC 6749 section 4.4) over [`HttpClient`].
pub struct ClientCredentialsFetcher {
    client: HttpClient,
    token_url: Url,
    client_id: String,
    client_secret: SecretString,
    auth_method: ClientAuthMethod,
    /// Non-credential form fields, sorted by key.
    params: Vec<(String, String)>,
}

impl ClientCredentialsFetcher {
    /// Fetcher bound to `settings`, sending through `client`.
    #[must_use]
    pub fn new(settings: &Settings, client: HttpClient) -> Self {
        let mut params: Vec<(String, String)> = Vec::new();
        if !settings.extra_params.contains_key("grant_type") {
            params.push(("grant_type".to_owned(), "client_credentials".to_owned()));
        }
        if !settings.scopes.is_empty() {
            params.push(("scope".to_owned(), settings.scopes.join(" ")));
        }
        for (key, values) in &settings.extra_params {
            if key == "scope" && !settings.scopes.is_empty() {
                continue;
            }
            params.extend(values.iter().map(|v| (key.clone(), v.clone())));
        }
        params.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            client,
            token_url: settings.token_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            auth_method: settings.auth_method,
            params,
        }
    }

    /// Fetcher with its own HTTP client built from the token endpoint preset.
    ///
    /// Transport security, TLS roots, timeout and user agent are inherited
    /// from `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(settings: &Settings, base: &HttpClientConfig) -> Result<Self, HttpError> {
        let client =
            HttpClientBuilder::with_config(HttpClientConfig::token_endpoint(base)).build()?;
        Ok(Self::new(settings, client))
    }

    fn form_fields(&self) -> Vec<(&str, &str)> {
        let mut fields: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if self.auth_method == ClientAuthMethod::Form {
            fields.push(("client_id", &self.client_id));
            if !self.client_secret.is_empty() {
                fields.push(("client_secret", self.client_secret.expose()));
            }
            fields.sort_by(|a, b| a.0.cmp(b.0));
        }
        fields
    }
}

#[async_trait]
impl TokenFetcher for ClientCredentialsFetcher {
    async fn fetch(&self) -> Result<AccessToken, TokenError> {
        let mut builder = self.client.post(self.token_url.as_str());

        if self.auth_method == ClientAuthMethod::Basic {
            let credentials = Zeroizing::new(format!(
                "{}:{}",
                self.client_id,
                self.client_secret.expose()
            ));
            let encoded = Zeroizing::new(general_purpose::STANDARD.encode(credentials.as_bytes()));
            let header_value = Zeroizing::new(format!("Basic {}", &*encoded));
            builder = builder.sensitive_header(AUTHORIZATION.as_str(), &header_value);
        }

        let response: TokenResponse = builder
            .form(self.form_fields().as_slice())
            .map_err(|e| TokenError::from_http(&e))?
            .send()
            .await
            .map_err(|e| TokenError::from_http(&e))?
            .json()
            .await
            .map_err(|e| TokenError::from_http(&e))?;

        if response.access_token.is_empty() {
            return Err(TokenError::invalid_response("empty access_token"));
        }

        let token = AccessToken::from_response(response, Instant::now());
        // A token that cannot become a header must not reach the cache.
        token.header_value().map_err(|_| {
            TokenError::invalid_response("access_token is not a valid header value")
        })?;
        tracing::debug!(
            token_url = %self.token_url,
            token_type = token.token_type(),
            expires = token.expires_at().is_some(),
            "fetched OAuth2 token"
        );
        Ok(token)
    }
}
