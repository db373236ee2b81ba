use std::fmt;
use std::sync::Arc;

use backend_http::{HttpClient, HttpClientBuilder, HttpClientConfig, HttpError};

use crate::builder_ext::HttpClientBuilderExt;
use crate::config::{ExtraConfig, Settings};
use crate::fetcher::{ClientCredentialsFetcher, TokenFetcher};
use crate::provider::{CachingTokenProvider, ProviderOptions};

/// One HTTP client per backend, with `OAuth2` token injection when configured.
///
/// The client and its token cache are built once here and shared by every
/// request issued through [`ClientFactory::client`].
#[derive(Clone)]
pub struct ClientFactory {
    client: HttpClient,
    provider: Option<CachingTokenProvider>,
}

impl ClientFactory {
    /// Missing or disabled settings give the plain client built from `config`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built (TLS initialization).
    pub fn new(settings: Option<&Settings>, config: HttpClientConfig) -> Result<Self, HttpError> {
        let Some(settings) = settings.filter(|s| s.enabled) else {
            tracing::debug!("OAuth2 client credentials not configured; using plain client");
            return Ok(Self {
                client: HttpClientBuilder::with_config(config).build()?,
                provider: None,
            });
        };

        let fetcher: Arc<dyn TokenFetcher> =
            Arc::new(ClientCredentialsFetcher::from_settings(settings, &config)?);
        let provider = CachingTokenProvider::new(fetcher, ProviderOptions::from(settings));
        let client = HttpClientBuilder::with_config(config)
            .with_token_injection(provider.clone(), settings.header_name.clone())
            .build()?;

        tracing::debug!(
            client_id = %settings.client_id,
            token_url = %settings.token_url,
            header = %settings.header_name,
            "OAuth2 client credentials enabled"
        );

        Ok(Self {
            client,
            provider: Some(provider),
        })
    }

    /// Reads the namespaced block from a backend's extra config.
    ///
    /// An absent or invalid block resolves to the plain client.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_extra_config(
        extra: &ExtraConfig,
        config: HttpClientConfig,
    ) -> Result<Self, HttpError> {
        let settings = Settings::from_extra_config(extra);
        Self::new(settings.as_ref(), config)
    }

    /// A handle to the shared client.
    #[must_use]
    pub fn client(&self) -> HttpClient {
        self.client.clone()
    }

    #[must_use]
    pub fn token_provider(&self) -> Option<&CachingTokenProvider> {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.provider.is_some()
    }
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("client", &self.client)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::SecretString;
    use crate::config::NAMESPACE;
    use httpmock::prelude::*;
    use serde_json::json;
    use url::Url;

    fn settings(oauth: &MockServer) -> Settings {
        Settings::new(
            "cid",
            SecretString::new("sec"),
            Url::parse(&oauth.url("/token")).unwrap(),
        )
    }

    #[tokio::test]
    async fn no_settings_gives_plain_client() {
        let api = MockServer::start();
        let authed = api.mock(|when, then| {
            when.method(GET).path("/r").header_exists("authorization");
            then.status(200);
        });
        let plain = api.mock(|when, then| {
            when.method(GET).path("/r");
            then.status(200);
        });

        let factory = ClientFactory::new(None, HttpClientConfig::for_testing()).unwrap();
        assert!(!factory.is_authenticated());
        assert!(factory.token_provider().is_none());

        factory.client().get(&api.url("/r")).send().await.unwrap();
        assert_eq!(authed.calls(), 0);
        plain.assert();
    }

    #[tokio::test]
    async fn disabled_settings_never_hit_token_endpoint() {
        let oauth = MockServer::start();
        let token_mock = oauth.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).body(r#"{"access_token":"T"}"#);
        });
        let api = MockServer::start();
        let api_mock = api.mock(|when, then| {
            when.method(GET).path("/r").header_missing("authorization");
            then.status(200);
        });

        let s = settings(&oauth).disabled();
        let factory = ClientFactory::new(Some(&s), HttpClientConfig::for_testing()).unwrap();
        assert!(!factory.is_authenticated());

        factory.client().get(&api.url("/r")).send().await.unwrap();
        api_mock.assert();
        token_mock.assert_calls(0);
    }

    #[tokio::test]
    async fn clients_share_one_token_cache() {
        let oauth = MockServer::start();
        let token_mock = oauth.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .body(r#"{"access_token":"T","expires_in":3600,"token_type":"Bearer"}"#);
        });
        let api = MockServer::start();
        let api_mock = api.mock(|when, then| {
            when.method(GET).path("/r").header("authorization", "Bearer T");
            then.status(200);
        });

        let s = settings(&oauth);
        let factory = ClientFactory::new(Some(&s), HttpClientConfig::for_testing()).unwrap();
        assert!(factory.is_authenticated());

        factory.client().get(&api.url("/r")).send().await.unwrap();
        factory.client().get(&api.url("/r")).send().await.unwrap();

        api_mock.assert_calls(2);
        token_mock.assert_calls(1);
        assert!(factory.token_provider().unwrap().cached().is_some());
    }

    #[tokio::test]
    async fn invalid_extra_config_falls_back() {
        let mut extra = ExtraConfig::new();
        extra.insert(NAMESPACE.to_owned(), json!({"client_id": 42}));

        let factory =
            ClientFactory::from_extra_config(&extra, HttpClientConfig::for_testing()).unwrap();
        assert!(!factory.is_authenticated());
    }

    #[tokio::test]
    async fn debug_hides_secret() {
        let oauth = MockServer::start();
        let s = Settings::new(
            "cid",
            SecretString::new("factory-secret"),
            Url::parse(&oauth.url("/token")).unwrap(),
        );
        let factory = ClientFactory::new(Some(&s), HttpClientConfig::for_testing()).unwrap();

        let dbg = format!("{factory:?}");
        assert!(!dbg.contains("factory-secret"), "{dbg}");
        assert!(dbg.contains("authenticated: true"));
    }
}
