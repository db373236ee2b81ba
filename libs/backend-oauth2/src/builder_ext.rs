use http::header::HeaderName;
use tower::ServiceExt;

use crate::layer::TokenInjectionLayer;
use crate::provider::CachingTokenProvider;

/// Adds `OAuth2` token injection to [`backend_http::HttpClientBuilder`].
///
/// ```ignore
/// use backend_oauth2::HttpClientBuilderExt;
///
/// let client = HttpClientBuilder::new()
///     .with_token_injection(provider, AUTHORIZATION)
///     .build()?;
/// ```
pub trait HttpClientBuilderExt {
    /// Set `<header_name>: <token_type> <access_token>` on every request.
    #[must_use]
    fn with_token_injection(self, provider: CachingTokenProvider, header_name: HeaderName)
    -> Self;
}

impl HttpClientBuilderExt for backend_http::HttpClientBuilder {
    fn with_token_injection(
        self,
        provider: CachingTokenProvider,
        header_name: HeaderName,
    ) -> Self {
        let layer = TokenInjectionLayer::with_header_name(provider, header_name);
        self.with_auth_layer(move |svc| {
            tower::ServiceBuilder::new()
                .layer(layer)
                .service(svc)
                .boxed_clone()
        })
    }
}
