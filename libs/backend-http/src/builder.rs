use crate::config::{HttpClientConfig, TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use crate::layers::UserAgentLayer;
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// The transport stack below the auth slot, as seen by an auth layer.
pub type InnerService =
    BoxCloneService<http::Request<Full<Bytes>>, http::Response<ResponseBody>, HttpError>;

type AuthLayerFn = Box<dyn FnOnce(InnerService) -> InnerService + Send>;

/// Assembles an [`HttpClient`](crate::HttpClient) for one backend.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    auth_layer: Option<AuthLayerFn>,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            auth_layer: None,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Accept `http://` URLs (mock servers in tests).
    ///
    /// Compiled out of release builds unless the `allow-insecure-http`
    /// feature is on.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Wrap the transport in a credential-injecting layer.
    ///
    /// The layer runs after the request leaves the queue and before the
    /// timeout starts, so `request_timeout` bounds the backend exchange only
    /// and a slow token fetch is bounded by the caller's cancellation. A
    /// second call replaces the first.
    #[must_use]
    pub fn with_auth_layer(
        mut self,
        wrap: impl FnOnce(InnerService) -> InnerService + Send + 'static,
    ) -> Self {
        self.auth_layer = Some(Box::new(wrap));
        self
    }

    /// Must run inside a Tokio runtime: the dispatch worker is spawned here.
    ///
    /// # Errors
    /// `HttpError::Tls` when the root store cannot be loaded,
    /// `HttpError::InvalidHeaderValue` for an unusable user agent.
    pub fn build(self) -> Result<crate::HttpClient, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                target: "backend_http::security",
                "backend client accepts plain http://; credentials may be sent unencrypted"
            );
        }

        let timeout = self.config.request_timeout;
        let connector = https_connector(self.config.tls_roots, self.config.transport)?;

        let mut hyper_builder = Client::builder(TokioExecutor::new());
        // Idle expiry needs a timer.
        hyper_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.idle_connections);
        if let Some(idle) = self.config.idle_timeout {
            hyper_builder.pool_idle_timeout(idle);
        }
        let hyper_client = hyper_builder.build::<_, Full<Bytes>>(connector);

        let user_agent = UserAgentLayer::try_new(&self.config.user_agent)?;

        // queue → [auth] → error mapping → timeout → user agent →
        // decompression → hyper. Every status comes back as Ok.
        let transport = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(user_agent)
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(box_response_body)
            .map_err(move |e: tower::BoxError| classify_error(e, timeout))
            .boxed_clone();

        let service = match self.auth_layer {
            Some(wrap) => wrap(transport),
            None => transport,
        };

        Ok(crate::HttpClient {
            service: Buffer::new(service, self.config.queue_depth.max(1)),
            max_body_size: self.config.max_body_size,
            transport_security: self.config.transport,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Timeouts become `Timeout`; errors raised as `HttpError` by a layer pass
/// through; everything else is a transport failure.
fn classify_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    match err.downcast::<HttpError>() {
        Ok(err) => *err,
        Err(other) => HttpError::Transport(other),
    }
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    response.map(|body| body.map_err(Into::into).boxed())
}

/// Offers h2 and http/1.1 via ALPN.
fn https_connector(
    roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = match roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::get_crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            let config =
                tls::native_roots_client_config().map_err(|e| HttpError::Tls(e.into()))?;
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(config)
        }
    };

    let connector = match transport {
        TransportSecurity::AllowInsecureHttp => builder.https_or_http(),
        TransportSecurity::TlsOnly => builder.https_only(),
    }
    .enable_all_versions()
    .build();
    Ok(connector)
}
