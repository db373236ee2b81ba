use std::time::Duration;

/// `User-Agent` sent when neither the config nor the caller sets one
pub const DEFAULT_USER_AGENT: &str = concat!("backend-http/", env!("CARGO_PKG_VERSION"));

/// Where server certificates are verified against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Bundled Mozilla roots; behaves the same on every host
    #[default]
    WebPki,
    /// The host's certificate store, for backends signed by a private CA
    Native,
}

/// Which URL schemes a client accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// `https://` only
    #[default]
    TlsOnly,
    /// `http://` as well. Mock servers in tests only: bearer tokens would
    /// travel in clear text.
    AllowInsecureHttp,
}

/// Settings of one backend client
///
/// The same value drives the client of the token endpoint through
/// [`HttpClientConfig::token_endpoint`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Limit on one backend exchange, excluding the wait for a token (30 s)
    pub request_timeout: Duration,

    /// Largest response body the readers accept (10 MiB)
    pub max_body_size: usize,

    pub user_agent: String,

    pub transport: TransportSecurity,

    pub tls_roots: TlsRootConfig,

    /// Requests queued ahead of the dispatch worker before `send()` waits (1024)
    pub queue_depth: usize,

    /// Idle keep-alive connections kept per host (32); `0` disables reuse
    pub idle_connections: usize,

    /// How long an idle connection is kept (90 s); `None` keeps it until
    /// the server closes it
    pub idle_timeout: Option<Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 << 20,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::WebPki,
            queue_depth: 1024,
            idle_connections: 32,
            idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

impl HttpClientConfig {
    /// Client for a backend's token endpoint.
    ///
    /// Reached with the backend's transport security, roots, timeout and
    /// user agent. Token requests are rare and their answers small, so the
    /// queue, the pool and the body limit shrink.
    #[must_use]
    pub fn token_endpoint(backend: &Self) -> Self {
        Self {
            max_body_size: 1 << 20,
            queue_depth: 64,
            idle_connections: 4,
            idle_timeout: Some(Duration::from_secs(60)),
            ..backend.clone()
        }
    }

    /// Accepts `http://` so tests can talk to local mock servers.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1 << 20,
            transport: TransportSecurity::AllowInsecureHttp,
            queue_depth: 256,
            idle_connections: 4,
            idle_timeout: Some(Duration::from_secs(10)),
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults_require_tls() {
        let config = HttpClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_size, 10 * 1024 * 1024);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
        assert_eq!(config.tls_roots, TlsRootConfig::WebPki);
        assert_eq!(config.queue_depth, 1024);
    }

    #[test]
    fn token_endpoint_follows_backend() {
        let backend = HttpClientConfig {
            user_agent: "gateway/1.0".to_owned(),
            tls_roots: TlsRootConfig::Native,
            request_timeout: Duration::from_secs(5),
            ..HttpClientConfig::for_testing()
        };
        let config = HttpClientConfig::token_endpoint(&backend);
        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        assert_eq!(config.tls_roots, TlsRootConfig::Native);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "gateway/1.0");
        assert_eq!(config.max_body_size, 1024 * 1024);
        assert_eq!(config.idle_connections, 4);

        let config = HttpClientConfig::token_endpoint(&HttpClientConfig::default());
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
    }

    #[test]
    fn for_testing_allows_http() {
        let config = HttpClientConfig::for_testing();
        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
    }

    #[test]
    fn default_user_agent_carries_version() {
        assert!(DEFAULT_USER_AGENT.starts_with("backend-http/"));
    }
}
