#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! `OAuth2` client credentials for outbound backend requests.
//!
//! A backend whose extra config carries the [`NAMESPACE`] block gets an
//! [`HttpClient`](backend_http::HttpClient) that obtains a token from the
//! configured token endpoint, caches it until shortly before it expires and
//! sets it on every request. Concurrent requests that find the cache empty
//! share one token fetch.
//!
//! ```ignore
//! use backend_oauth2::ClientFactory;
//!
//! let factory = ClientFactory::from_extra_config(&backend.extra_config, HttpClientConfig::default())?;
//! let resp = factory.client().get("https://backend.example.com/api").send().await?;
//! ```

pub mod builder_ext;
pub mod config;
pub mod error;
pub mod factory;
pub mod fetcher;
pub mod layer;
pub mod provider;
pub mod token;
pub mod types;

pub use builder_ext::HttpClientBuilderExt;
pub use config::{DEFAULT_EXPIRY_SKEW, ExtraConfig, NAMESPACE, Settings};
pub use error::TokenError;
pub use factory::ClientFactory;
pub use fetcher::{ClientCredentialsFetcher, TokenFetcher};
pub use layer::{TokenInjectionLayer, TokenInjectionService};
pub use provider::{CachingTokenProvider, ProviderOptions};
pub use token::{AccessToken, DEFAULT_TOKEN_TYPE};
pub use types::{ClientAuthMethod, SecretString};
