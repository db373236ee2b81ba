#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Outbound HTTP transport for gateway backends
//!
//! A hyper-based client behind a small tower stack:
//! - TLS via rustls (HTTPS only unless insecure HTTP is explicitly allowed)
//! - Connection pooling
//! - Per-request timeout
//! - User-Agent header injection
//! - Transparent response decompression (gzip, brotli, deflate)
//! - One optional auth layer slot, used by credential-injecting middleware
//! - Caller-driven cancellation through [`tokio_util::sync::CancellationToken`]
//!
//! Retries are deliberately not part of the stack: the layer that issues
//! requests owns its retry policy.
//!
//! # Example
//!
//! ```ignore
//! use backend_http::HttpClient;
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .user_agent("my-gateway/1.0")
//!     .build()?;
//!
//! let data: MyData = client
//!     .get("https://backend.example.com/api")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
mod layers;
mod request;
mod response;
mod tls;

pub use builder::{HttpClientBuilder, InnerService};
pub use client::HttpClient;
pub use config::{DEFAULT_USER_AGENT, HttpClientConfig, TlsRootConfig, TransportSecurity};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{UserAgentLayer, UserAgentService};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, LimitedBody, ResponseBody};
