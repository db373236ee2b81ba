//! Send one authenticated request to a backend.
//!
//! The first argument is a JSON file holding a backend's extra config, e.g.
//!
//! ```json
//! {
//!   "github.com/devopsfaith/krakend-oauth2-clientcredentials": {
//!     "client_id": "my-service",
//!     "client_secret": "my-secret",
//!     "token_url": "https://idp.example.com/oauth/token",
//!     "scopes": "tenants.read,tenants.write",
//!     "endpoint_params": {"audience": ["tenants"]}
//!   }
//! }
//! ```
//!
//! The second argument is the backend URL.
//!
//! Run with: `RUST_LOG=debug cargo run --example client_credentials -- extra.json https://api.example.com/v1/tenants`

#![allow(clippy::use_debug)]
#![allow(clippy::print_stdout)]

use backend_http::HttpClientConfig;
use backend_oauth2::{ClientFactory, ExtraConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(url)) = (args.next(), args.next()) else {
        return Err("usage: client_credentials <extra-config.json> <backend-url>".into());
    };

    let extra: ExtraConfig = serde_json::from_str(&std::fs::read_to_string(config_path)?)?;
    let factory = ClientFactory::from_extra_config(&extra, HttpClientConfig::default())?;
    println!("authenticated: {}", factory.is_authenticated());

    let resp = factory.client().get(&url).send().await?;
    println!("{} {:?}", resp.status(), resp.headers());
    println!("{}", resp.text().await?);

    if let Some(token) = factory.token_provider().and_then(|p| p.cached()) {
        println!("cached token: {token:?}");
    }
    Ok(())
}
