//! Tower layers for the HTTP client middleware stack.

mod user_agent;

pub use user_agent::{UserAgentLayer, UserAgentService};
