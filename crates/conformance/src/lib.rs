//! An HTTP/1.1 conformance battery run against an httpbin-compatible service,
//! directly or through a forwarding, tunneling or masque proxy.

pub mod body;
pub mod config;
pub mod connector;
pub mod errors;
pub mod proxy;
pub mod resolve;
pub mod runner;
pub mod scenarios;
pub mod session;
pub mod tls;
pub mod types;

pub use config::{HarnessConfig, HarnessSettings};
pub use errors::{ConfigError, SessionError};
pub use proxy::{ProxyEndpoint, ProxyMode};
pub use scenarios::{Scenario, ScenarioFailure, SCENARIOS};
pub use session::ClientSession;
