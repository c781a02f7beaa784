//! Public HTTP listener for the tunnel relay
//!
//! One axum listener serves three things, chosen by `Host`:
//! the status page and the `/ws` control endpoint on the server's own names, and
//! relayed traffic on `<subdomain>.<tunnel domain>`.

pub mod config;
pub mod server;
pub mod socket;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use server::{ServerError, TunnelServer, STATUS_TEXT};

pub use publictunnel_control::{PendingRequests, TunnelRegistry};
