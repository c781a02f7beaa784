//! Tunnel client library - Public API
//!
//! Connects to a relay server, claims a subdomain and serves every relayed request from a
//! service on the local machine.

pub mod client;
pub mod config;
pub mod forwarder;

pub use client::{ClientState, TunnelClient, TunnelError};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use forwarder::LocalForwarder;
