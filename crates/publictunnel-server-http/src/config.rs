//! Server configuration

use publictunnel_control::HeartbeatConfig;
use publictunnel_proto::RESPONSE_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cap on a relayed request body
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name the server itself is reached on (status page, control endpoint)
    pub domain: String,
    /// Base domain tunnels are published under
    pub tunnel_domain: String,
    /// Extra host names treated like `domain`
    pub aliases: Vec<String>,
    pub bind_host: String,
    pub port: u16,
    #[serde(with = "duration_secs")]
    pub response_timeout: Duration,
    pub max_body_size: usize,
    #[serde(skip)]
    pub heartbeat: HeartbeatConfig,
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: "server.publictunnel.com".to_string(),
            tunnel_domain: "publictunnel.com".to_string(),
            aliases: vec!["localhost".to_string()],
            bind_host: "0.0.0.0".to_string(),
            port: 4000,
            response_timeout: RESPONSE_TIMEOUT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// `host:port` to listen on
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.config.domain = domain.into();
        self
    }

    pub fn tunnel_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.tunnel_domain = domain.into();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.config.aliases.push(alias.into());
        self
    }

    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.config.bind_host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    /// Validate and finish; an empty tunnel domain falls back to `domain`
    pub fn build(mut self) -> Result<ServerConfig, String> {
        if self.config.domain.trim().is_empty() {
            return Err("domain is required".to_string());
        }
        if self.config.tunnel_domain.trim().is_empty() {
            self.config.tunnel_domain = self.config.domain.clone();
        }
        if self.config.heartbeat.ping_period >= self.config.heartbeat.pong_wait {
            return Err("ping period must be shorter than pong wait".to_string());
        }
        Ok(self.config)
    }
}
