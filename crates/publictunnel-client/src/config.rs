//! Client configuration

use crate::client::TunnelError;
use publictunnel_proto::{CONTROL_PATH, PONG_WAIT, WRITE_WAIT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Tunnel client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay server, `http(s)://` or `ws(s)://`
    pub server_url: String,
    pub local_host: String,
    pub local_port: u16,
    /// Requested subdomain; `None` lets the server pick
    pub subdomain: Option<String>,
    /// Time allowed between inbound frames
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub write_timeout: Duration,
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

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "https://server.publictunnel.com".to_string(),
            local_host: "localhost".to_string(),
            local_port: 8080,
            subdomain: None,
            read_timeout: PONG_WAIT,
            write_timeout: WRITE_WAIT,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// WebSocket URL of the server's control endpoint
    pub fn control_url(&self) -> Result<String, TunnelError> {
        let mut url = Url::parse(&self.server_url).map_err(|e| {
            TunnelError::ConfigError(format!("invalid server URL '{}': {}", self.server_url, e))
        })?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TunnelError::ConfigError(format!(
                    "unsupported server URL scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| TunnelError::ConfigError(format!("cannot use scheme {}", scheme)))?;
        url.set_path(CONTROL_PATH);

        Ok(url.to_string())
    }

    /// Base URL requests are forwarded to
    pub fn local_url(&self) -> String {
        format!("http://{}:{}", self.local_host, self.local_port)
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = url.into();
        self
    }

    pub fn local_host(mut self, host: impl Into<String>) -> Self {
        self.config.local_host = host.into();
        self
    }

    pub fn local_port(mut self, port: u16) -> Self {
        self.config.local_port = port;
        self
    }

    /// An empty name is the same as none
    pub fn subdomain(mut self, subdomain: Option<String>) -> Self {
        self.config.subdomain = subdomain.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ClientConfig, String> {
        if self.config.local_port == 0 {
            return Err("local_port must be non-zero".to_string());
        }
        self.config.control_url().map_err(|e| e.to_string())?;
        Ok(self.config)
    }
}
