//! Host-header classification

use tracing::trace;

/// Where an inbound request should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRoute {
    /// The server itself: status page and control endpoint
    Control,
    /// A tunnel, by subdomain
    Tunnel(String),
    /// Neither
    Unknown,
}

/// Classifies hosts against the control domain and the tunnel base domain
#[derive(Debug, Clone)]
pub struct HostRouter {
    control_hosts: Vec<String>,
    tunnel_suffix: String,
}

impl HostRouter {
    /// `aliases` are extra names treated like the control domain (e.g. `localhost`)
    pub fn new(control_domain: &str, tunnel_domain: &str, aliases: &[String]) -> Self {
        let tunnel_domain = tunnel_domain.trim_end_matches('.').to_ascii_lowercase();

        let mut control_hosts: Vec<String> = [control_domain, tunnel_domain.as_str()]
            .into_iter()
            .chain(aliases.iter().map(String::as_str))
            .map(|host| host.trim_end_matches('.').to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        control_hosts.dedup();

        Self {
            control_hosts,
            tunnel_suffix: format!(".{}", tunnel_domain),
        }
    }

    pub fn route(&self, host: &str) -> HostRoute {
        let host = Self::normalize_host(host);

        let route = if self.control_hosts.iter().any(|h| *h == host) {
            HostRoute::Control
        } else {
            match host.strip_suffix(&self.tunnel_suffix) {
                // Only a single label in front of the base domain
                Some(name) if !name.is_empty() && !name.contains('.') => {
                    HostRoute::Tunnel(name.to_string())
                }
                _ => HostRoute::Unknown,
            }
        };

        trace!("Host {} routed to {:?}", host, route);
        route
    }

    /// Lower-case the host and drop any port suffix
    pub fn normalize_host(host: &str) -> String {
        let host = host.trim();
        let without_port = match host.strip_prefix('[') {
            // IPv6 literal: [::1]:8080
            Some(rest) => rest.split(']').next().unwrap_or(rest),
            None => host.split(':').next().unwrap_or(host),
        };
        without_port.trim_end_matches('.').to_ascii_lowercase()
    }
}
