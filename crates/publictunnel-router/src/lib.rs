//! Routing logic for the tunnel relay
//!
//! Two pieces live here:
//! - [`SubdomainRegistry`]: which control connection owns which subdomain
//! - [`HostRouter`]: classification of an inbound `Host` header

pub mod host;
pub mod registry;

pub use host::{HostRoute, HostRouter};
pub use registry::{validate_subdomain, RegistryError, SubdomainRegistry};
