//! Subdomain registry
//!
//! Maps a subdomain to the handle of the control connection that owns it. Allocation and
//! collision resolution happen under the write lock, so two concurrent registrations can
//! never end up owning the same name.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Length of a generated subdomain
const GENERATED_LEN: usize = 8;

/// Length of the suffix appended on collision
const SUFFIX_LEN: usize = 4;

/// Maximum length of a DNS label
const MAX_LABEL_LEN: usize = 63;

/// Registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid subdomain '{0}': use 1-63 characters a-z, 0-9 or '-', not starting or ending with '-'")]
    InvalidSubdomain(String),

    #[error("Subdomain '{0}' is unavailable")]
    Unavailable(String),
}

/// Check that `name` is a usable DNS label
pub fn validate_subdomain(name: &str) -> Result<(), RegistryError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_LABEL_LEN
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidSubdomain(name.to_string()))
    }
}

fn random_hex(len: usize) -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(len);
    id
}

/// `name` plus a random suffix, kept within one DNS label
fn disambiguate(name: &str) -> String {
    let max_base = MAX_LABEL_LEN - SUFFIX_LEN - 1;
    let base = if name.len() > max_base {
        name[..max_base].trim_end_matches('-')
    } else {
        name
    };
    format!("{}-{}", base, random_hex(SUFFIX_LEN))
}

/// Subdomain -> connection handle map
pub struct SubdomainRegistry<T> {
    bindings: Arc<RwLock<HashMap<String, Arc<T>>>>,
}

impl<T> Clone for SubdomainRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            bindings: self.bindings.clone(),
        }
    }
}

impl<T> Default for SubdomainRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SubdomainRegistry<T> {
    pub fn new() -> Self {
        Self {
            bindings: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bind `handle` to a subdomain and return the name actually assigned
    ///
    /// An empty request gets a generated name. A taken name gets one random suffix; if
    /// that is taken too the registration fails rather than evicting the owner.
    pub async fn register(&self, requested: &str, handle: Arc<T>) -> Result<String, RegistryError> {
        let requested = requested.trim().to_ascii_lowercase();
        if !requested.is_empty() {
            validate_subdomain(&requested)?;
        }

        let mut bindings = self.bindings.write().await;

        let mut name = if requested.is_empty() {
            random_hex(GENERATED_LEN)
        } else {
            requested
        };

        if bindings.contains_key(&name) {
            let candidate = disambiguate(&name);
            debug!("Subdomain {} is taken, trying {}", name, candidate);
            if bindings.contains_key(&candidate) {
                return Err(RegistryError::Unavailable(name));
            }
            name = candidate;
        }

        bindings.insert(name.clone(), handle);
        info!("Registered subdomain {} ({} active)", name, bindings.len());
        Ok(name)
    }

    /// Connection currently bound to `name`
    pub async fn lookup(&self, name: &str) -> Option<Arc<T>> {
        let name = name.to_ascii_lowercase();
        let found = self.bindings.read().await.get(&name).cloned();
        trace!("Lookup {} -> {}", name, found.is_some());
        found
    }

    /// Remove the binding for `name` unconditionally
    pub async fn remove(&self, name: &str) -> Option<Arc<T>> {
        let removed = self
            .bindings
            .write()
            .await
            .remove(&name.to_ascii_lowercase());
        if removed.is_some() {
            debug!("Removed subdomain {}", name);
        }
        removed
    }

    /// Remove the binding for `name` only if it still points at `handle`
    pub async fn remove_if_current(&self, name: &str, handle: &Arc<T>) -> bool {
        let name = name.to_ascii_lowercase();
        let mut bindings = self.bindings.write().await;

        match bindings.get(&name) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                bindings.remove(&name);
                debug!("Removed subdomain {}", name);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.bindings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bindings.read().await.is_empty()
    }

    /// Bound subdomains, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
