//! The contract between the engine and the DDNS backends, and the
//! process-wide factory registry the reconciler resolves providers
//! through.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::addr::AddressCollection;
use crate::error::{Error, Result};

/// Capability set implemented by every DDNS backend.
///
/// Implementations perform one reconciliation pass per [`update`] call
/// and surface no partial success: either the whole hostname converged
/// or the call fails. Retry, debounce and scheduling are owned by the
/// engine; adapters must not retry internally.
///
/// [`update`]: Service::update
#[async_trait]
pub trait Service: Send + Sync {
    /// Reconcile the backend-side records for `hostname` so they become
    /// exactly the A/AAAA set corresponding to `addresses`.
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()>;

    /// The fully qualified name the backend will use, for display only.
    fn domain(&self, hostname: &str) -> String;

    /// Human-readable rendering of the backend configuration. Secrets
    /// are included; redaction happens at the presentation layer.
    fn pretty_print(&self, prefix: &str) -> String;
}

/// Constructor turning raw credential settings into a [`Service`].
pub type ServiceFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Service>> + Send + Sync>;

/// Registry of provider factories, keyed by provider name.
///
/// Populated once during startup, before the reconciler starts; treated
/// as immutable afterwards.
#[derive(Default)]
pub struct ServiceRegistry {
    factories: RwLock<HashMap<String, ServiceFactory>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider factory under `name`.
    pub fn register(&self, name: impl Into<String>, factory: ServiceFactory) {
        let mut factories = self.factories.write().unwrap();
        factories.insert(name.into(), factory);
    }

    /// Instantiate a service for `provider` from raw settings.
    /// Unknown provider names are fatal at configuration time.
    pub fn create(&self, provider: &str, settings: &serde_json::Value) -> Result<Arc<dyn Service>> {
        let factories = self.factories.read().unwrap();
        let factory = factories
            .get(provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))?;
        factory(settings)
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.factories.read().unwrap().contains_key(provider)
    }
}

/// Compose a fully qualified domain name from a hostname and a zone.
///
/// Leading/trailing dots are trimmed from both. A hostname already
/// ending in the zone is returned as-is; an empty zone returns the
/// hostname, an empty hostname returns the zone.
pub fn fqdn(hostname: &str, zone: &str) -> String {
    let hostname = hostname.trim_matches('.');
    let zone = zone.trim_matches('.');

    if hostname.is_empty() {
        return zone.to_string();
    }
    if !zone.is_empty() && hostname.ends_with(zone) {
        return hostname.to_string();
    }
    if zone.is_empty() {
        return hostname.to_string();
    }
    format!("{hostname}.{zone}")
}

/// Split a fully qualified name on the first dot into
/// `(host, domain)`. A name without dots has an empty domain part.
pub fn split_fqdn(fqdn: &str) -> (&str, &str) {
    let fqdn = fqdn.trim_matches('.');
    match fqdn.split_once('.') {
        Some((host, domain)) => (host, domain),
        None => (fqdn, ""),
    }
}
