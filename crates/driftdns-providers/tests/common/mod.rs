//! Helpers shared by the adapter tests.

use std::sync::Arc;
use std::time::Duration;

use driftdns_core::addr::{Address, AddressCollection, MacAddr};
use driftdns_core::{Service, ServiceRegistry};

/// Collection holding the given IPs (MAC irrelevant to the adapters).
pub fn collection(ips: &[&str]) -> AddressCollection {
    ips.iter()
        .map(|ip| {
            Address::new(
                MacAddr::ZERO,
                ip.parse().unwrap(),
                Duration::from_secs(3600),
                Some("test"),
            )
        })
        .collect()
}

/// Instantiate `provider` through its registered factory.
pub fn service(provider: &str, settings: serde_json::Value) -> Arc<dyn Service> {
    let registry = ServiceRegistry::new();
    driftdns_providers::register_builtin(&registry);
    registry.create(provider, &settings).expect("factory accepts settings")
}
