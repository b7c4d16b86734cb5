//! Log-only backend for smoke testing a configuration without touching
//! any DNS server.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use driftdns_core::addr::AddressCollection;
use driftdns_core::error::{Error, Result};
use driftdns_core::service::{fqdn, Service, ServiceRegistry};
use serde::Deserialize;
use tracing::info;

const PROVIDER: &str = "dummy";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    #[serde(default)]
    zone: String,
}

pub struct Dummy {
    settings: Settings,
}

/// Register the `dummy` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            Ok(Arc::new(Dummy { settings }) as Arc<dyn Service>)
        }),
    );
}

#[async_trait]
impl Service for Dummy {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        info!(
            hostname = %self.domain(hostname),
            addresses = ?addresses.ip_strings(),
            "dummy update"
        );
        Ok(())
    }

    fn domain(&self, hostname: &str) -> String {
        fqdn(hostname, &self.settings.zone)
    }

    fn pretty_print(&self, prefix: &str) -> String {
        let mut out = String::new();
        if !self.settings.zone.is_empty() {
            writeln!(out, "{prefix}zone: {}", self.settings.zone).ok();
        }
        out
    }
}
