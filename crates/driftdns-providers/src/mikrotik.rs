//! Mikrotik RouterOS backend.
//!
//! Static DNS records via the RouterOS v7 REST API
//! (`/rest/ip/dns/static`): print, add, remove, and set for TTL
//! convergence. Uniqueness is on `(name, address)`. TLS is optional
//! and supports fingerprint pinning.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use driftdns_core::addr::AddressCollection;
use driftdns_core::config::duration;
use driftdns_core::error::{Error, Result};
use driftdns_core::service::{fqdn, Service, ServiceRegistry};
use serde::Deserialize;
use tracing::debug;

use crate::http;

const PROVIDER: &str = "mikrotik";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    address: String,
    username: String,
    password: String,
    #[serde(default)]
    zone: String,
    #[serde(deserialize_with = "duration::flexible")]
    ttl: Duration,
    #[serde(default)]
    use_tls: bool,
    #[serde(default)]
    tls_fingerprint: Option<String>,
}

pub struct Mikrotik {
    settings: Settings,
}

/// Register the `mikrotik` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            Ok(Arc::new(Mikrotik { settings }) as Arc<dyn Service>)
        }),
    );
}

#[derive(Debug, Deserialize)]
struct StaticRecord {
    #[serde(rename = ".id")]
    id: String,
    #[serde(default)]
    address: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    ttl: Option<String>,
}

impl Mikrotik {
    fn base(&self) -> String {
        let scheme = if self.settings.use_tls { "https" } else { "http" };
        // address may already carry a scheme
        if self.settings.address.contains("://") {
            http::base_url(&self.settings.address).to_string()
        } else {
            format!("{scheme}://{}", http::base_url(&self.settings.address))
        }
    }

    fn client(&self) -> Result<reqwest::Client> {
        let fingerprint = if self.settings.use_tls {
            self.settings.tls_fingerprint.as_deref()
        } else {
            None
        };
        http::client(PROVIDER, fingerprint)
    }

    /// RouterOS renders TTLs like `1h`, `5m`, `1d`; configured TTLs are
    /// compared against that form.
    fn ttl_string(&self) -> String {
        humantime::format_duration(self.settings.ttl)
            .to_string()
            .replace(' ', "")
    }

    async fn list_records(&self, client: &reqwest::Client, name: &str) -> Result<Vec<StaticRecord>> {
        let url = format!("{}/rest/ip/dns/static?name={name}", self.base());
        let response = client
            .get(&url)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad record list: {e}")))
    }

    async fn add_record(&self, client: &reqwest::Client, name: &str, ip: &IpAddr) -> Result<()> {
        let kind = if ip.is_ipv6() { "AAAA" } else { "A" };
        let url = format!("{}/rest/ip/dns/static", self.base());
        let response = client
            .put(&url)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .json(&serde_json::json!({
                "name": name,
                "address": ip.to_string(),
                "type": kind,
                "ttl": self.ttl_string(),
            }))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        http::check_status(PROVIDER, response).await?;
        Ok(())
    }

    async fn remove_record(&self, client: &reqwest::Client, id: &str) -> Result<()> {
        let url = format!("{}/rest/ip/dns/static/{id}", self.base());
        let response = client
            .delete(&url)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        http::check_status(PROVIDER, response).await?;
        Ok(())
    }

    async fn set_ttl(&self, client: &reqwest::Client, id: &str) -> Result<()> {
        let url = format!("{}/rest/ip/dns/static/{id}", self.base());
        let response = client
            .patch(&url)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .json(&serde_json::json!({ "ttl": self.ttl_string() }))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        http::check_status(PROVIDER, response).await?;
        Ok(())
    }
}

#[async_trait]
impl Service for Mikrotik {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let client = self.client()?;
        let name = self.domain(hostname);

        let records = self.list_records(&client, &name).await?;
        let current: Vec<(IpAddr, &StaticRecord)> = records
            .iter()
            .filter(|record| {
                matches!(record.kind.as_deref(), None | Some("A") | Some("AAAA"))
            })
            .filter_map(|record| record.address.parse().ok().map(|ip| (ip, record)))
            .collect();

        let desired = addresses.ips();

        for ip in &desired {
            if !current.iter().any(|(existing, _)| existing == ip) {
                debug!(%name, %ip, "adding static record");
                self.add_record(&client, &name, ip).await?;
            }
        }

        let ttl = self.ttl_string();
        for (ip, record) in &current {
            if desired.contains(ip) {
                // converge TTL; unparseable TTLs are rewritten
                if record.ttl.as_deref() != Some(ttl.as_str()) {
                    debug!(%name, %ip, id = %record.id, "converging ttl");
                    self.set_ttl(&client, &record.id).await?;
                }
            } else {
                debug!(%name, %ip, id = %record.id, "removing static record");
                self.remove_record(&client, &record.id).await?;
            }
        }
        Ok(())
    }

    fn domain(&self, hostname: &str) -> String {
        fqdn(hostname, &self.settings.zone)
    }

    fn pretty_print(&self, prefix: &str) -> String {
        let mut out = String::new();
        writeln!(out, "{prefix}address: {}", self.settings.address).ok();
        writeln!(out, "{prefix}zone: {}", self.settings.zone).ok();
        writeln!(out, "{prefix}ttl: {} tls: {}", self.ttl_string(), self.settings.use_tls).ok();
        writeln!(out, "{prefix}username: {}", self.settings.username).ok();
        writeln!(out, "{prefix}password: {}", self.settings.password).ok();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(use_tls: bool, address: &str) -> Mikrotik {
        Mikrotik {
            settings: Settings {
                address: address.into(),
                username: "admin".into(),
                password: "pw".into(),
                zone: "lan".into(),
                ttl: Duration::from_secs(300),
                use_tls,
                tls_fingerprint: None,
            },
        }
    }

    #[test]
    fn base_url_respects_scheme() {
        assert_eq!(service(false, "192.0.2.1").base(), "http://192.0.2.1");
        assert_eq!(service(true, "192.0.2.1").base(), "https://192.0.2.1");
        assert_eq!(
            service(true, "https://192.0.2.1/").base(),
            "https://192.0.2.1"
        );
    }

    #[test]
    fn ttl_renders_in_routeros_form() {
        assert_eq!(service(false, "x").ttl_string(), "5m");
    }
}
