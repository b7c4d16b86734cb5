//! OPNsense Unbound backend.
//!
//! Host overrides are diffed per `(hostname, domain, ip)`; duplicate
//! rows for the same IP are cleaned up. Unbound is stateful, so a
//! single `reconfigure` is triggered at the end, and only when a
//! mutation happened.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use driftdns_core::addr::AddressCollection;
use driftdns_core::config::duration;
use driftdns_core::error::{Error, Result};
use driftdns_core::service::{fqdn, split_fqdn, Service, ServiceRegistry};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::http;

const PROVIDER: &str = "opnsense_unbound";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    address: String,
    key: String,
    secret: String,
    #[serde(default)]
    zone: String,
    #[serde(deserialize_with = "duration::flexible")]
    ttl: Duration,
    #[serde(default)]
    tls_fingerprint: Option<String>,
}

pub struct OpnsenseUnbound {
    settings: Settings,
}

/// Register the `opnsense_unbound` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            Ok(Arc::new(OpnsenseUnbound { settings }) as Arc<dyn Service>)
        }),
    );
}

#[derive(Debug, Deserialize)]
struct OverrideRow {
    uuid: String,
    hostname: String,
    domain: String,
    rr: String,
    server: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    rows: Vec<OverrideRow>,
}

#[derive(Debug, Default, Deserialize)]
struct MutationResponse {
    #[serde(default)]
    result: String,
    #[serde(default)]
    status: String,
}

impl MutationResponse {
    fn accepted(&self) -> bool {
        self.result == "saved" || self.result == "deleted" || self.status == "ok"
    }
}

impl OpnsenseUnbound {
    fn client(&self) -> Result<reqwest::Client> {
        http::client(PROVIDER, self.settings.tls_fingerprint.as_deref())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", http::base_url(&self.settings.address))
    }

    async fn get_overrides(&self, client: &reqwest::Client) -> Result<Vec<OverrideRow>> {
        let response = client
            .get(self.url("/api/unbound/settings/searchHostOverride"))
            .basic_auth(&self.settings.key, Some(&self.settings.secret))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response).await?;
        let search: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad search response: {e}")))?;
        Ok(search.rows)
    }

    async fn mutate(&self, client: &reqwest::Client, path: &str, payload: serde_json::Value) -> Result<()> {
        let response = client
            .post(self.url(path))
            .basic_auth(&self.settings.key, Some(&self.settings.secret))
            .json(&payload)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::backend_transient(PROVIDER, format!("failed to read body: {e}")))?;
        let parsed: MutationResponse = serde_json::from_str(&body).unwrap_or_default();
        if !parsed.accepted() {
            return Err(Error::backend_permanent(
                PROVIDER,
                format!("{path} rejected: {body}"),
            ));
        }
        Ok(())
    }

    async fn add_override(
        &self,
        client: &reqwest::Client,
        host: &str,
        domain: &str,
        ip: &IpAddr,
    ) -> Result<()> {
        let rr = if ip.is_ipv6() { "AAAA" } else { "A" };
        self.mutate(
            client,
            "/api/unbound/settings/addHostOverride",
            serde_json::json!({
                "host": {
                    "enabled": "1",
                    "hostname": host,
                    "domain": domain,
                    "rr": rr,
                    "server": ip.to_string(),
                    "ttl": self.settings.ttl.as_secs().to_string(),
                    "description": "Managed by driftdns",
                }
            }),
        )
        .await
    }

    async fn delete_override(&self, client: &reqwest::Client, uuid: &str) -> Result<()> {
        self.mutate(
            client,
            &format!("/api/unbound/settings/delHostOverride/{uuid}"),
            serde_json::json!({}),
        )
        .await
    }

    async fn reconfigure(&self, client: &reqwest::Client) -> Result<()> {
        self.mutate(client, "/api/unbound/service/reconfigure", serde_json::json!({}))
            .await
    }
}

#[async_trait]
impl Service for OpnsenseUnbound {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let client = self.client()?;

        let name = self.domain(hostname);
        let (host_part, domain_part) = split_fqdn(&name);

        let overrides = self.get_overrides(&client).await?;

        // current state for this name: ip -> uuids
        let mut current: Vec<(IpAddr, Vec<String>)> = Vec::new();
        for row in overrides {
            if row.hostname != host_part || row.domain != domain_part {
                continue;
            }
            let rr = row.rr.to_ascii_uppercase();
            if rr != "A" && rr != "AAAA" {
                continue;
            }
            let Ok(ip) = row.server.parse::<IpAddr>() else {
                continue;
            };
            match current.iter().position(|(existing, _)| *existing == ip) {
                Some(index) => current[index].1.push(row.uuid),
                None => current.push((ip, vec![row.uuid])),
            }
        }

        let desired = addresses.ips();
        let mut changed = false;

        for ip in &desired {
            match current.iter().find(|(existing, _)| existing == ip) {
                None => {
                    debug!(%name, %ip, "adding host override");
                    self.add_override(&client, host_part, domain_part, ip).await?;
                    changed = true;
                }
                Some((_, uuids)) => {
                    // keep the first row, delete duplicates
                    for uuid in &uuids[1..] {
                        debug!(%name, %ip, %uuid, "deleting duplicate host override");
                        match self.delete_override(&client, uuid).await {
                            Ok(()) => changed = true,
                            Err(err) => warn!(%name, %ip, %uuid, error = %err, "failed to delete duplicate"),
                        }
                    }
                }
            }
        }

        for (ip, uuids) in &current {
            if desired.contains(ip) {
                continue;
            }
            for uuid in uuids {
                debug!(%name, %ip, %uuid, "deleting host override");
                self.delete_override(&client, uuid).await?;
                changed = true;
            }
        }

        if changed {
            self.reconfigure(&client).await?;
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
        writeln!(
            out,
            "{prefix}ttl: {}",
            humantime::format_duration(self.settings.ttl)
        )
        .ok();
        writeln!(out, "{prefix}key: {}", self.settings.key).ok();
        out
    }
}
