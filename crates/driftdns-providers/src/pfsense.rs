//! pfSense (REST API v2) Unbound backend.
//!
//! pfSense keeps a single host-override row per `(host, domain)` that
//! holds the whole IP list, so the diff collapses to one add, one
//! update-in-place or one delete, followed by a single apply call when
//! anything changed. Wildcard names are rejected by the resolver and
//! refused here up front.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use driftdns_core::addr::AddressCollection;
use driftdns_core::config::duration;
use driftdns_core::error::{Error, Result};
use driftdns_core::service::{fqdn, split_fqdn, Service, ServiceRegistry};
use serde::Deserialize;
use tracing::debug;

use crate::http;

const PROVIDER: &str = "pfsense_restapi_unbound";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    address: String,
    key: String,
    zone: String,
    #[serde(deserialize_with = "duration::flexible")]
    ttl: Duration,
    #[serde(default)]
    tls_fingerprint: Option<String>,
}

pub struct PfsenseRestapiUnbound {
    settings: Settings,
}

/// Register the `pfsense_restapi_unbound` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            Ok(Arc::new(PfsenseRestapiUnbound { settings }) as Arc<dyn Service>)
        }),
    );
}

#[derive(Debug, Deserialize)]
struct OverrideRow {
    id: serde_json::Value,
    host: String,
    domain: String,
    #[serde(default)]
    ip: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ApiResponse {
    fn accepted(&self) -> bool {
        self.status == "ok" || self.status == "success" || self.code == 200
    }
}

impl PfsenseRestapiUnbound {
    fn client(&self) -> Result<reqwest::Client> {
        http::client(PROVIDER, self.settings.tls_fingerprint.as_deref())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", http::base_url(&self.settings.address))
    }

    async fn parse_response(&self, response: reqwest::Response) -> Result<ApiResponse> {
        let response = http::check_status(PROVIDER, response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::backend_transient(PROVIDER, format!("failed to read body: {e}")))?;
        let parsed: ApiResponse = serde_json::from_str(&body)
            .map_err(|_| Error::backend_permanent(PROVIDER, format!("unparseable response: {body}")))?;
        if !parsed.accepted() {
            return Err(Error::backend_permanent(
                PROVIDER,
                format!("API error: {} ({body})", parsed.message),
            ));
        }
        Ok(parsed)
    }

    async fn get_overrides(&self, client: &reqwest::Client) -> Result<Vec<OverrideRow>> {
        let response = client
            .get(self.url("/api/v2/services/dns_resolver/host_overrides"))
            .header("X-API-Key", &self.settings.key)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let parsed = self.parse_response(response).await?;
        serde_json::from_value(parsed.data)
            .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad override rows: {e}")))
    }

    async fn add_override(
        &self,
        client: &reqwest::Client,
        host: &str,
        domain: &str,
        ips: &[String],
    ) -> Result<()> {
        let response = client
            .post(self.url("/api/v2/services/dns_resolver/host_override"))
            .header("X-API-Key", &self.settings.key)
            .json(&self.override_payload(None, host, domain, ips))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        self.parse_response(response).await.map(|_| ())
    }

    async fn update_override(
        &self,
        client: &reqwest::Client,
        id: &str,
        host: &str,
        domain: &str,
        ips: &[String],
    ) -> Result<()> {
        let response = client
            .patch(self.url("/api/v2/services/dns_resolver/host_override"))
            .header("X-API-Key", &self.settings.key)
            .json(&self.override_payload(Some(id), host, domain, ips))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        self.parse_response(response).await.map(|_| ())
    }

    async fn delete_override(&self, client: &reqwest::Client, id: &str) -> Result<()> {
        let response = client
            .delete(self.url(&format!(
                "/api/v2/services/dns_resolver/host_override?id={id}"
            )))
            .header("X-API-Key", &self.settings.key)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        self.parse_response(response).await.map(|_| ())
    }

    async fn apply(&self, client: &reqwest::Client) -> Result<()> {
        let response = client
            .post(self.url("/api/v2/services/dns_resolver/apply"))
            .header("X-API-Key", &self.settings.key)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        self.parse_response(response).await.map(|_| ())
    }

    fn override_payload(
        &self,
        id: Option<&str>,
        host: &str,
        domain: &str,
        ips: &[String],
    ) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "host": host,
            "domain": domain,
            "ip": ips,
            "ttl": self.settings.ttl.as_secs().to_string(),
            "descr": "Managed by driftdns",
        });
        if let Some(id) = id {
            payload["id"] = serde_json::Value::String(id.to_string());
        }
        payload
    }
}

fn same_ips(a: &[String], b: &[String]) -> bool {
    use std::collections::BTreeSet;
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

#[async_trait]
impl Service for PfsenseRestapiUnbound {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let name = self.domain(hostname);
        if name.contains('*') {
            return Err(Error::backend_permanent(
                PROVIDER,
                format!("wildcard DNS entries are not supported: {name}"),
            ));
        }

        let client = self.client()?;
        let (host_part, domain_part) = split_fqdn(&name);

        let overrides = self.get_overrides(&client).await?;
        let existing = overrides
            .iter()
            .find(|row| row.host == host_part && row.domain == domain_part);

        let desired = addresses.ip_strings();
        let mut changed = false;

        match existing {
            None => {
                if !desired.is_empty() {
                    debug!(%name, ips = ?desired, "adding host override");
                    self.add_override(&client, host_part, domain_part, &desired)
                        .await?;
                    changed = true;
                }
            }
            Some(row) if !same_ips(&row.ip, &desired) => {
                let id = match &row.id {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if desired.is_empty() {
                    debug!(%name, id, "deleting host override");
                    self.delete_override(&client, &id).await?;
                } else {
                    debug!(%name, id, ips = ?desired, "updating host override in place");
                    self.update_override(&client, &id, host_part, domain_part, &desired)
                        .await?;
                }
                changed = true;
            }
            Some(_) => {}
        }

        if changed {
            self.apply(&client).await?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_list_comparison_is_order_insensitive() {
        assert!(same_ips(
            &["::1".into(), "::2".into()],
            &["::2".into(), "::1".into()]
        ));
        assert!(!same_ips(&["::1".into()], &["::1".into(), "::2".into()]));
    }
}
