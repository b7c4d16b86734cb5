//! Cloudflare DNS backend.
//!
//! Per-record CRUD against the v4 REST API. The record set under the
//! task's name is diffed against the desired address set; TTL and the
//! proxied flag are converged on records that stay.

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

const PROVIDER: &str = "cloudflare";

fn default_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    api_token: String,
    zone: String,
    #[serde(deserialize_with = "duration::flexible")]
    ttl: Duration,
    #[serde(default)]
    proxied: bool,
    #[serde(default = "default_api_base")]
    api_base: String,
}

pub struct Cloudflare {
    settings: Settings,
}

/// Register the `cloudflare` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            if settings.api_token.is_empty() {
                return Err(Error::config(format!("{PROVIDER}: api_token must not be empty")));
            }
            Ok(Arc::new(Cloudflare { settings }) as Arc<dyn Service>)
        }),
    );
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    content: String,
    #[serde(default)]
    ttl: Option<i64>,
    #[serde(default)]
    proxied: Option<bool>,
}

impl Cloudflare {
    fn ttl_secs(&self) -> i64 {
        self.settings.ttl.as_secs() as i64
    }

    async fn zone_id(&self, client: &reqwest::Client) -> Result<String> {
        let url = format!("{}/zones?name={}", self.settings.api_base, self.settings.zone);
        let response = client
            .get(&url)
            .bearer_auth(&self.settings.api_token)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response).await?;

        let zones: ApiResponse<Vec<Zone>> = response
            .json()
            .await
            .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad zone response: {e}")))?;
        zones
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|zone| zone.id)
            .ok_or_else(|| {
                Error::backend_permanent(
                    PROVIDER,
                    format!("zone not found: {}", self.settings.zone),
                )
            })
    }

    async fn list_records(
        &self,
        client: &reqwest::Client,
        zone_id: &str,
        name: &str,
    ) -> Result<Vec<Record>> {
        let url = format!(
            "{}/zones/{zone_id}/dns_records?name={name}",
            self.settings.api_base
        );
        let response = client
            .get(&url)
            .bearer_auth(&self.settings.api_token)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response).await?;

        let records: ApiResponse<Vec<Record>> = response
            .json()
            .await
            .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad record response: {e}")))?;
        Ok(records.result.unwrap_or_default())
    }

    async fn create_record(
        &self,
        client: &reqwest::Client,
        zone_id: &str,
        name: &str,
        ip: &IpAddr,
    ) -> Result<()> {
        let url = format!("{}/zones/{zone_id}/dns_records", self.settings.api_base);
        let payload = serde_json::json!({
            "type": record_type(ip),
            "name": name,
            "content": ip.to_string(),
            "ttl": self.ttl_secs(),
            "proxied": self.settings.proxied,
        });
        let response = client
            .post(&url)
            .bearer_auth(&self.settings.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        http::check_status(PROVIDER, response).await?;
        Ok(())
    }

    async fn delete_record(
        &self,
        client: &reqwest::Client,
        zone_id: &str,
        record_id: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/zones/{zone_id}/dns_records/{record_id}",
            self.settings.api_base
        );
        let response = client
            .delete(&url)
            .bearer_auth(&self.settings.api_token)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        http::check_status(PROVIDER, response).await?;
        Ok(())
    }

    async fn patch_record(
        &self,
        client: &reqwest::Client,
        zone_id: &str,
        record_id: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/zones/{zone_id}/dns_records/{record_id}",
            self.settings.api_base
        );
        let payload = serde_json::json!({
            "ttl": self.ttl_secs(),
            "proxied": self.settings.proxied,
        });
        let response = client
            .patch(&url)
            .bearer_auth(&self.settings.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        http::check_status(PROVIDER, response).await?;
        Ok(())
    }
}

fn record_type(ip: &IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "A",
        IpAddr::V6(_) => "AAAA",
    }
}

#[async_trait]
impl Service for Cloudflare {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let client = http::client(PROVIDER, None)?;
        let name = self.domain(hostname);

        let zone_id = self.zone_id(&client).await?;
        let records = self.list_records(&client, &zone_id, &name).await?;

        // current state: ip -> records, A/AAAA only, unparseable skipped
        let mut current: Vec<(IpAddr, Vec<&Record>)> = Vec::new();
        for record in &records {
            if record.kind != "A" && record.kind != "AAAA" {
                continue;
            }
            let Ok(ip) = record.content.parse::<IpAddr>() else {
                continue;
            };
            match current.iter().position(|(existing, _)| *existing == ip) {
                Some(index) => current[index].1.push(record),
                None => current.push((ip, vec![record])),
            }
        }

        let desired = addresses.ips();

        for ip in &desired {
            match current.iter().find(|(existing, _)| existing == ip) {
                None => {
                    debug!(%name, %ip, "creating record");
                    self.create_record(&client, &zone_id, &name, ip).await?;
                }
                Some((_, records)) => {
                    // keep one record per ip, drop duplicates
                    for duplicate in &records[1..] {
                        debug!(%name, %ip, record = %duplicate.id, "deleting duplicate record");
                        self.delete_record(&client, &zone_id, &duplicate.id).await?;
                    }
                    let kept = records[0];
                    if kept.ttl != Some(self.ttl_secs())
                        || kept.proxied.unwrap_or(false) != self.settings.proxied
                    {
                        debug!(%name, %ip, record = %kept.id, "converging ttl/proxied");
                        self.patch_record(&client, &zone_id, &kept.id).await?;
                    }
                }
            }
        }

        for (ip, records) in &current {
            if desired.contains(ip) {
                continue;
            }
            for record in records {
                debug!(%name, %ip, record = %record.id, "deleting record");
                self.delete_record(&client, &zone_id, &record.id).await?;
            }
        }

        Ok(())
    }

    fn domain(&self, hostname: &str) -> String {
        fqdn(hostname, &self.settings.zone)
    }

    fn pretty_print(&self, prefix: &str) -> String {
        let mut out = String::new();
        writeln!(out, "{prefix}zone: {}", self.settings.zone).ok();
        writeln!(
            out,
            "{prefix}ttl: {} proxied: {}",
            humantime::format_duration(self.settings.ttl),
            self.settings.proxied
        )
        .ok();
        writeln!(out, "{prefix}api_token: {}", self.settings.api_token).ok();
        out
    }
}
