//! Gravity DNS backend. Bearer-authenticated record CRUD; created
//! records get a fresh uid.

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
use uuid::Uuid;

use crate::http;

const PROVIDER: &str = "gravity";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    server: String,
    api_key: String,
    zone: String,
    #[serde(deserialize_with = "duration::flexible")]
    #[allow(dead_code)]
    ttl: Duration,
}

pub struct Gravity {
    settings: Settings,
}

/// Register the `gravity` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            Ok(Arc::new(Gravity { settings }) as Arc<dyn Service>)
        }),
    );
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(rename = "type")]
    kind: String,
    data: String,
    #[serde(default)]
    uid: String,
}

impl Gravity {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", http::base_url(&self.settings.server))
    }

    async fn get_records(&self, client: &reqwest::Client, hostname: &str) -> Result<Vec<Record>> {
        let response = client
            .get(self.url("/api/v1/dns/zones/records"))
            .bearer_auth(&self.settings.api_key)
            .query(&[("zone", self.settings.zone.as_str()), ("hostname", hostname)])
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response).await?;
        let parsed: RecordsResponse = response
            .json()
            .await
            .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad records response: {e}")))?;
        Ok(parsed.records)
    }

    async fn put_record(
        &self,
        client: &reqwest::Client,
        hostname: &str,
        ip: &IpAddr,
    ) -> Result<()> {
        let kind = if ip.is_ipv6() { "AAAA" } else { "A" };
        let uid = Uuid::new_v4().to_string();
        let response = client
            .put(self.url("/api/v1/dns/zones/records"))
            .bearer_auth(&self.settings.api_key)
            .query(&[
                ("zone", self.settings.zone.as_str()),
                ("hostname", hostname),
                ("uid", uid.as_str()),
            ])
            .json(&serde_json::json!({
                "type": kind,
                "data": ip.to_string(),
            }))
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        http::check_status(PROVIDER, response).await?;
        Ok(())
    }

    async fn delete_record(
        &self,
        client: &reqwest::Client,
        hostname: &str,
        record: &Record,
    ) -> Result<()> {
        let response = client
            .delete(self.url("/api/v1/dns/zones/records"))
            .bearer_auth(&self.settings.api_key)
            .query(&[
                ("zone", self.settings.zone.as_str()),
                ("hostname", hostname),
                ("type", record.kind.as_str()),
                ("uid", record.uid.as_str()),
            ])
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        http::check_status(PROVIDER, response).await?;
        Ok(())
    }
}

#[async_trait]
impl Service for Gravity {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let client = http::client(PROVIDER, None)?;

        let records = self.get_records(&client, hostname).await?;
        let current: Vec<(IpAddr, &Record)> = records
            .iter()
            .filter(|record| record.kind == "A" || record.kind == "AAAA")
            .filter_map(|record| record.data.parse().ok().map(|ip| (ip, record)))
            .collect();

        let desired = addresses.ips();

        for ip in &desired {
            if !current.iter().any(|(existing, _)| existing == ip) {
                debug!(hostname, %ip, "creating record");
                self.put_record(&client, hostname, ip).await?;
            }
        }
        for (ip, record) in &current {
            if !desired.contains(ip) {
                debug!(hostname, %ip, uid = %record.uid, "deleting record");
                self.delete_record(&client, hostname, record).await?;
            }
        }
        Ok(())
    }

    fn domain(&self, hostname: &str) -> String {
        fqdn(hostname, &self.settings.zone)
    }

    fn pretty_print(&self, prefix: &str) -> String {
        let mut out = String::new();
        writeln!(out, "{prefix}server: {}", self.settings.server).ok();
        writeln!(out, "{prefix}zone: {}", self.settings.zone).ok();
        writeln!(out, "{prefix}api_key: {}", self.settings.api_key).ok();
        out
    }
}
