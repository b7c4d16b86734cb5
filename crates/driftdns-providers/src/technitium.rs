//! Technitium DNS backend. Record CRUD over the token-authenticated
//! query-string API.

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

const PROVIDER: &str = "technitium";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    address: String,
    token: String,
    zone: String,
    #[serde(deserialize_with = "duration::flexible")]
    ttl: Duration,
    #[serde(default)]
    tls_fingerprint: Option<String>,
}

pub struct Technitium {
    settings: Settings,
}

/// Register the `technitium` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            Ok(Arc::new(Technitium { settings }) as Arc<dyn Service>)
        }),
    );
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default, rename = "errorMessage")]
    error_message: String,
    #[serde(default)]
    response: RecordsResponse,
}

#[derive(Debug, Default, Deserialize)]
struct RecordsResponse {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "rData", default)]
    rdata: RData,
}

#[derive(Debug, Default, Deserialize)]
struct RData {
    #[serde(rename = "ipAddress", default)]
    ip_address: String,
}

impl Technitium {
    fn client(&self) -> Result<reqwest::Client> {
        http::client(PROVIDER, self.settings.tls_fingerprint.as_deref())
    }

    async fn call(
        &self,
        client: &reqwest::Client,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse> {
        let url = format!("{}{path}", http::base_url(&self.settings.address));
        let mut query: Vec<(&str, &str)> = vec![
            ("token", self.settings.token.as_str()),
            ("zone", self.settings.zone.as_str()),
        ];
        query.extend_from_slice(params);

        let response = client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response).await?;

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad response: {e}")))?;
        if parsed.status != "ok" {
            return Err(Error::backend_permanent(
                PROVIDER,
                format!("{path} failed: {}", parsed.error_message),
            ));
        }
        Ok(parsed)
    }

    async fn get_records(&self, client: &reqwest::Client, domain: &str) -> Result<Vec<IpAddr>> {
        let parsed = self
            .call(client, "/api/zones/records/get", &[("domain", domain)])
            .await?;
        Ok(parsed
            .response
            .records
            .iter()
            .filter(|record| record.kind == "A" || record.kind == "AAAA")
            .filter_map(|record| record.rdata.ip_address.parse().ok())
            .collect())
    }

    async fn add_record(&self, client: &reqwest::Client, domain: &str, ip: &IpAddr) -> Result<()> {
        let kind = if ip.is_ipv6() { "AAAA" } else { "A" };
        let ip = ip.to_string();
        let ttl = self.settings.ttl.as_secs().to_string();
        self.call(
            client,
            "/api/zones/records/add",
            &[
                ("domain", domain),
                ("type", kind),
                ("ipAddress", ip.as_str()),
                ("ttl", ttl.as_str()),
                ("overwrite", "false"),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn delete_record(
        &self,
        client: &reqwest::Client,
        domain: &str,
        ip: &IpAddr,
    ) -> Result<()> {
        let kind = if ip.is_ipv6() { "AAAA" } else { "A" };
        let ip = ip.to_string();
        self.call(
            client,
            "/api/zones/records/delete",
            &[("domain", domain), ("type", kind), ("ipAddress", ip.as_str())],
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl Service for Technitium {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let client = self.client()?;
        let name = self.domain(hostname);

        let current = self.get_records(&client, &name).await?;
        let desired = addresses.ips();

        for ip in &current {
            if !desired.contains(ip) {
                debug!(%name, %ip, "deleting record");
                self.delete_record(&client, &name, ip).await?;
            }
        }
        for ip in &desired {
            if !current.contains(ip) {
                debug!(%name, %ip, "adding record");
                self.add_record(&client, &name, ip).await?;
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
        writeln!(
            out,
            "{prefix}ttl: {}",
            humantime::format_duration(self.settings.ttl)
        )
        .ok();
        writeln!(out, "{prefix}token: {}", self.settings.token).ok();
        out
    }
}
