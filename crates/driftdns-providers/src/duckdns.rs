//! DuckDNS backend. One GET carries the first IPv4 and the first IPv6
//! of the desired set; DuckDNS keeps a single record per family.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use driftdns_core::addr::AddressCollection;
use driftdns_core::error::{Error, Result};
use driftdns_core::service::{fqdn, Service, ServiceRegistry};
use serde::Deserialize;

use crate::http;

const PROVIDER: &str = "duckdns";
const UPDATE_URL: &str = "https://www.duckdns.org/update";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    api_token: String,
}

pub struct DuckDns {
    settings: Settings,
}

/// Register the `duckdns` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            if settings.api_token.is_empty() {
                return Err(Error::config(format!("{PROVIDER}: api_token must not be empty")));
            }
            Ok(Arc::new(DuckDns { settings }) as Arc<dyn Service>)
        }),
    );
}

#[async_trait]
impl Service for DuckDns {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let ipv4 = addresses
            .filter4()
            .ips()
            .first()
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        let ipv6 = addresses
            .filter6()
            .ips()
            .first()
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        let client = http::client(PROVIDER, None)?;
        let response = client
            .get(UPDATE_URL)
            .query(&[
                ("token", self.settings.api_token.as_str()),
                ("domains", hostname),
                ("ip", ipv4.as_str()),
                ("ipv6", ipv6.as_str()),
            ])
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::backend_transient(PROVIDER, format!("failed to read body: {e}")))?;
        if body.trim() != "OK" {
            return Err(Error::backend_permanent(
                PROVIDER,
                format!("update rejected: {body}"),
            ));
        }
        Ok(())
    }

    fn domain(&self, hostname: &str) -> String {
        fqdn(hostname, "duckdns.org")
    }

    fn pretty_print(&self, prefix: &str) -> String {
        let mut out = String::new();
        writeln!(out, "{prefix}api_token: {}", self.settings.api_token).ok();
        out
    }
}
