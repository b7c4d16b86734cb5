//! OpenWrt backend. Managed records are `dhcp.*.domain` UCI sections
//! edited over SSH, committed and reloaded into dnsmasq only when the
//! diff produced changes.
//!
//! Sections created here get deterministic names derived from the
//! record they hold, so a later run recognises its own additions and
//! never duplicates them.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use driftdns_core::addr::AddressCollection;
use driftdns_core::config::duration;
use driftdns_core::error::{Error, Result};
use driftdns_core::service::{fqdn, Service, ServiceRegistry};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::ssh::SshClient;

const PROVIDER: &str = "openwrt";
const SECTION_PREFIX: &str = "ipv6ddns_";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    address: String,
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    ssh_key: String,
    zone: String,
    #[serde(deserialize_with = "duration::flexible")]
    #[allow(dead_code)]
    ttl: Duration,
}

pub struct OpenWrt {
    settings: Settings,
}

/// Register the `openwrt` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            if settings.password.is_empty() && settings.ssh_key.is_empty() {
                return Err(Error::config(format!(
                    "{PROVIDER}: either password or ssh_key is required"
                )));
            }
            Ok(Arc::new(OpenWrt { settings }) as Arc<dyn Service>)
        }),
    );
}

/// Deterministic UCI section name for one `(fqdn, ip)` record.
fn section_id(name: &str, ip: &str) -> String {
    let digest = Sha256::digest(format!("{name}|{ip}").as_bytes());
    format!("{SECTION_PREFIX}{}", &hex::encode(digest)[..8])
}

#[derive(Debug, Default)]
struct UciRecord {
    name: String,
    ip: String,
}

/// Parse `uci show dhcp` into section id → (name, ip).
fn parse_uci_show(output: &str) -> Vec<(String, UciRecord)> {
    let mut records: Vec<(String, UciRecord)> = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim_matches('\'');
        let parts: Vec<&str> = key.split('.').collect();
        // dhcp.<id>.<field>
        if parts.len() != 3 || parts[0] != "dhcp" {
            continue;
        }
        let id = parts[1];
        let index = match records.iter().position(|(existing, _)| existing == id) {
            Some(index) => index,
            None => {
                records.push((id.to_string(), UciRecord::default()));
                records.len() - 1
            }
        };
        let record = &mut records[index].1;
        match parts[2] {
            "name" => record.name = value.to_string(),
            "ip" => record.ip = value.to_string(),
            _ => {}
        }
    }
    records
}

fn run_update(settings: &Settings, name: &str, desired: &[String]) -> std::result::Result<(), String> {
    let key_path = (!settings.ssh_key.is_empty()).then(|| Path::new(&settings.ssh_key));
    let password = (!settings.password.is_empty()).then_some(settings.password.as_str());
    let client = SshClient::connect(&settings.address, &settings.username, password, key_path)?;

    let output = client.exec("uci show dhcp")?;

    // existing records for this name: ip -> section id
    let existing: Vec<(String, String)> = parse_uci_show(&output)
        .into_iter()
        .filter(|(_, record)| record.name == name && !record.ip.is_empty())
        .filter(|(_, record)| record.ip.parse::<IpAddr>().is_ok())
        .map(|(id, record)| (record.ip, id))
        .collect();

    let to_delete: Vec<&str> = existing
        .iter()
        .filter(|(ip, _)| !desired.contains(ip))
        .map(|(_, id)| id.as_str())
        .collect();
    let to_add: Vec<&str> = desired
        .iter()
        .filter(|ip| !existing.iter().any(|(existing_ip, _)| existing_ip == *ip))
        .map(String::as_str)
        .collect();

    if to_delete.is_empty() && to_add.is_empty() {
        return Ok(());
    }

    for id in to_delete {
        client.exec(&format!("uci delete dhcp.{id}"))?;
    }
    for ip in to_add {
        let id = section_id(name, ip);
        client.exec(&format!("uci set dhcp.{id}=domain"))?;
        client.exec(&format!("uci set dhcp.{id}.name='{name}'"))?;
        client.exec(&format!("uci set dhcp.{id}.ip='{ip}'"))?;
    }

    client.exec("uci commit dhcp")?;
    client.exec("/etc/init.d/dnsmasq reload")?;
    Ok(())
}

#[async_trait]
impl Service for OpenWrt {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let settings = self.settings.clone();
        let name = self.domain(hostname);
        let desired = addresses.ip_strings();
        debug!(%name, addresses = ?desired, "reconciling uci domain sections");

        tokio::task::spawn_blocking(move || run_update(&settings, &name, &desired))
            .await
            .map_err(|e| Error::backend_transient(PROVIDER, format!("update task failed: {e}")))?
            .map_err(|message| Error::backend_transient(PROVIDER, message))
    }

    fn domain(&self, hostname: &str) -> String {
        fqdn(hostname, &self.settings.zone)
    }

    fn pretty_print(&self, prefix: &str) -> String {
        let mut out = String::new();
        writeln!(out, "{prefix}address: {}", self.settings.address).ok();
        writeln!(out, "{prefix}zone: {}", self.settings.zone).ok();
        writeln!(out, "{prefix}username: {}", self.settings.username).ok();
        if !self.settings.ssh_key.is_empty() {
            writeln!(out, "{prefix}ssh_key: {}", self.settings.ssh_key).ok();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_ids_are_deterministic_and_distinct() {
        let a = section_id("www.example.com", "2001:db8::1");
        let b = section_id("www.example.com", "2001:db8::1");
        let c = section_id("www.example.com", "2001:db8::2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with(SECTION_PREFIX));
        assert_eq!(a.len(), SECTION_PREFIX.len() + 8);
    }

    #[test]
    fn parses_uci_show_output() {
        let output = "\
dhcp.@domain[0]=domain
dhcp.@domain[0].name='printer.lan'
dhcp.@domain[0].ip='192.168.1.9'
dhcp.ipv6ddns_deadbeef=domain
dhcp.ipv6ddns_deadbeef.name='www.example.com'
dhcp.ipv6ddns_deadbeef.ip='2001:db8::1'
dhcp.lan=dnsmasq
";
        let records = parse_uci_show(output);
        let managed = records
            .iter()
            .find(|(id, _)| id == "ipv6ddns_deadbeef")
            .unwrap();
        assert_eq!(managed.1.name, "www.example.com");
        assert_eq!(managed.1.ip, "2001:db8::1");

        let anon = records.iter().find(|(id, _)| id == "@domain[0]").unwrap();
        assert_eq!(anon.1.name, "printer.lan");
    }
}
