//! Windows DNS backend.
//!
//! Records are managed with the DnsServer PowerShell module, either on
//! the local machine or over SSH. Scripts are shipped as UTF-16LE
//! base64 via `-EncodedCommand`, which sidesteps every quoting rule in
//! between.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use driftdns_core::addr::AddressCollection;
use driftdns_core::config::duration;
use driftdns_core::error::{Error, Result};
use driftdns_core::service::{fqdn, Service, ServiceRegistry};
use serde::Deserialize;
use tracing::debug;

use crate::ssh::SshClient;

const PROVIDER: &str = "windows";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    zone: String,
    /// When set, run PowerShell on this host over SSH instead of
    /// locally
    #[serde(default)]
    address: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    ssh_key: String,
    #[serde(default, deserialize_with = "duration::option_flexible")]
    ttl: Option<Duration>,
}

pub struct WindowsDns {
    settings: Settings,
}

/// Register the `windows` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            Ok(Arc::new(WindowsDns { settings }) as Arc<dyn Service>)
        }),
    );
}

/// UTF-16LE + base64, the encoding `-EncodedCommand` expects. Progress
/// streams are silenced so stdout stays parseable.
fn encode_script(script: &str) -> String {
    let full = format!(
        "$ProgressPreference = 'SilentlyContinue'; $InformationPreference = 'SilentlyContinue'; {script}"
    );
    let mut bytes = Vec::with_capacity(full.len() * 2);
    for unit in full.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// `HH:MM:SS`, the TimeSpan form `-TimeToLive` expects.
fn ttl_timespan(ttl: Duration) -> String {
    let secs = ttl.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

async fn run_powershell(settings: &Settings, script: &str) -> Result<String> {
    if settings.address.is_empty() {
        run_local(script).await
    } else {
        run_over_ssh(settings, script).await
    }
}

async fn run_local(script: &str) -> Result<String> {
    let binary = if which_pwsh() { "pwsh" } else { "powershell" };
    let output = tokio::process::Command::new(binary)
        .args(["-NoProfile", "-NonInteractive", "-EncodedCommand", &encode_script(script)])
        .output()
        .await
        .map_err(|e| Error::backend_transient(PROVIDER, format!("failed to run {binary}: {e}")))?;

    if !output.status.success() {
        return Err(Error::backend_transient(
            PROVIDER,
            format!(
                "powershell failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn which_pwsh() -> bool {
    std::env::var_os("PATH")
        .map(|path| {
            std::env::split_paths(&path).any(|dir| {
                dir.join("pwsh").is_file() || dir.join("pwsh.exe").is_file()
            })
        })
        .unwrap_or(false)
}

async fn run_over_ssh(settings: &Settings, script: &str) -> Result<String> {
    let settings = settings.clone();
    let command = format!(
        "powershell -NoProfile -NonInteractive -EncodedCommand {}",
        encode_script(script)
    );
    tokio::task::spawn_blocking(move || {
        let key_path = (!settings.ssh_key.is_empty()).then(|| Path::new(&settings.ssh_key));
        let password = (!settings.password.is_empty()).then_some(settings.password.as_str());
        let client =
            SshClient::connect(&settings.address, &settings.username, password, key_path)?;
        client.exec(&command)
    })
    .await
    .map_err(|e| Error::backend_transient(PROVIDER, format!("update task failed: {e}")))?
    .map_err(|message| Error::backend_transient(PROVIDER, message))
}

impl WindowsDns {
    async fn current_ips(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        let script = format!(
            r#"try {{
    $output = @()
    $rA = Get-DnsServerResourceRecord -ZoneName '{zone}' -Name '{hostname}' -RRType A -ErrorAction SilentlyContinue
    if ($rA) {{ $output += $rA | Select-Object -ExpandProperty RecordData | Select-Object -ExpandProperty IPv4Address | ForEach-Object {{ "$_" }} }}
    $rAAAA = Get-DnsServerResourceRecord -ZoneName '{zone}' -Name '{hostname}' -RRType AAAA -ErrorAction SilentlyContinue
    if ($rAAAA) {{ $output += $rAAAA | Select-Object -ExpandProperty RecordData | Select-Object -ExpandProperty IPv6Address | ForEach-Object {{ "$_" }} }}
    if ($output.Count -gt 0) {{ $output | ConvertTo-Json -Compress }} else {{ Write-Output "[]" }}
}} catch {{
    Write-Error $_.Exception.Message
    exit 1
}}"#,
            zone = self.settings.zone,
        );

        let output = run_powershell(&self.settings, &script).await?;
        let trimmed = output.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }

        // ConvertTo-Json collapses a single element to a bare string
        let strings: Vec<String> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed).map_err(|e| {
                Error::backend_permanent(PROVIDER, format!("bad record list {trimmed}: {e}"))
            })?
        } else {
            vec![serde_json::from_str::<String>(trimmed).map_err(|e| {
                Error::backend_permanent(PROVIDER, format!("bad record {trimmed}: {e}"))
            })?]
        };

        Ok(strings.iter().filter_map(|s| s.parse().ok()).collect())
    }

    async fn remove_ip(&self, hostname: &str, ip: &IpAddr) -> Result<()> {
        let rr_type = if ip.is_ipv6() { "AAAA" } else { "A" };
        let script = format!(
            "Remove-DnsServerResourceRecord -ZoneName '{zone}' -Name '{hostname}' -RRType {rr_type} -RecordData '{ip}' -Force",
            zone = self.settings.zone,
        );
        run_powershell(&self.settings, &script).await.map(|_| ())
    }

    async fn add_ip(&self, hostname: &str, ip: &IpAddr) -> Result<()> {
        let (type_switch, ip_param) = if ip.is_ipv6() {
            ("-Aaaa", "-IPv6Address")
        } else {
            ("-A", "-IPv4Address")
        };
        let mut script = format!(
            "Add-DnsServerResourceRecord -ZoneName '{zone}' -Name '{hostname}' {type_switch} {ip_param} '{ip}'",
            zone = self.settings.zone,
        );
        if let Some(ttl) = self.settings.ttl {
            write!(script, " -TimeToLive '{}'", ttl_timespan(ttl)).ok();
        }
        run_powershell(&self.settings, &script).await.map(|_| ())
    }
}

#[async_trait]
impl Service for WindowsDns {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let current = self.current_ips(hostname).await?;
        let desired = addresses.ips();

        for ip in &current {
            if !desired.contains(ip) {
                debug!(hostname, %ip, "removing record");
                self.remove_ip(hostname, ip).await?;
            }
        }
        for ip in &desired {
            if !current.contains(ip) {
                debug!(hostname, %ip, "adding record");
                self.add_ip(hostname, ip).await?;
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
        if !self.settings.address.is_empty() {
            writeln!(out, "{prefix}address: {} (ssh)", self.settings.address).ok();
            writeln!(out, "{prefix}username: {}", self.settings.username).ok();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_command_is_utf16le_base64() {
        let encoded = encode_script("Write-Output 'x'");
        let bytes = BASE64.decode(encoded).unwrap();
        // even length, every ASCII char followed by a zero byte
        assert_eq!(bytes.len() % 2, 0);
        assert_eq!(bytes[1], 0);
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let decoded = String::from_utf16(&units).unwrap();
        assert!(decoded.starts_with("$ProgressPreference"));
        assert!(decoded.ends_with("Write-Output 'x'"));
    }

    #[test]
    fn ttl_renders_as_timespan() {
        assert_eq!(ttl_timespan(Duration::from_secs(3600)), "01:00:00");
        assert_eq!(ttl_timespan(Duration::from_secs(90)), "00:01:30");
        assert_eq!(ttl_timespan(Duration::from_secs(86400 + 61)), "24:01:01");
    }
}
