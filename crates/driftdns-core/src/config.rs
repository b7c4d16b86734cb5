//! Configuration view of the engine.
//!
//! The file is JSON or YAML, validated against the embedded schema
//! before deserialization. Durations accept both numeric seconds and
//! duration strings (`"10s"`, `"1h"`).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::addr::MacAddr;
use crate::error::{Error, Result};
use crate::filter::FilterClause;

const CONFIG_SCHEMA: &str = include_str!("schema.json");

/// Placeholder shown instead of credentials on redacted output.
pub const REDACTED: &str = "<sensible data hidden>";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub tasks: BTreeMap<String, Task>,
    pub credentials: BTreeMap<String, Credential>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Discovery layer configuration, passed through to the discovery
/// collaborator untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginConfig>,
}

/// One discovery plugin instance.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A reconciliation task: which addresses to select and which
/// endpoint/hostname pairs to keep converged to them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Task {
    /// Legacy selector: IP prefixes (with `mac_address`)
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Legacy selector: exact MAC addresses (with `subnets`)
    #[serde(default)]
    pub mac_address: Vec<MacAddr>,
    /// Generalised selector clauses
    #[serde(default)]
    pub filter: Vec<FilterClause>,
    /// endpoint id → hostnames to maintain there
    pub endpoints: BTreeMap<String, Vec<String>>,
    /// Optional external IPv4 resolver
    #[serde(default)]
    pub ipv4: Option<Ipv4HandlerConfig>,
}

impl Task {
    /// The task's selector as filter clauses. The generalised form is
    /// used verbatim; the legacy `mac_address` × `subnets` lists
    /// desugar to one clause per combination. Unparseable subnets are
    /// skipped.
    pub fn clauses(&self) -> Vec<FilterClause> {
        if !self.filter.is_empty() {
            return self.filter.clone();
        }

        let prefixes: Vec<ipnet::IpNet> =
            self.subnets.iter().filter_map(|s| s.parse().ok()).collect();

        match (self.mac_address.is_empty(), prefixes.is_empty()) {
            (true, true) => Vec::new(),
            (false, true) => self
                .mac_address
                .iter()
                .map(|mac| FilterClause::legacy(Some(*mac), None))
                .collect(),
            (true, false) => prefixes
                .iter()
                .map(|p| FilterClause::legacy(None, Some(p)))
                .collect(),
            (false, false) => self
                .mac_address
                .iter()
                .flat_map(|mac| {
                    prefixes
                        .iter()
                        .map(move |p| FilterClause::legacy(Some(*mac), Some(p)))
                })
                .collect(),
        }
    }
}

/// A configured endpoint at a DDNS provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub provider: String,
    /// Quiet interval between the first schedule request and the update
    #[serde(default = "default_debounce", deserialize_with = "duration::flexible")]
    pub debounce_time: Duration,
    /// Delay before retrying a failed update
    #[serde(default = "default_retry", deserialize_with = "duration::flexible")]
    pub retry_time: Duration,
    /// Provider-specific settings, opaque to the engine
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_debounce() -> Duration {
    Duration::from_secs(10)
}

fn default_retry() -> Duration {
    Duration::from_secs(60)
}

/// External command resolving the task's public IPv4 addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct Ipv4HandlerConfig {
    #[serde(deserialize_with = "duration::flexible")]
    pub interval: Duration,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_ipv4_lifetime", deserialize_with = "duration::flexible")]
    pub lifetime: Duration,
}

fn default_ipv4_lifetime() -> Duration {
    Duration::from_secs(3600)
}

impl Config {
    /// Load and validate a configuration file (JSON or YAML).
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&raw)
    }

    /// Parse and validate configuration text (JSON or YAML).
    pub fn parse(raw: &str) -> Result<Config> {
        // YAML is a superset of JSON, so one parser covers both.
        let value: serde_json::Value = serde_yaml::from_str(raw)
            .map_err(|e| Error::config(format!("unparseable config: {e}")))?;

        let schema: serde_json::Value =
            serde_json::from_str(CONFIG_SCHEMA).expect("embedded schema is valid JSON");
        let compiled = jsonschema::JSONSchema::compile(&schema)
            .expect("embedded schema compiles");

        if let Err(errors) = compiled.validate(&value) {
            let mut msg = String::from("config does not match schema:");
            for error in errors {
                write!(msg, "\n- {error}").ok();
            }
            return Err(Error::config(msg));
        }

        let config: Config = serde_json::from_value(value)
            .map_err(|e| Error::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks the schema cannot express.
    pub fn validate(&self) -> Result<()> {
        for (task_name, task) in &self.tasks {
            for endpoint_id in task.endpoints.keys() {
                if !self.credentials.contains_key(endpoint_id) {
                    return Err(Error::config(format!(
                        "task {task_name} references unknown credential {endpoint_id}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Human-readable rendering; credentials are replaced by
    /// [`REDACTED`] when `redact` is set.
    pub fn pretty_print(&self, prefix: &str, redact: bool) -> String {
        let mut out = String::new();
        writeln!(out, "{prefix}Config:").ok();
        writeln!(out, "{prefix}    Tasks:").ok();
        for (name, task) in &self.tasks {
            writeln!(out, "{prefix}        {name}:").ok();
            if !task.mac_address.is_empty() {
                let macs: Vec<String> =
                    task.mac_address.iter().map(|m| m.to_string()).collect();
                writeln!(out, "{prefix}            MAC Addresses: {}", macs.join(", ")).ok();
            }
            if !task.subnets.is_empty() {
                writeln!(out, "{prefix}            Subnets: {}", task.subnets.join(", ")).ok();
            }
            if !task.filter.is_empty() {
                writeln!(out, "{prefix}            Filter clauses: {}", task.filter.len()).ok();
            }
            writeln!(out, "{prefix}            Hostnames:").ok();
            for (endpoint_id, hostnames) in &task.endpoints {
                let mut sorted = hostnames.clone();
                sorted.sort();
                for hostname in sorted {
                    writeln!(out, "{prefix}                {hostname} ({endpoint_id})").ok();
                }
            }
            if let Some(ipv4) = &task.ipv4 {
                writeln!(
                    out,
                    "{prefix}            IPv4 ({}): {} {}",
                    humantime::format_duration(ipv4.interval),
                    ipv4.command,
                    ipv4.args.join(" ")
                )
                .ok();
            }
        }
        writeln!(out, "{prefix}    Credentials:").ok();
        for (alias, credential) in &self.credentials {
            writeln!(out, "{prefix}        Endpoint: {alias}").ok();
            writeln!(out, "{prefix}            Provider: {}", credential.provider).ok();
            writeln!(
                out,
                "{prefix}            Debounce time: {}",
                humantime::format_duration(credential.debounce_time)
            )
            .ok();
            if redact {
                writeln!(out, "{prefix}            Settings: {REDACTED}").ok();
            } else {
                let settings = serde_json::to_string_pretty(&credential.settings)
                    .unwrap_or_else(|_| "{}".to_string());
                writeln!(out, "{prefix}            Settings: {settings}").ok();
            }
        }
        out
    }
}

/// Serde helpers for durations given either as numeric seconds or as a
/// duration string.
pub mod duration {
    use std::time::Duration;

    use serde::de::{self, Deserializer};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(f64),
        Text(String),
    }

    fn convert<E: de::Error>(raw: Raw) -> Result<Duration, E> {
        match raw {
            Raw::Seconds(secs) if secs >= 0.0 => Ok(Duration::from_secs_f64(secs)),
            Raw::Seconds(secs) => Err(de::Error::custom(format!("negative duration: {secs}"))),
            Raw::Text(text) => humantime::parse_duration(&text).map_err(de::Error::custom),
        }
    }

    pub fn flexible<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        convert(Raw::deserialize(deserializer)?)
    }

    pub fn option_flexible<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Raw>::deserialize(deserializer)?
            .map(convert)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
tasks:
  lan:
    filter:
      - ip:
          prefix: "2001:db8::/64"
        mac:
          address: "00:11:22:33:44:55"
    endpoints:
      cf-main:
        - www
credentials:
  cf-main:
    provider: cloudflare
    debounce_time: 1s
    settings:
      api_token: "1234567890"
"#;

    #[test]
    fn loads_yaml() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.tasks.len(), 1);
        let credential = &config.credentials["cf-main"];
        assert_eq!(credential.provider, "cloudflare");
        assert_eq!(credential.debounce_time, Duration::from_secs(1));
        // retry_time falls back to the default
        assert_eq!(credential.retry_time, Duration::from_secs(60));
    }

    #[test]
    fn loads_json() {
        let json = r#"{
            "tasks": {
                "lan": {
                    "mac_address": ["00:11:22:33:44:55"],
                    "subnets": ["2001:db8::/64"],
                    "endpoints": {"duck": ["myhost"]}
                }
            },
            "credentials": {
                "duck": {
                    "provider": "duckdns",
                    "debounce_time": 30,
                    "settings": {"api_token": "x"}
                }
            }
        }"#;
        let config = Config::parse(json).unwrap();
        assert_eq!(
            config.credentials["duck"].debounce_time,
            Duration::from_secs(30)
        );
        let task = &config.tasks["lan"];
        assert_eq!(task.clauses().len(), 1);
    }

    #[test]
    fn defaults_applied_when_times_missing() {
        let yaml = r#"
tasks: {}
credentials:
  ep:
    provider: dummy
    settings: {}
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.credentials["ep"].debounce_time, Duration::from_secs(10));
        assert_eq!(config.credentials["ep"].retry_time, Duration::from_secs(60));
    }

    #[test]
    fn duration_strings_parse() {
        let yaml = r#"
tasks: {}
credentials:
  ep:
    provider: dummy
    debounce_time: "1h"
    retry_time: "90s"
    settings: {}
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.credentials["ep"].debounce_time, Duration::from_secs(3600));
        assert_eq!(config.credentials["ep"].retry_time, Duration::from_secs(90));
    }

    #[test]
    fn schema_rejects_missing_provider() {
        let yaml = r#"
tasks: {}
credentials:
  ep:
    settings: {}
"#;
        assert!(matches!(Config::parse(yaml), Err(Error::Config(_))));
    }

    #[test]
    fn bad_mac_is_fatal() {
        let yaml = r#"
tasks:
  lan:
    mac_address: ["nonsense"]
    endpoints:
      ep: [www]
credentials:
  ep:
    provider: dummy
    settings: {}
"#;
        assert!(Config::parse(yaml).is_err());
    }

    #[test]
    fn unknown_credential_reference_is_fatal() {
        let yaml = r#"
tasks:
  lan:
    endpoints:
      missing: [www]
credentials: {}
"#;
        assert!(matches!(Config::parse(yaml), Err(Error::Config(_))));
    }

    #[test]
    fn discovery_plugins_parse() {
        let yaml = r#"
tasks: {}
credentials: {}
discovery:
  plugins:
    mikrotik-lan:
      type: mikrotik
      params:
        address: 192.0.2.1
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.discovery.plugins.len(), 1);
        assert_eq!(config.discovery.plugins["mikrotik-lan"].kind, "mikrotik");
    }

    #[test]
    fn legacy_form_desugars_to_cross_product() {
        let yaml = r#"
tasks:
  lan:
    mac_address: ["00:11:22:33:44:55", "aa:bb:cc:dd:ee:ff"]
    subnets: ["2001:db8::/64", "bogus", "2001:db9::/64"]
    endpoints:
      ep: [www]
credentials:
  ep:
    provider: dummy
    settings: {}
"#;
        let config = Config::parse(yaml).unwrap();
        // bogus subnet is skipped; 2 macs x 2 prefixes
        assert_eq!(config.tasks["lan"].clauses().len(), 4);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert!(Config::load(&path).is_ok());
    }

    #[test]
    fn pretty_print_redacts_settings() {
        let config = Config::parse(SAMPLE).unwrap();
        let open = config.pretty_print("", false);
        assert!(open.contains("1234567890"));
        let redacted = config.pretty_print("", true);
        assert!(!redacted.contains("1234567890"));
        assert!(redacted.contains(REDACTED));
    }
}
