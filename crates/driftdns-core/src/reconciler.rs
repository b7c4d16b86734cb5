//! The reconciler: periodically compares the declared tasks against
//! the discovery snapshot and drives the per-hostname state machines.
//!
//! Services for every referenced endpoint are built up front so that a
//! missing provider or rejected settings fail before the loop starts;
//! tree nodes themselves still appear lazily on first scan and are
//! never deleted. A scan with an unchanged snapshot writes nothing.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::addr::{Address, MacAddr};
use crate::config::{Config, Ipv4HandlerConfig};
use crate::discovery::{AddressTable, Discovery};
use crate::error::Result;
use crate::filter;
use crate::service::{Service, ServiceRegistry};
use crate::state::State;

const SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Long-lived reconciliation worker.
pub struct Reconciler {
    state: Arc<State>,
    discovery: Arc<dyn Discovery>,
    config: Config,
    /// endpoint id → service, built at construction
    services: HashMap<String, Arc<dyn Service>>,
    /// task name → collection fed by that task's IPv4 handler
    ipv4_tables: HashMap<String, Arc<AddressTable>>,
}

impl Reconciler {
    /// Build the reconciler, instantiating a service for every endpoint
    /// referenced by the configuration. Unknown providers and rejected
    /// settings are fatal here, before anything runs.
    pub fn new(
        config: Config,
        discovery: Arc<dyn Discovery>,
        registry: &ServiceRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let mut services: HashMap<String, Arc<dyn Service>> = HashMap::new();
        for task in config.tasks.values() {
            for endpoint_id in task.endpoints.keys() {
                if services.contains_key(endpoint_id) {
                    continue;
                }
                let credential = &config.credentials[endpoint_id];
                let service = registry.create(&credential.provider, &credential.settings)?;
                services.insert(endpoint_id.clone(), service);
            }
        }

        let ipv4_tables = config
            .tasks
            .iter()
            .filter(|(_, task)| task.ipv4.is_some())
            .map(|(name, _)| (name.clone(), Arc::new(AddressTable::new())))
            .collect();

        Ok(Reconciler {
            state: State::new(),
            discovery,
            config,
            services,
            ipv4_tables,
        })
    }

    pub fn state(&self) -> Arc<State> {
        Arc::clone(&self.state)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Spawn the IPv4 handler tasks and the scan loop.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        for (task_name, task) in &self.config.tasks {
            let Some(handler) = &task.ipv4 else { continue };
            let table = Arc::clone(&self.ipv4_tables[task_name]);
            tokio::spawn(run_ipv4_handler(handler.clone(), table));
        }

        tokio::spawn(async move {
            loop {
                self.scan();
                tokio::time::sleep(SCAN_INTERVAL).await;
            }
        })
    }

    /// One reconciliation pass. Idempotent for an unchanged snapshot.
    pub fn scan(&self) {
        let snapshot = match self.discovery.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                // retried on the next tick, no state change
                warn!(error = %err, "discovery snapshot failed, skipping scan");
                return;
            }
        };

        for (task_name, task) in &self.config.tasks {
            let clauses = task.clauses();
            for (endpoint_id, hostnames) in &task.endpoints {
                let credential = &self.config.credentials[endpoint_id];
                let provider = self.state.provider(&credential.provider);
                let endpoint = provider.endpoint(endpoint_id, &self.services[endpoint_id]);

                for hostname_key in hostnames {
                    let hostname = endpoint.hostname(
                        hostname_key,
                        credential.debounce_time,
                        credential.retry_time,
                    );

                    let mut candidate = filter::select(&clauses, &snapshot);
                    if let Some(table) = self.ipv4_tables.get(task_name) {
                        candidate.join(&table.collection());
                    }

                    if candidate.filter_valid() != hostname.addresses().filter_valid() {
                        debug!(
                            endpoint = %endpoint_id,
                            hostname = %hostname_key,
                            addresses = ?candidate.ip_strings(),
                            "address set changed, scheduling update"
                        );
                        hostname.store_and_schedule(candidate);
                    }
                }
            }
        }
    }

    /// Render engine state, the discovery table and the configuration.
    pub fn pretty_print(&self, prefix: &str, redact: bool) -> String {
        let mut out = String::new();
        out.push_str(&self.state.pretty_print(prefix, redact));
        writeln!(out, "{prefix}Discovered:").ok();
        match self.discovery.snapshot() {
            Ok(snapshot) => {
                let body = snapshot.pretty_print(&format!("{prefix}    "));
                if body.is_empty() {
                    writeln!(out, "{prefix}    (none)").ok();
                } else {
                    out.push_str(body.trim_start_matches('\n'));
                }
            }
            Err(err) => {
                writeln!(out, "{prefix}    unavailable: {err}").ok();
            }
        }
        out.push_str(&self.config.pretty_print(prefix, redact));
        out
    }
}

/// Run a task's IPv4 handler: execute the command on its interval,
/// parse one address per output line and feed the table.
async fn run_ipv4_handler(config: Ipv4HandlerConfig, table: Arc<AddressTable>) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        run_ipv4_command(&config, &table).await;
    }
}

async fn run_ipv4_command(config: &Ipv4HandlerConfig, table: &AddressTable) {
    let timeout = config.interval.saturating_sub(Duration::from_secs(1));
    debug!(command = %config.command, args = ?config.args, ?timeout, "running IPv4 handler");

    let mut command = tokio::process::Command::new(&config.command);
    command
        .args(&config.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => {
            error!(command = %config.command, "IPv4 handler command timed out");
            return;
        }
        Ok(Err(err)) => {
            error!(command = %config.command, error = %err, "IPv4 handler command failed");
            return;
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        error!(
            command = %config.command,
            status = %output.status,
            stderr = %String::from_utf8_lossy(&output.stderr),
            "IPv4 handler command exited with failure"
        );
        return;
    }

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<IpAddr>() {
            Ok(ip) => {
                debug!(%ip, "IPv4 handler resolved address");
                table.seen(Address::new(MacAddr::ZERO, ip, config.lifetime, Some("ipv4")));
            }
            Err(err) => {
                error!(command = %config.command, line, error = %err, "unparseable IPv4 handler output");
            }
        }
    }
}
