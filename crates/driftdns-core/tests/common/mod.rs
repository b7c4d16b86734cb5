//! Test doubles shared by the engine contract tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use driftdns_core::addr::{Address, AddressCollection, MacAddr};
use driftdns_core::discovery::{AddressTable, Discovery};
use driftdns_core::error::{Error, Result};
use driftdns_core::service::{fqdn, Service, ServiceRegistry};
use driftdns_core::{Config, Reconciler};

/// A service double that records every update and can be told to fail
/// or stall.
pub struct MockService {
    update_calls: AtomicUsize,
    updates: Mutex<Vec<(String, Vec<String>)>>,
    /// Number of upcoming calls that should fail
    fail_next: AtomicUsize,
    /// Artificial latency inside `update`
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(MockService {
            update_calls: AtomicUsize::new(0),
            updates: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// `(hostname, sorted ip strings)` per completed call, in order.
    pub fn updates(&self) -> Vec<(String, Vec<String>)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn fail_next(&self, calls: usize) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for MockService {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.updates
            .lock()
            .unwrap()
            .push((hostname.to_string(), addresses.ip_strings()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::backend_transient("mock", "injected failure"));
        }
        Ok(())
    }

    fn domain(&self, hostname: &str) -> String {
        fqdn(hostname, "example.com")
    }

    fn pretty_print(&self, _prefix: &str) -> String {
        String::new()
    }
}

/// Discovery double whose snapshot always fails.
pub struct UnavailableDiscovery;

impl Discovery for UnavailableDiscovery {
    fn snapshot(&self) -> Result<AddressCollection> {
        Err(Error::discovery("injected outage"))
    }
}

/// A discovered address with an hour of lifetime.
pub fn address(mac: &str, ip: &str) -> Address {
    Address::new(
        mac.parse::<MacAddr>().unwrap(),
        ip.parse().unwrap(),
        Duration::from_secs(3600),
        Some("test"),
    )
}

pub fn collection(entries: &[(&str, &str)]) -> AddressCollection {
    entries.iter().map(|(mac, ip)| address(mac, ip)).collect()
}

/// Registry with a single `mock` provider resolving to `service`.
pub fn mock_registry(service: &Arc<MockService>) -> ServiceRegistry {
    let registry = ServiceRegistry::new();
    let service = Arc::clone(service);
    registry.register(
        "mock",
        Box::new(move |_settings| Ok(Arc::clone(&service) as Arc<dyn Service>)),
    );
    registry
}

/// One task (`lan`) maintaining `www` at one mock endpoint (`ep`).
pub fn single_target_config(debounce: &str, retry: &str) -> Config {
    Config::parse(&format!(
        r#"
tasks:
  lan:
    mac_address: ["00:11:22:33:44:55"]
    subnets: ["2001:db8::/64"]
    endpoints:
      ep: [www]
credentials:
  ep:
    provider: mock
    debounce_time: {debounce}
    retry_time: {retry}
    settings: {{}}
"#
    ))
    .expect("test config parses")
}

/// Reconciler over a fresh table and the mock service.
pub fn reconciler(
    config: Config,
    service: &Arc<MockService>,
) -> (Arc<Reconciler>, Arc<AddressTable>) {
    let table = Arc::new(AddressTable::new());
    let registry = mock_registry(service);
    let reconciler = Reconciler::new(config, Arc::clone(&table) as Arc<dyn Discovery>, &registry)
        .expect("reconciler construction succeeds");
    (Arc::new(reconciler), table)
}

/// Let spawned timer/update tasks make progress without advancing the
/// clock.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time and let tasks run.
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}
