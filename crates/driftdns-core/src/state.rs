//! The provider → endpoint → hostname registry.
//!
//! Every level guards only its own child map with a reader/writer
//! lock; node handles are `Arc`s that stay stable for process lifetime,
//! so child mutation never holds a parent lock. Locks are always taken
//! top-down, never the reverse.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::REDACTED;
use crate::hostname::Hostname;
use crate::service::Service;

/// Root of the state tree.
#[derive(Default)]
pub struct State {
    providers: RwLock<BTreeMap<String, Arc<Provider>>>,
}

/// All endpoints configured against one DDNS provider.
#[derive(Default)]
pub struct Provider {
    endpoints: RwLock<BTreeMap<String, Arc<Endpoint>>>,
}

/// One configured credential/target at a provider. The service binding
/// is immutable after construction.
pub struct Endpoint {
    id: String,
    service: Arc<dyn Service>,
    hostnames: RwLock<BTreeMap<String, Arc<Hostname>>>,
}

impl State {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Look up or create the node for `provider_name`.
    pub fn provider(&self, provider_name: &str) -> Arc<Provider> {
        let mut providers = self.providers.write().unwrap();
        Arc::clone(
            providers
                .entry(provider_name.to_string())
                .or_insert_with(|| Arc::new(Provider::default())),
        )
    }

    /// Render the whole tree; read locks are taken strictly top-down.
    pub fn pretty_print(&self, prefix: &str, redact: bool) -> String {
        let mut out = String::new();
        writeln!(out, "{prefix}DNS:").ok();

        let providers = self.providers.read().unwrap();
        for (provider_name, provider) in providers.iter() {
            writeln!(out, "{prefix}    Provider: {provider_name}").ok();

            let endpoints = provider.endpoints.read().unwrap();
            for (endpoint_id, endpoint) in endpoints.iter() {
                writeln!(out, "{prefix}        Endpoint: {endpoint_id}").ok();
                if !redact {
                    out.push_str(&endpoint.service.pretty_print(&format!("{prefix}            ")));
                }

                let hostnames = endpoint.hostnames.read().unwrap();
                for hostname in hostnames.values() {
                    write!(out, "{prefix}            {}:", hostname.domain()).ok();

                    let status = hostname.status();
                    if status.running {
                        out.push_str(" (update running)");
                    }
                    if let Some(in_) = status.next_update_in {
                        write!(out, " (next update: {}s)", in_.as_secs()).ok();
                    }
                    if let Some(at) = status.updated_at {
                        write!(out, " (last update: {})", at.to_rfc3339()).ok();
                    }
                    if let Some(err) = &status.last_error {
                        if redact {
                            write!(out, " (last update error: {REDACTED})").ok();
                        } else {
                            write!(out, " (last update error: {err})").ok();
                        }
                    }

                    let body = status.addresses.pretty_print(&format!("{prefix}                "));
                    if body.is_empty() {
                        out.push('\n');
                    } else {
                        out.push_str(&body);
                    }
                }
            }
        }

        out
    }
}

impl Provider {
    /// Look up or create the endpoint node for `id`, binding `service`
    /// on first sight.
    pub fn endpoint(&self, id: &str, service: &Arc<dyn Service>) -> Arc<Endpoint> {
        let mut endpoints = self.endpoints.write().unwrap();
        Arc::clone(endpoints.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Endpoint {
                id: id.to_string(),
                service: Arc::clone(service),
                hostnames: RwLock::new(BTreeMap::new()),
            })
        }))
    }
}

impl Endpoint {
    /// Look up or create the hostname node for `name`.
    pub fn hostname(&self, name: &str, debounce: Duration, retry: Duration) -> Arc<Hostname> {
        let mut hostnames = self.hostnames.write().unwrap();
        Arc::clone(hostnames.entry(name.to_string()).or_insert_with(|| {
            Hostname::new(&self.id, name, Arc::clone(&self.service), debounce, retry)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddressCollection;
    use crate::error::Result;
    use async_trait::async_trait;

    struct NullService;

    #[async_trait]
    impl Service for NullService {
        async fn update(&self, _hostname: &str, _addresses: &AddressCollection) -> Result<()> {
            Ok(())
        }

        fn domain(&self, hostname: &str) -> String {
            crate::service::fqdn(hostname, "example.com")
        }

        fn pretty_print(&self, _prefix: &str) -> String {
            String::new()
        }
    }

    #[tokio::test]
    async fn nodes_are_created_once_and_stable() {
        let state = State::new();
        let service: Arc<dyn Service> = Arc::new(NullService);

        let provider_a = state.provider("cloudflare");
        let provider_b = state.provider("cloudflare");
        assert!(Arc::ptr_eq(&provider_a, &provider_b));

        let endpoint_a = provider_a.endpoint("main", &service);
        let endpoint_b = provider_b.endpoint("main", &service);
        assert!(Arc::ptr_eq(&endpoint_a, &endpoint_b));

        let d = Duration::from_secs(10);
        let r = Duration::from_secs(60);
        let host_a = endpoint_a.hostname("www", d, r);
        let host_b = endpoint_b.hostname("www", d, r);
        assert!(Arc::ptr_eq(&host_a, &host_b));
    }

    #[tokio::test]
    async fn pretty_print_walks_sorted_tree() {
        let state = State::new();
        let service: Arc<dyn Service> = Arc::new(NullService);

        let provider = state.provider("cloudflare");
        let endpoint = provider.endpoint("main", &service);
        endpoint.hostname("www", Duration::from_secs(10), Duration::from_secs(60));

        let rendered = state.pretty_print("", false);
        assert!(rendered.contains("DNS:"));
        assert!(rendered.contains("Provider: cloudflare"));
        assert!(rendered.contains("Endpoint: main"));
        assert!(rendered.contains("www.example.com:"));
    }
}
