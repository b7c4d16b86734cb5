//! Per-hostname debounced update state machine.
//!
//! A hostname is Idle, Pending (timer armed) or Running (update in
//! flight). `schedule_update` coalesces: it cancels the armed timer and
//! the new deadline fully replaces the old one, so a storm of discovery
//! events inside one debounce window collapses into a single backend
//! update carrying the latest address set.
//!
//! Concurrency is governed by an epoch counter under the hostname's
//! mutex. Every schedule bumps the epoch; a timer that fires with a
//! stale epoch is a no-op. A timer that fires while an update is still
//! in flight defers until that call returns. The in-flight result is
//! always recorded, but a failure only arms the retry timer if no newer
//! schedule arrived meanwhile. The mutex is never held across the
//! `Service::update` await: the address set is copied out first.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::addr::AddressCollection;
use crate::service::Service;

/// Observable snapshot of a hostname's state, taken under its lock.
#[derive(Debug, Clone)]
pub struct HostnameStatus {
    /// An update is currently in flight
    pub running: bool,
    /// Time until the armed timer fires, if any
    pub next_update_in: Option<Duration>,
    /// When the last update attempt succeeded
    pub updated_at: Option<DateTime<Utc>>,
    /// Error of the last attempt, cleared on success
    pub last_error: Option<String>,
    /// The reconciled desired address set
    pub addresses: AddressCollection,
}

struct Inner {
    addresses: AddressCollection,
    /// Bumped on every schedule; timers carry the epoch they were armed
    /// under and stand down if it moved on.
    epoch: u64,
    timer: Option<JoinHandle<()>>,
    next_update_at: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
    running: bool,
    /// Epoch of a timer that fired while an update was in flight
    deferred: Option<u64>,
    last_error: Option<String>,
}

/// One (endpoint, hostname) reconciliation target.
pub struct Hostname {
    endpoint_id: String,
    name: String,
    service: Arc<dyn Service>,
    debounce: Duration,
    retry: Duration,
    inner: Mutex<Inner>,
}

impl Hostname {
    pub fn new(
        endpoint_id: impl Into<String>,
        name: impl Into<String>,
        service: Arc<dyn Service>,
        debounce: Duration,
        retry: Duration,
    ) -> Arc<Self> {
        Arc::new(Hostname {
            endpoint_id: endpoint_id.into(),
            name: name.into(),
            service,
            debounce,
            retry,
            inner: Mutex::new(Inner {
                addresses: AddressCollection::new(),
                epoch: 0,
                timer: None,
                next_update_at: None,
                updated_at: None,
                running: false,
                deferred: None,
                last_error: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fully qualified name the bound service will maintain.
    pub fn domain(&self) -> String {
        self.service.domain(&self.name)
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Copy of the currently stored address set.
    pub fn addresses(&self) -> AddressCollection {
        self.inner.lock().unwrap().addresses.clone()
    }

    pub fn status(&self) -> HostnameStatus {
        let inner = self.inner.lock().unwrap();
        let now = Instant::now();
        HostnameStatus {
            running: inner.running,
            next_update_in: inner
                .next_update_at
                .and_then(|at| at.checked_duration_since(now)),
            updated_at: inner.updated_at,
            last_error: inner.last_error.clone(),
            addresses: inner.addresses.clone(),
        }
    }

    /// Replace the stored address set and schedule a debounced update,
    /// atomically.
    pub fn store_and_schedule(self: &Arc<Self>, addresses: AddressCollection) {
        let mut inner = self.inner.lock().unwrap();
        inner.addresses = addresses;
        self.schedule_locked(&mut inner, self.debounce);
    }

    /// Arm (or re-arm) the update timer. The new deadline fully
    /// replaces any previous one.
    pub fn schedule_update(self: &Arc<Self>, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        self.schedule_locked(&mut inner, delay);
    }

    fn schedule_locked(self: &Arc<Self>, inner: &mut Inner, delay: Duration) {
        inner.epoch += 1;
        let epoch = inner.epoch;

        // A fired-but-not-yet-run timer still counts as armed; the
        // epoch check in fire() covers the abort race.
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }

        inner.next_update_at = Some(Instant::now() + delay);
        let this = Arc::clone(self);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire(epoch).await;
        }));
    }

    fn fire(self: Arc<Self>, epoch: u64) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
        let addresses = {
            let mut inner = self.inner.lock().unwrap();
            if inner.epoch != epoch {
                return;
            }
            if inner.running {
                // take effect after the in-flight call returns
                inner.deferred = Some(epoch);
                return;
            }
            inner.running = true;
            inner.timer = None;
            inner.next_update_at = None;
            inner.addresses.clone()
        };

        debug!(
            endpoint = %self.endpoint_id,
            hostname = %self.name,
            "starting update"
        );

        let result = self.service.update(&self.name, &addresses).await;

        let deferred = {
            let mut inner = self.inner.lock().unwrap();
            inner.running = false;
            match &result {
                Ok(()) => {
                    inner.updated_at = Some(Utc::now());
                    inner.last_error = None;
                    info!(
                        endpoint = %self.endpoint_id,
                        hostname = %self.name,
                        addresses = ?addresses.ip_strings(),
                        "updated"
                    );
                }
                Err(err) => {
                    inner.last_error = Some(err.to_string());
                    error!(
                        endpoint = %self.endpoint_id,
                        hostname = %self.name,
                        error = %err,
                        "update failed"
                    );
                    if inner.epoch == epoch {
                        // no newer schedule arrived during the call
                        self.schedule_locked(&mut inner, self.retry);
                    }
                }
            }
            inner
                .deferred
                .take()
                .filter(|deferred| *deferred == inner.epoch)
        };

        if let Some(epoch) = deferred {
            tokio::spawn(Arc::clone(&self).fire(epoch));
        }
        })
    }
}

impl std::fmt::Debug for Hostname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hostname")
            .field("endpoint_id", &self.endpoint_id)
            .field("name", &self.name)
            .field("debounce", &self.debounce)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
