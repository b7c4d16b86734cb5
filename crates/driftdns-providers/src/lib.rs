//! # driftdns-providers
//!
//! DDNS backend adapters for the driftdns engine. Every adapter
//! implements `driftdns_core::Service` and follows the same
//! diff-and-apply skeleton:
//!
//! 1. fetch the backend's A/AAAA records under the target name,
//! 2. build `current: ip → record(s)` and `desired: ip → A|AAAA`,
//! 3. create what is missing, delete what is obsolete (including
//!    duplicate records for a kept IP),
//! 4. converge TTL/proxied where the backend exposes them,
//! 5. on stateful backends, commit/reconfigure once, and only when
//!    something actually changed.
//!
//! Adapters never retry and never spawn background work; the engine
//! owns scheduling and retry.

use driftdns_core::ServiceRegistry;

pub mod cloudflare;
pub mod duckdns;
pub mod dummy;
pub mod gravity;
pub mod mikrotik;
pub mod openwrt;
pub mod opnsense;
pub mod pfsense;
pub mod route53;
pub mod technitium;
pub mod windows;

mod http;
mod ssh;

/// Register every built-in provider. Called once during startup,
/// before the reconciler is constructed.
pub fn register_builtin(registry: &ServiceRegistry) {
    cloudflare::register(registry);
    duckdns::register(registry);
    dummy::register(registry);
    gravity::register(registry);
    mikrotik::register(registry);
    openwrt::register(registry);
    opnsense::register(registry);
    pfsense::register(registry);
    route53::register(registry);
    technitium::register(registry);
    windows::register(registry);
}
