//! # driftdns-core
//!
//! Reconciliation engine keeping DDNS records at multiple providers
//! eventually converged to the set of addresses currently held by a set
//! of machines, as published by a discovery layer.
//!
//! ```text
//! ┌───────────┐  snapshot   ┌────────────┐   store+schedule  ┌──────────┐
//! │ Discovery │───────────▶│ Reconciler │──────────────────▶│ Hostname │
//! └───────────┘            └────────────┘                    └──────────┘
//!                                 │                               │ debounced
//!                                 │ resolve                       ▼
//!                           ┌──────────┐   bound service    ┌──────────┐
//!                           │  State   │───────────────────▶│ Service  │
//!                           │   tree   │                    │ (DDNS)   │
//!                           └──────────┘                    └──────────┘
//! ```
//!
//! Backends implement [`Service`] and register a factory in a
//! [`ServiceRegistry`]; the engine never sees wire protocols. The
//! discovery layer implements [`Discovery`]; the engine never sees the
//! network it observes.

pub mod addr;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod hostname;
pub mod reconciler;
pub mod service;
pub mod state;

pub use addr::{Address, AddressCollection, MacAddr};
pub use config::Config;
pub use discovery::{AddressTable, Discovery};
pub use error::{BackendErrorKind, Error, Result};
pub use hostname::Hostname;
pub use reconciler::Reconciler;
pub use service::{fqdn, split_fqdn, Service, ServiceRegistry};
pub use state::State;
