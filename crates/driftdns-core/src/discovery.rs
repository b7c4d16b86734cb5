//! Contract with the discovery layer.
//!
//! The engine never talks to the network to learn addresses; it
//! consumes a read-only snapshot published by an external discovery
//! collaborator. [`AddressTable`] is the in-memory implementation that
//! discovery adapters (and tests) feed.

use std::sync::RwLock;

use ipnet::IpNet;

use crate::addr::{Address, AddressCollection, MacAddr};
use crate::error::Result;
use crate::filter;

/// Read-only view of the current live address set.
pub trait Discovery: Send + Sync {
    /// The current address table with lifetimes. Safe to call from the
    /// reconciler at any time.
    fn snapshot(&self) -> Result<AddressCollection>;

    /// Convenience for the legacy selector: addresses whose MAC is in
    /// `macs` and whose IP is inside one of `prefixes`. Empty lists
    /// mean "any".
    fn filter(&self, macs: &[MacAddr], prefixes: &[IpNet]) -> Result<AddressCollection> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.filtered(|addr| {
            (macs.is_empty() || macs.contains(&addr.hw))
                && (prefixes.is_empty()
                    || prefixes.iter().any(|p| filter::check_prefix(addr.ip, Some(p))))
        }))
    }
}

/// Shared in-memory address table.
///
/// Writers call [`seen`] as addresses are observed; readers get a
/// validity-filtered snapshot. Expired entries are dropped on read, so
/// no sweeper task is needed.
///
/// [`seen`]: AddressTable::seen
#[derive(Default)]
pub struct AddressTable {
    entries: RwLock<AddressCollection>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting, inserting or refreshing the entry.
    pub fn seen(&self, address: Address) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(address);
    }

    /// Replace the whole table.
    pub fn replace(&self, collection: AddressCollection) {
        *self.entries.write().unwrap() = collection;
    }

    /// Current live entries (expired ones dropped).
    pub fn collection(&self) -> AddressCollection {
        self.entries.read().unwrap().filter_valid()
    }
}

impl Discovery for AddressTable {
    fn snapshot(&self) -> Result<AddressCollection> {
        Ok(self.collection())
    }
}
