//! Address data model: hardware addresses, discovered addresses and the
//! ordered collections the engine diffs against backend state.
//!
//! An [`Address`] is produced by the discovery layer and treated as
//! immutable by the engine. An [`AddressCollection`] is an ordered set
//! keyed by `(ip, zone, hw)`; equality is set equality, independent of
//! insertion order, with duplicates collapsed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::Error;

/// A 48-bit hardware (MAC) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// The all-zero address, used for entries without a known NIC
    /// (e.g. externally resolved IPv4 addresses).
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn new(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Locally administered bit (bit 1 of the first octet).
    pub fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Group bit (bit 0 of the first octet).
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// EUI-64 interface identifier: first three octets, `ff:fe`, last
    /// three octets, with the U/L bit flipped.
    pub fn eui64_interface_id(&self) -> [u8; 8] {
        let m = self.0;
        [m[0] ^ 0x02, m[1], m[2], 0xff, 0xfe, m[3], m[4], m[5]]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`, case
    /// insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sep = if s.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() != 6 {
            return Err(Error::invalid_address(format!("bad MAC address: {s}")));
        }
        let mut octets = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            octets[i] = u8::from_str_radix(part, 16)
                .map_err(|_| Error::invalid_address(format!("bad MAC address: {s}")))?;
        }
        Ok(MacAddr(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Identity of an address within a collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AddressKey {
    pub ip: IpAddr,
    pub zone: Option<String>,
    pub hw: MacAddr,
}

/// A single discovered address.
#[derive(Debug, Clone)]
pub struct Address {
    /// Hardware address the IP was observed on
    pub hw: MacAddr,
    /// The network address itself
    pub ip: IpAddr,
    /// Interface label for scoped addresses
    pub zone: Option<String>,
    /// Discovery channels that reported this address
    pub sources: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// How long after `last_seen` the entry stays valid
    pub lifetime: Duration,
}

impl Address {
    pub fn new(hw: MacAddr, ip: IpAddr, lifetime: Duration, source: Option<&str>) -> Self {
        let now = Utc::now();
        let mut sources = BTreeSet::new();
        if let Some(s) = source {
            sources.insert(s.to_string());
        }
        Address {
            hw,
            ip,
            zone: None,
            sources,
            first_seen: now,
            last_seen: now,
            lifetime,
        }
    }

    /// Builder-style zone label for link-local entries.
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn key(&self) -> AddressKey {
        AddressKey {
            ip: self.ip,
            zone: self.zone.clone(),
            hw: self.hw,
        }
    }

    /// Whether the entry is still within its lifetime.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.lifetime) {
            Ok(lt) => self.last_seen + lt >= now,
            Err(_) => true,
        }
    }

    /// Record another sighting from `source`.
    pub fn seen(&mut self, source: &str) {
        self.last_seen = Utc::now();
        self.sources.insert(source.to_string());
    }

    /// The canonical, zone-less textual form used on the wire.
    pub fn ip_string(&self) -> String {
        self.ip.to_string()
    }
}

/// Ordered set of [`Address`]es keyed by `(ip, zone, hw)`.
///
/// Two collections compare equal iff they hold the same key set,
/// regardless of insertion order; sighting metadata does not take part
/// in equality.
#[derive(Debug, Clone, Default)]
pub struct AddressCollection {
    entries: BTreeMap<AddressKey, Address>,
}

impl AddressCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or refresh an address. An existing entry keeps its
    /// `first_seen`, extends `last_seen`/`lifetime` and merges sources.
    pub fn insert(&mut self, addr: Address) {
        match self.entries.get_mut(&addr.key()) {
            Some(existing) => {
                if addr.last_seen > existing.last_seen {
                    existing.last_seen = addr.last_seen;
                    existing.lifetime = addr.lifetime;
                }
                existing.sources.extend(addr.sources);
            }
            None => {
                self.entries.insert(addr.key(), addr);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.entries.values()
    }

    /// Only IPv4 entries.
    pub fn filter4(&self) -> Self {
        self.filtered(|a| a.ip.is_ipv4())
    }

    /// Only IPv6 entries.
    pub fn filter6(&self) -> Self {
        self.filtered(|a| a.ip.is_ipv6())
    }

    /// Drop entries whose lifetime has expired.
    pub fn filter_valid(&self) -> Self {
        let now = Utc::now();
        self.filtered(|a| a.is_valid_at(now))
    }

    /// New collection with the entries matching `pred`.
    pub fn filtered(&self, pred: impl Fn(&Address) -> bool) -> Self {
        AddressCollection {
            entries: self
                .entries
                .iter()
                .filter(|(_, a)| pred(a))
                .map(|(k, a)| (k.clone(), a.clone()))
                .collect(),
        }
    }

    /// Union `other` into this collection.
    pub fn join(&mut self, other: &AddressCollection) {
        for addr in other.iter() {
            self.insert(addr.clone());
        }
    }

    /// Deduplicated, sorted zone-less IP strings; what backends put on
    /// the wire.
    pub fn ip_strings(&self) -> Vec<String> {
        let set: BTreeSet<String> = self.entries.values().map(|a| a.ip_string()).collect();
        set.into_iter().collect()
    }

    /// Deduplicated IPs in collection order.
    pub fn ips(&self) -> Vec<IpAddr> {
        let set: BTreeSet<IpAddr> = self.entries.values().map(|a| a.ip).collect();
        set.into_iter().collect()
    }

    /// Grouped rendering: one line per IP, annotated with the NIC it
    /// was seen from and the zones it was seen over.
    pub fn pretty_print(&self, prefix: &str) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let mut last_ip: Option<IpAddr> = None;
        let mut last_hw: Option<MacAddr> = None;
        for addr in self.entries.values() {
            if last_ip != Some(addr.ip) {
                write!(out, "\n{prefix}[{}]", addr.ip).ok();
                last_ip = Some(addr.ip);
                last_hw = None;
            }
            if last_hw != Some(addr.hw) {
                write!(out, " from {} seen over", addr.hw).ok();
                last_hw = Some(addr.hw);
            }
            write!(out, " {}", addr.zone.as_deref().unwrap_or("-")).ok();
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

impl PartialEq for AddressCollection {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.keys().zip(other.entries.keys()).all(|(a, b)| a == b)
    }
}

impl Eq for AddressCollection {}

impl FromIterator<Address> for AddressCollection {
    fn from_iter<T: IntoIterator<Item = Address>>(iter: T) -> Self {
        let mut coll = AddressCollection::new();
        for addr in iter {
            coll.insert(addr);
        }
        coll
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(mac: &str, ip: &str) -> Address {
        Address::new(
            mac.parse().unwrap(),
            ip.parse().unwrap(),
            Duration::from_secs(3600),
            Some("test"),
        )
    }

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddr = "00:11:22:AA:BB:cc".parse().unwrap();
        assert_eq!(mac.to_string(), "00:11:22:aa:bb:cc");
        let dashed: MacAddr = "00-11-22-aa-bb-cc".parse().unwrap();
        assert_eq!(mac, dashed);
        assert!("00:11:22".parse::<MacAddr>().is_err());
        assert!("zz:11:22:aa:bb:cc".parse::<MacAddr>().is_err());
    }

    #[test]
    fn mac_type_bits() {
        let global: MacAddr = "00:11:22:33:44:55".parse().unwrap();
        assert!(!global.is_local());
        assert!(!global.is_multicast());
        let local: MacAddr = "02:11:22:33:44:55".parse().unwrap();
        assert!(local.is_local());
        let multicast: MacAddr = "01:00:5e:00:00:01".parse().unwrap();
        assert!(multicast.is_multicast());
    }

    #[test]
    fn collection_set_equality_ignores_order() {
        let mut a = AddressCollection::new();
        a.insert(addr("00:11:22:33:44:55", "2001:db8::1"));
        a.insert(addr("00:11:22:33:44:55", "2001:db8::2"));

        let mut b = AddressCollection::new();
        b.insert(addr("00:11:22:33:44:55", "2001:db8::2"));
        b.insert(addr("00:11:22:33:44:55", "2001:db8::1"));

        assert_eq!(a, b);

        b.insert(addr("00:11:22:33:44:55", "2001:db8::3"));
        assert_ne!(a, b);
    }

    #[test]
    fn collection_collapses_duplicates() {
        let mut coll = AddressCollection::new();
        let mut first = addr("00:11:22:33:44:55", "2001:db8::1");
        first.sources.insert("ndp".into());
        coll.insert(first);
        let mut second = addr("00:11:22:33:44:55", "2001:db8::1");
        second.sources.insert("arp".into());
        coll.insert(second);

        assert_eq!(coll.len(), 1);
        let merged = coll.iter().next().unwrap();
        assert!(merged.sources.contains("ndp"));
        assert!(merged.sources.contains("arp"));
    }

    #[test]
    fn filter_valid_drops_expired() {
        let mut coll = AddressCollection::new();
        let mut stale = addr("00:11:22:33:44:55", "2001:db8::1");
        stale.last_seen = Utc::now() - chrono::Duration::hours(2);
        stale.lifetime = Duration::from_secs(60);
        coll.insert(stale);
        coll.insert(addr("00:11:22:33:44:55", "2001:db8::2"));

        let valid = coll.filter_valid();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid.ip_strings(), vec!["2001:db8::2".to_string()]);
    }

    #[test]
    fn filter_families() {
        let mut coll = AddressCollection::new();
        coll.insert(addr("00:11:22:33:44:55", "192.0.2.7"));
        coll.insert(addr("00:11:22:33:44:55", "2001:db8::1"));

        assert_eq!(coll.filter4().len(), 1);
        assert_eq!(coll.filter6().len(), 1);
        assert!(coll.filter4().iter().next().unwrap().ip.is_ipv4());
    }

    #[test]
    fn join_is_union() {
        let mut a = AddressCollection::new();
        a.insert(addr("00:11:22:33:44:55", "2001:db8::1"));
        let mut b = AddressCollection::new();
        b.insert(addr("00:11:22:33:44:55", "2001:db8::1"));
        b.insert(addr("00:11:22:33:44:55", "2001:db8::2"));

        a.join(&b);
        assert_eq!(a.len(), 2);
    }
}
