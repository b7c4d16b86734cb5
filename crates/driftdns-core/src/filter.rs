//! Stateless address predicates.
//!
//! A task selects an address iff at least one of its clauses matches,
//! and a clause matches iff every enabled sub-check passes. Every
//! sub-check treats an empty input as "no constraint" and passes.
//! Malformed entries inside mask/prefix lists are skipped rather than
//! rejected so that configs written for newer versions keep loading.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::Deserialize;

use crate::addr::{Address, AddressCollection, MacAddr};

/// One disjunct of a task's address selector.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterClause {
    #[serde(default)]
    pub mac: MacRule,
    #[serde(default)]
    pub ip: IpRule,
    /// Discovery channels that must all have reported the address
    #[serde(default)]
    pub source: Vec<String>,
}

/// MAC-side sub-checks of a clause.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MacRule {
    /// Exact address, case-insensitive; empty means any
    #[serde(default)]
    pub address: String,
    /// `target/mask` pairs, all of which must be congruent
    #[serde(default)]
    pub mask: Vec<String>,
    /// Any of `local`, `global`, `multicast`, `unicast`
    #[serde(default, rename = "type")]
    pub kinds: Vec<String>,
}

/// IP-side sub-checks of a clause.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpRule {
    /// Any of `global`, `ula`, `link_local`, `eui64`, `random`
    #[serde(default, rename = "type")]
    pub kinds: Vec<String>,
    /// CIDR containment; unparseable means any
    #[serde(default)]
    pub prefix: String,
    /// Textual suffix on the canonical IP string
    #[serde(default)]
    pub suffix: String,
    /// `value/mask` pairs over 128 bits
    #[serde(default)]
    pub mask: Vec<String>,
}

impl FilterClause {
    /// Whether every sub-check of this clause passes for `addr`.
    pub fn matches(&self, addr: &Address) -> bool {
        check_mac(addr.hw, &self.mac.address)
            && check_mac_mask(addr.hw, &self.mac.mask)
            && check_mac_type(addr.hw, &self.mac.kinds)
            && check_ip_type(addr, &self.ip.kinds)
            && check_prefix(addr.ip, parse_prefix(&self.ip.prefix).as_ref())
            && check_suffix(addr.ip, &self.ip.suffix)
            && check_ip_mask(addr.ip, &self.ip.mask)
            && check_source(addr, &self.source)
    }

    /// Clause matching one exact MAC within one prefix; the shape the
    /// legacy `mac_address` + `subnets` task form desugars to.
    pub fn legacy(mac: Option<MacAddr>, prefix: Option<&IpNet>) -> Self {
        FilterClause {
            mac: MacRule {
                address: mac.map(|m| m.to_string()).unwrap_or_default(),
                ..MacRule::default()
            },
            ip: IpRule {
                prefix: prefix.map(|p| p.to_string()).unwrap_or_default(),
                ..IpRule::default()
            },
            source: Vec::new(),
        }
    }
}

/// Select the addresses matched by any clause. An empty clause list
/// selects nothing.
pub fn select(clauses: &[FilterClause], collection: &AddressCollection) -> AddressCollection {
    collection.filtered(|addr| clauses.iter().any(|clause| clause.matches(addr)))
}

fn parse_prefix(s: &str) -> Option<IpNet> {
    s.parse().ok()
}

/// Case-insensitive exact MAC comparison; empty filter passes.
pub fn check_mac(mac: MacAddr, filter: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    filter
        .parse::<MacAddr>()
        .map(|f| f == mac)
        .unwrap_or(false)
}

/// Bytewise congruence against every `target/mask` pair.
pub fn check_mac_mask(mac: MacAddr, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    for filter in filters {
        let Some((target, mask)) = filter.split_once('/') else {
            continue;
        };
        let (Ok(target), Ok(mask)) = (target.parse::<MacAddr>(), mask.parse::<MacAddr>()) else {
            continue;
        };
        let m = mac.octets();
        let t = target.octets();
        let k = mask.octets();
        if (0..6).any(|i| m[i] & k[i] != t[i] & k[i]) {
            return false;
        }
    }
    true
}

/// Every listed MAC kind must hold.
pub fn check_mac_type(mac: MacAddr, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    for filter in filters {
        let matched = match filter.to_ascii_lowercase().as_str() {
            "local" => mac.is_local(),
            "global" => !mac.is_local(),
            "multicast" => mac.is_multicast(),
            "unicast" => !mac.is_multicast(),
            _ => false,
        };
        if !matched {
            return false;
        }
    }
    true
}

/// Every listed IP kind must hold.
pub fn check_ip_type(addr: &Address, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    for filter in filters {
        let matched = match filter.to_ascii_lowercase().as_str() {
            "global" => is_global_unicast(addr.ip) && !is_ula(addr.ip),
            "ula" => is_ula(addr.ip),
            "link_local" => is_link_local(addr.ip),
            "eui64" => is_eui64(addr),
            "random" => !is_eui64(addr),
            _ => false,
        };
        if !matched {
            return false;
        }
    }
    true
}

/// CIDR containment; no prefix passes.
pub fn check_prefix(ip: IpAddr, prefix: Option<&IpNet>) -> bool {
    match prefix {
        Some(net) => net.contains(&ip),
        None => true,
    }
}

/// Textual suffix on the canonical IP string; empty passes. Operator
/// convenience, not semantic.
pub fn check_suffix(ip: IpAddr, suffix: &str) -> bool {
    suffix.is_empty() || ip.to_string().ends_with(suffix)
}

/// Bytewise congruence over 128 bits against every `value/mask` pair.
/// IPv4 addresses never match a non-empty mask list.
pub fn check_ip_mask(ip: IpAddr, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let IpAddr::V6(ip6) = ip else {
        return false;
    };
    let bytes = ip6.octets();
    for filter in filters {
        let Some((value, mask)) = filter.split_once('/') else {
            continue;
        };
        let (Ok(IpAddr::V6(value)), Ok(IpAddr::V6(mask))) =
            (value.parse::<IpAddr>(), mask.parse::<IpAddr>())
        else {
            continue;
        };
        let v = value.octets();
        let k = mask.octets();
        if (0..16).any(|i| bytes[i] & k[i] != v[i] & k[i]) {
            return false;
        }
    }
    true
}

/// Every listed discovery channel must appear in the address's sources.
pub fn check_source(addr: &Address, filters: &[String]) -> bool {
    filters.iter().all(|f| addr.sources.contains(f))
}

fn is_ula(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V6(v6) => v6.octets()[0] & 0xfe == 0xfc,
        IpAddr::V4(_) => false,
    }
}

fn is_link_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V6(v6) => v6.octets()[0] == 0xfe && v6.octets()[1] & 0xc0 == 0x80,
        IpAddr::V4(v4) => v4.is_link_local(),
    }
}

fn is_global_unicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V6(v6) => {
            !v6.is_loopback()
                && !v6.is_unspecified()
                && !v6.is_multicast()
                && !is_link_local(ip)
        }
        IpAddr::V4(v4) => {
            !v4.is_loopback()
                && !v4.is_unspecified()
                && !v4.is_multicast()
                && !v4.is_broadcast()
                && !v4.is_link_local()
        }
    }
}

/// Whether the interface identifier equals the EUI-64 derivation from
/// the address's MAC.
fn is_eui64(addr: &Address) -> bool {
    let IpAddr::V6(v6) = addr.ip else {
        return false;
    };
    v6.octets()[8..] == addr.hw.eui64_interface_id()
}
