//! No-proxy rule set
//!
//! User-supplied `no_proxy` entries are classified into three collections:
//! literal IPv4 addresses, CIDR networks, and DNS zone suffixes. Zone
//! suffixes decide which DNS queries bypass the synthetic pool and go to
//! the private resolvers; the IP and CIDR collections answer destination
//! address membership tests. The upstream proxy's own host is always added
//! to the zone set so the proxy never tries to tunnel to itself.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tracing::info;

/// Classified no-proxy rules
#[derive(Debug, Default, Clone)]
pub struct NoProxy {
    ips: HashSet<Ipv4Addr>,
    cidrs: Vec<Ipv4Net>,
    zones: Vec<String>,
}

impl NoProxy {
    /// Build the rule set from raw configuration items
    ///
    /// Each item is tried as a literal IPv4 address, then as a CIDR, and
    /// otherwise taken as a DNS zone suffix. Empty items are skipped.
    #[must_use]
    pub fn from_items(items: &[String]) -> Self {
        let mut rules = Self::default();

        for item in items {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if let Ok(ip) = item.parse::<Ipv4Addr>() {
                rules.ips.insert(ip);
            } else if let Ok(net) = item.parse::<Ipv4Net>() {
                rules.cidrs.push(net);
            } else {
                rules.push_zone(item);
            }
        }

        rules
    }

    /// Add a DNS zone suffix, normalising it to end with a trailing dot
    pub fn push_zone(&mut self, zone: &str) {
        let zone = normalize_zone(zone);
        if !zone.is_empty() && zone != "." && !self.zones.contains(&zone) {
            self.zones.push(zone);
        }
    }

    /// Check whether a query name falls inside a no-proxy zone
    ///
    /// The name is expected in wire form (trailing dot). Matching is a
    /// case-insensitive, dot-aligned suffix test: `host.corp.local.`
    /// matches zone `corp.local.` but `notcorp.local.` does not.
    #[must_use]
    pub fn matches_zone(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.zones.iter().any(|zone| {
            name.len() >= zone.len()
                && name.ends_with(zone.as_str())
                && (name.len() == zone.len()
                    || name.as_bytes()[name.len() - zone.len() - 1] == b'.'
                    || zone.as_bytes()[0] == b'.')
        })
    }

    /// Check whether a destination address matches the IP or CIDR rules
    #[must_use]
    pub fn contains_ip(&self, ip: Ipv4Addr) -> bool {
        self.ips.contains(&ip) || self.cidrs.iter().any(|net| net.contains(&ip))
    }

    /// Configured zone suffixes, dot-normalised
    #[must_use]
    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    /// Check whether any rule is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.cidrs.is_empty() && self.zones.is_empty()
    }

    /// Log the effective zone list at startup
    pub fn log_zones(&self) {
        info!(zones = ?self.zones, "no-proxy zones");
    }
}

/// Normalise a zone suffix: lowercase with a trailing dot
fn normalize_zone(zone: &str) -> String {
    let mut zone = zone.trim().to_ascii_lowercase();
    if !zone.is_empty() && !zone.ends_with('.') {
        zone.push('.');
    }
    zone
}
