//! Synthetic loopback address pool
//!
//! This module manages the allocation of synthetic loopback addresses for
//! intercepted domains. The pool is a bounded ring over a configured range
//! inside `127.0.0.0/8`: allocation walks a cursor forward, wraps back to
//! the start of the range, and silently overwrites the binding that
//! previously occupied a slot. Both directions of the domain/IP mapping are
//! kept consistent under a single mutex.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use parking_lot::Mutex;

use crate::error::ConfigError;

/// Network address of the loopback block, never handed out
const LOOPBACK_NETWORK: u32 = u32::from_be_bytes([127, 0, 0, 0]);

/// Broadcast address of the loopback block, never handed out
const LOOPBACK_BROADCAST: u32 = u32::from_be_bytes([127, 255, 255, 255]);

/// An inclusive range of synthetic loopback addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    /// First address of the range
    pub start: Ipv4Addr,
    /// Last address of the range
    pub end: Ipv4Addr,
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Parse a `"startIP-endIP"` string into a validated [`IpRange`]
///
/// Both addresses must lie inside `127.0.0.0/8`, must not be the network
/// or broadcast address of that block, and the start must be strictly
/// below the end.
///
/// # Errors
///
/// Returns `ConfigError::InvalidIpRange` describing the first violated
/// constraint.
pub fn parse_ip_range(s: &str) -> Result<IpRange, ConfigError> {
    let mut parts = s.splitn(2, '-');
    let (start_str, end_str) = match (parts.next(), parts.next()) {
        (Some(a), Some(b)) => (a.trim(), b.trim()),
        _ => {
            return Err(ConfigError::ip_range(s, "expected 'startIP-endIP'"));
        }
    };

    let start: Ipv4Addr = start_str
        .parse()
        .map_err(|_| ConfigError::ip_range(s, format!("invalid start address '{start_str}'")))?;
    let end: Ipv4Addr = end_str
        .parse()
        .map_err(|_| ConfigError::ip_range(s, format!("invalid end address '{end_str}'")))?;

    if start.octets()[0] != 127 || end.octets()[0] != 127 {
        return Err(ConfigError::ip_range(
            s,
            "range must lie inside 127.0.0.0/8",
        ));
    }

    let start_u32 = u32::from(start);
    let end_u32 = u32::from(end);

    if start_u32 == LOOPBACK_NETWORK || end_u32 == LOOPBACK_BROADCAST {
        return Err(ConfigError::ip_range(
            s,
            "range must exclude 127.0.0.0 and 127.255.255.255",
        ));
    }

    if start_u32 >= end_u32 {
        return Err(ConfigError::ip_range(s, "start must be below end"));
    }

    Ok(IpRange { start, end })
}

/// Mutable pool state, guarded by a single mutex
#[derive(Debug)]
struct PoolState {
    /// Last address handed out, as a 32-bit integer
    cursor: u32,
    /// Reverse mapping consulted on every accepted connection
    domain_of_ip: HashMap<u32, String>,
    /// Forward mapping consulted on every public query
    ip_of_domain: HashMap<String, u32>,
}

/// Synthetic loopback address pool with ring allocation
///
/// The pool hands out addresses `start+1, start+2, ... end`, then wraps to
/// `start` and keeps walking. A wrap that lands on an occupied slot evicts
/// the older binding from both maps, so forward and reverse lookups always
/// agree.
#[derive(Debug)]
pub struct LoopbackPool {
    start: u32,
    end: u32,
    state: Mutex<PoolState>,
}

impl LoopbackPool {
    /// Create a new pool over the given range
    #[must_use]
    pub fn new(range: IpRange) -> Self {
        let start = u32::from(range.start);
        Self {
            start,
            end: u32::from(range.end),
            state: Mutex::new(PoolState {
                cursor: start,
                domain_of_ip: HashMap::new(),
                ip_of_domain: HashMap::new(),
            }),
        }
    }

    /// Resolve a domain to its synthetic address, allocating on first sight
    ///
    /// An existing binding is reused; otherwise the cursor advances (wrapping
    /// past the end of the range) and both mapping directions are recorded.
    /// The whole operation is one critical section, so concurrent queries for
    /// the same new domain cannot allocate twice.
    pub fn resolve(&self, domain: &str) -> Ipv4Addr {
        let mut state = self.state.lock();

        if let Some(&ip) = state.ip_of_domain.get(domain) {
            return Ipv4Addr::from(ip);
        }

        let mut next = state.cursor + 1;
        if next > self.end {
            next = self.start;
        }
        state.cursor = next;

        if let Some(evicted) = state.domain_of_ip.insert(next, domain.to_string()) {
            state.ip_of_domain.remove(&evicted);
        }
        state.ip_of_domain.insert(domain.to_string(), next);

        Ipv4Addr::from(next)
    }

    /// Look up the synthetic address currently bound to a domain
    #[must_use]
    pub fn lookup(&self, domain: &str) -> Option<Ipv4Addr> {
        self.state
            .lock()
            .ip_of_domain
            .get(domain)
            .map(|&ip| Ipv4Addr::from(ip))
    }

    /// Look up the domain currently bound to a synthetic address
    #[must_use]
    pub fn reverse_lookup(&self, ip: Ipv4Addr) -> Option<String> {
        self.state.lock().domain_of_ip.get(&u32::from(ip)).cloned()
    }

    /// Check if an address falls inside the pool's range
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        self.start <= ip && ip <= self.end
    }

    /// Number of live bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().ip_of_domain.len()
    }

    /// Check if the pool holds no bindings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current cursor position, for diagnostics
    #[must_use]
    pub fn cursor(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.state.lock().cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(range: &str) -> LoopbackPool {
        LoopbackPool::new(parse_ip_range(range).unwrap())
    }

    #[test]
    fn test_parse_ip_range_roundtrip() {
        let range = parse_ip_range("127.0.1.0-127.0.255.255").unwrap();
        assert_eq!(range.start, Ipv4Addr::new(127, 0, 1, 0));
        assert_eq!(range.end, Ipv4Addr::new(127, 0, 255, 255));
        assert_eq!(range.to_string(), "127.0.1.0-127.0.255.255");
        assert_eq!(parse_ip_range(&range.to_string()).unwrap(), range);
    }

    #[test]
    fn test_parse_ip_range_rejects_malformed() {
        assert!(parse_ip_range("").is_err());
        assert!(parse_ip_range("127.0.1.0").is_err());
        assert!(parse_ip_range("127.0.1.0-").is_err());
        assert!(parse_ip_range("127.0.1.0-not-an-ip").is_err());
        assert!(parse_ip_range("banana-127.0.1.9").is_err());
    }

    #[test]
    fn test_parse_ip_range_rejects_out_of_block() {
        assert!(parse_ip_range("10.0.0.1-10.0.0.9").is_err());
        assert!(parse_ip_range("127.0.1.0-128.0.0.1").is_err());
        assert!(parse_ip_range("126.0.0.1-127.0.0.9").is_err());
    }

    #[test]
    fn test_parse_ip_range_rejects_boundary_addresses() {
        assert!(parse_ip_range("127.0.0.0-127.0.0.9").is_err());
        assert!(parse_ip_range("127.0.0.1-127.255.255.255").is_err());
    }

    #[test]
    fn test_parse_ip_range_rejects_inverted() {
        assert!(parse_ip_range("127.0.2.0-127.0.1.0").is_err());
        assert!(parse_ip_range("127.0.1.0-127.0.1.0").is_err());
    }

    #[test]
    fn test_allocation_sequence_and_wrap() {
        let pool = pool("127.0.1.0-127.0.1.2");

        // First allocation lands one past the start of the range
        assert_eq!(pool.resolve("example.com."), Ipv4Addr::new(127, 0, 1, 1));
        assert_eq!(pool.resolve("other.com."), Ipv4Addr::new(127, 0, 1, 2));
        // Past the end the cursor wraps back to the start
        assert_eq!(pool.resolve("third.com."), Ipv4Addr::new(127, 0, 1, 0));
        assert_eq!(pool.cursor(), Ipv4Addr::new(127, 0, 1, 0));

        // example.com is still bound, so it resolves without advancing
        assert_eq!(pool.resolve("example.com."), Ipv4Addr::new(127, 0, 1, 1));
        assert_eq!(pool.cursor(), Ipv4Addr::new(127, 0, 1, 0));
    }

    #[test]
    fn test_wrap_evicts_older_binding() {
        let pool = pool("127.0.1.0-127.0.1.2");

        pool.resolve("a.example.");
        pool.resolve("b.example.");
        pool.resolve("c.example.");
        assert_eq!(pool.len(), 3);

        // Fourth distinct domain lands on a.example's slot and evicts it
        let ip = pool.resolve("d.example.");
        assert_eq!(ip, Ipv4Addr::new(127, 0, 1, 1));
        assert_eq!(pool.lookup("a.example."), None);
        assert_eq!(pool.reverse_lookup(ip).as_deref(), Some("d.example."));
        assert_eq!(pool.len(), 3);

        // The evicted domain allocates afresh at the next cursor position
        assert_eq!(pool.resolve("a.example."), Ipv4Addr::new(127, 0, 1, 2));
    }

    #[test]
    fn test_forward_reverse_agree() {
        let pool = pool("127.0.1.0-127.0.1.200");

        for i in 0..100 {
            let domain = format!("host{i}.example.");
            let ip = pool.resolve(&domain);
            assert!(pool.contains(ip));
            assert_eq!(pool.lookup(&domain), Some(ip));
            assert_eq!(pool.reverse_lookup(ip).as_deref(), Some(domain.as_str()));
        }
        assert_eq!(pool.len(), 100);
    }

    #[test]
    fn test_bindings_count_and_cursor_before_wrap() {
        let pool = pool("127.0.1.0-127.0.1.10");

        for i in 0..5 {
            pool.resolve(&format!("host{i}.example."));
        }
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.cursor(), Ipv4Addr::new(127, 0, 1, 5));
    }

    #[test]
    fn test_smallest_legal_range() {
        let pool = pool("127.0.1.0-127.0.1.1");

        assert_eq!(pool.resolve("a.example."), Ipv4Addr::new(127, 0, 1, 1));
        assert_eq!(pool.resolve("b.example."), Ipv4Addr::new(127, 0, 1, 0));
        // Third domain evicts the first
        assert_eq!(pool.resolve("c.example."), Ipv4Addr::new(127, 0, 1, 1));
        assert_eq!(pool.lookup("a.example."), None);
        // A bound domain keeps answering with its own slot
        assert_eq!(pool.resolve("c.example."), Ipv4Addr::new(127, 0, 1, 1));
    }

    #[test]
    fn test_reverse_lookup_miss() {
        let pool = pool("127.0.1.0-127.0.1.10");
        assert_eq!(pool.reverse_lookup(Ipv4Addr::new(127, 0, 1, 7)), None);
        assert_eq!(pool.lookup("never-seen.example."), None);
    }

    #[test]
    fn test_contains() {
        let pool = pool("127.0.1.0-127.0.1.10");
        assert!(pool.contains(Ipv4Addr::new(127, 0, 1, 0)));
        assert!(pool.contains(Ipv4Addr::new(127, 0, 1, 10)));
        assert!(!pool.contains(Ipv4Addr::new(127, 0, 1, 11)));
        assert!(!pool.contains(Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(pool("127.0.1.0-127.0.255.255"));
        let mut handles = vec![];

        for t in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let domain = format!("host-{t}-{i}.example.");
                    let ip = pool.resolve(&domain);
                    assert!(pool.contains(ip));
                    assert_eq!(pool.reverse_lookup(ip).as_deref(), Some(domain.as_str()));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.len(), 800);
    }

    #[test]
    fn test_same_domain_reuses_binding_across_threads() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(pool("127.0.1.0-127.0.255.255"));
        let mut handles = vec![];

        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || pool.resolve("shared.example.")));
        }

        let ips: Vec<Ipv4Addr> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ips.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(pool.len(), 1);
    }
}
