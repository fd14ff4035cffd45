//! Target Resolver - address-space expansion and port-list parsing
//!
//! Takes a target string and turns it into a lazy, ordered, deduplicated
//! sequence of IPv4 addresses. Supported token forms, comma-separated:
//! - single IPv4 address: "1.2.3.4"
//! - CIDR: "192.168.1.0/24" (network and broadcast excluded)
//! - range: "192.168.1.1-192.168.1.10"
//!
//! Tokens are normalized into merged, disjoint intervals at parse time, so a
//! /8 costs a handful of bytes until it is iterated.

mod ports;

pub use ports::parse_ports;

use ipnet::Ipv4Net;
use minerscope_common::{MinerScopeError, MinerScopeResult};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Inclusive `[start, end]` span of addresses as integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Interval {
    start: u32,
    end: u32,
}

impl Interval {
    fn len(&self) -> u64 {
        u64::from(self.end) - u64::from(self.start) + 1
    }
}

/// Finite set of candidate addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    intervals: Arc<[Interval]>,
    host_count: u64,
}

impl AddressSpace {
    /// Parse a comma-separated target string.
    ///
    /// The first malformed token aborts parsing with
    /// [`MinerScopeError::MalformedAddressInput`] naming that token.
    pub fn parse(input: &str) -> MinerScopeResult<Self> {
        if input.trim().is_empty() {
            return Err(MinerScopeError::malformed_address(input, "no targets specified"));
        }

        let mut intervals = Vec::new();
        for token in input.split(',') {
            let t = token.trim();
            if t.is_empty() {
                continue;
            }
            intervals.push(parse_token(t)?);
        }

        if intervals.is_empty() {
            return Err(MinerScopeError::malformed_address(input, "no targets specified"));
        }

        let space = Self::from_intervals(intervals);
        debug!("Parsed '{}' into {} host(s)", input, space.host_count);
        Ok(space)
    }

    /// Build from explicit addresses.
    pub fn from_addresses<I: IntoIterator<Item = Ipv4Addr>>(addresses: I) -> Self {
        let intervals = addresses
            .into_iter()
            .map(|a| {
                let v = u32::from(a);
                Interval { start: v, end: v }
            })
            .collect();
        Self::from_intervals(intervals)
    }

    fn from_intervals(mut intervals: Vec<Interval>) -> Self {
        intervals.sort_unstable();

        let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
        for iv in intervals {
            match merged.last_mut() {
                // overlapping or adjacent
                Some(last) if u64::from(iv.start) <= u64::from(last.end) + 1 => {
                    last.end = last.end.max(iv.end);
                }
                _ => merged.push(iv),
            }
        }

        let host_count = merged.iter().map(Interval::len).sum();
        Self {
            intervals: merged.into(),
            host_count,
        }
    }

    /// Number of addresses the sequence yields.
    #[inline]
    pub fn host_count(&self) -> u64 {
        self.host_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.host_count == 0
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        let v = u32::from(address);
        self.intervals.iter().any(|iv| iv.start <= v && v <= iv.end)
    }

    /// Lazy iterator in ascending address order.
    pub fn iter(&self) -> AddressIter {
        AddressIter {
            intervals: Arc::clone(&self.intervals),
            index: 0,
            cursor: self.intervals.first().map(|iv| u64::from(iv.start)),
            remaining: self.host_count,
        }
    }

    /// Materialize at most `n` addresses, for interactive previews.
    pub fn first_n(&self, n: usize) -> Vec<Ipv4Addr> {
        self.iter().take(n).collect()
    }

    /// `ceil(host_count / concurrency) * per_host_budget`.
    pub fn estimate_scan_time(&self, concurrency: usize, per_host_budget: Duration) -> Duration {
        estimate_scan_time(self.host_count, concurrency, per_host_budget)
    }
}

impl FromStr for AddressSpace {
    type Err = MinerScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl IntoIterator for &AddressSpace {
    type Item = Ipv4Addr;
    type IntoIter = AddressIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for AddressSpace {
    type Item = Ipv4Addr;
    type IntoIter = AddressIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over an [`AddressSpace`]. Holds only a cursor into the intervals.
#[derive(Debug, Clone)]
pub struct AddressIter {
    intervals: Arc<[Interval]>,
    index: usize,
    cursor: Option<u64>,
    remaining: u64,
}

impl AddressIter {
    /// Addresses not yet yielded.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for AddressIter {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        let interval = self.intervals[self.index];

        if current >= u64::from(interval.end) {
            self.index += 1;
            self.cursor = self.intervals.get(self.index).map(|iv| u64::from(iv.start));
        } else {
            self.cursor = Some(current + 1);
        }
        self.remaining = self.remaining.saturating_sub(1);

        // current never exceeds u32::MAX: it is bounded by interval.end
        Some(Ipv4Addr::from(current as u32))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

fn parse_token(token: &str) -> MinerScopeResult<Interval> {
    if token.contains('/') {
        let net = Ipv4Net::from_str(token)
            .map_err(|e| MinerScopeError::malformed_address(token, format!("invalid CIDR: {}", e)))?
            .trunc();
        let start = u32::from(net.network());
        let end = u32::from(net.broadcast());
        // /31 and /32 have no network/broadcast pair to drop
        return Ok(if net.prefix_len() <= 30 {
            Interval {
                start: start + 1,
                end: end - 1,
            }
        } else {
            Interval { start, end }
        });
    }

    if token.contains('-') {
        let parts: Vec<&str> = token.split('-').collect();
        if parts.len() != 2 {
            return Err(MinerScopeError::malformed_address(
                token,
                "range must be START_IP-END_IP",
            ));
        }
        let start = parse_ipv4(parts[0].trim(), token)?;
        let end = parse_ipv4(parts[1].trim(), token)?;
        if u32::from(start) > u32::from(end) {
            return Err(MinerScopeError::malformed_address(token, "range start is after end"));
        }
        return Ok(Interval {
            start: start.into(),
            end: end.into(),
        });
    }

    let ip = parse_ipv4(token, token)?;
    Ok(Interval {
        start: ip.into(),
        end: ip.into(),
    })
}

fn parse_ipv4(text: &str, token: &str) -> MinerScopeResult<Ipv4Addr> {
    match text.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(ip),
        Ok(IpAddr::V6(_)) => Err(MinerScopeError::malformed_address(
            token,
            "IPv6 addresses are not supported",
        )),
        Err(_) => Err(MinerScopeError::malformed_address(
            token,
            format!("'{}' is not an IPv4 address", text),
        )),
    }
}

/// RFC1918, loopback or link-local.
#[inline]
pub fn is_private(address: Ipv4Addr) -> bool {
    address.is_private() || address.is_loopback() || address.is_link_local()
}

/// True if `text` is a well-formed IPv4 address.
pub fn is_valid(text: &str) -> bool {
    text.trim().parse::<Ipv4Addr>().is_ok()
}

/// Number of addresses in an inclusive range; zero when inverted.
pub fn count_range(start: Ipv4Addr, end: Ipv4Addr) -> u64 {
    let (s, e) = (u64::from(u32::from(start)), u64::from(u32::from(end)));
    if e < s {
        0
    } else {
        e - s + 1
    }
}

/// `ceil(host_count / concurrency) * per_host_budget`. Zero concurrency counts as one.
pub fn estimate_scan_time(host_count: u64, concurrency: usize, per_host_budget: Duration) -> Duration {
    let concurrency = concurrency.max(1) as u64;
    let waves = host_count.div_ceil(concurrency);
    let waves = u32::try_from(waves).unwrap_or(u32::MAX);
    per_host_budget.saturating_mul(waves)
}

/// Random public addresses, skipping private space. May return fewer than
/// `count` when attempts run out.
pub fn random_public<R: Rng>(count: usize, rng: &mut R) -> Vec<Ipv4Addr> {
    let mut ips = Vec::with_capacity(count);
    let max_attempts = count.saturating_mul(10);
    let mut attempts = 0;

    while ips.len() < count && attempts < max_attempts {
        attempts += 1;
        let ip = Ipv4Addr::new(
            rng.gen_range(1..=254),
            rng.gen(),
            rng.gen(),
            rng.gen_range(1..=254),
        );
        if is_private(ip) || ips.contains(&ip) {
            continue;
        }
        ips.push(ip);
    }
    ips
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
        Ipv4Addr::new(a, b, c, d)
    }

    #[test]
    fn test_resolve_single_ip() {
        let space = AddressSpace::parse("8.8.8.8").unwrap();
        assert_eq!(space.first_n(10), vec![ip(8, 8, 8, 8)]);
    }

    #[test]
    fn test_resolve_cidr_excludes_network_and_broadcast() {
        let space = AddressSpace::parse("192.168.1.0/30").unwrap();
        assert_eq!(space.first_n(10), vec![ip(192, 168, 1, 1), ip(192, 168, 1, 2)]);
    }

    #[test]
    fn cidr_host_count_formula() {
        for prefix in [8u8, 16, 20, 24, 29, 30] {
            let space = AddressSpace::parse(&format!("10.0.0.0/{}", prefix)).unwrap();
            assert_eq!(space.host_count(), (1u64 << (32 - prefix)) - 2, "prefix {}", prefix);
        }
        assert_eq!(AddressSpace::parse("10.0.0.0/31").unwrap().host_count(), 2);
        assert_eq!(AddressSpace::parse("10.0.0.7/32").unwrap().host_count(), 1);
    }

    #[test]
    fn large_cidr_is_lazy() {
        let space = AddressSpace::parse("10.0.0.0/8").unwrap();
        assert_eq!(space.host_count(), 16_777_214);
        let mut iter = space.iter();
        assert_eq!(iter.next(), Some(ip(10, 0, 0, 1)));
        assert_eq!(iter.remaining(), 16_777_213);
        assert_eq!(space.iter().last(), Some(ip(10, 255, 255, 254)));
    }

    #[test]
    fn test_resolve_range() {
        let space = AddressSpace::parse("192.168.1.1-192.168.1.3").unwrap();
        assert_eq!(space.host_count(), 3);
        assert_eq!(space.iter().count(), 3);
    }

    #[test]
    fn comma_list_is_deduplicated_and_ordered() {
        let space =
            AddressSpace::parse("10.0.0.5, 10.0.0.1,10.0.0.2-10.0.0.6, 10.0.0.5,").unwrap();
        let all: Vec<_> = space.iter().collect();
        assert_eq!(
            all,
            (1..=6).map(|d| ip(10, 0, 0, d)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn overlapping_cidrs_merge() {
        let space = AddressSpace::parse("10.0.0.0/24,10.0.0.0/25").unwrap();
        assert_eq!(space.host_count(), 254);
    }

    #[test]
    fn malformed_tokens_are_named() {
        for bad in ["10.0.0.256", "10.0.0.0/33", "10.0.0.9-10.0.0.1", "a-b-c", "::1", "host.example"] {
            match AddressSpace::parse(&format!("10.0.0.1,{}", bad)) {
                Err(MinerScopeError::MalformedAddressInput { token, .. }) => assert_eq!(token, bad),
                other => panic!("expected malformed input for {}, got {:?}", bad, other),
            }
        }
        assert!(AddressSpace::parse("  ").is_err());
        assert!(AddressSpace::parse(",,").is_err());
    }

    #[test]
    fn private_classification() {
        assert!(is_private(ip(10, 1, 2, 3)));
        assert!(is_private(ip(172, 16, 0, 1)));
        assert!(is_private(ip(192, 168, 0, 1)));
        assert!(is_private(ip(127, 0, 0, 1)));
        assert!(is_private(ip(169, 254, 1, 1)));
        assert!(!is_private(ip(8, 8, 8, 8)));
        assert!(!is_private(ip(172, 32, 0, 1)));
    }

    #[test]
    fn scan_time_estimate() {
        let budget = Duration::from_secs(3);
        assert_eq!(estimate_scan_time(6, 2, budget), Duration::from_secs(9));
        assert_eq!(estimate_scan_time(7, 2, budget), Duration::from_secs(12));
        assert_eq!(estimate_scan_time(0, 50, budget), Duration::ZERO);
        let space = AddressSpace::parse("10.0.0.0/29").unwrap();
        assert_eq!(space.estimate_scan_time(2, budget), Duration::from_secs(9));
    }

    #[test]
    fn range_counting() {
        assert_eq!(count_range(ip(10, 0, 0, 1), ip(10, 0, 1, 0)), 256);
        assert_eq!(count_range(ip(10, 0, 0, 2), ip(10, 0, 0, 1)), 0);
        assert!(is_valid(" 1.2.3.4 "));
        assert!(!is_valid("1.2.3"));
    }

    #[test]
    fn random_addresses_are_public() {
        let mut rng = StdRng::seed_from_u64(7);
        let ips = random_public(50, &mut rng);
        assert!(!ips.is_empty());
        assert!(ips.iter().all(|a| !is_private(*a)));
    }
}
