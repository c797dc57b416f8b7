//! The key traits a `Fib` needs from whatever address/prefix type a caller
//! plugs in, plus a small set of concrete IPv4/IPv6-shaped keys good enough
//! to exercise every operation end to end.
//!
//! A C router core might hard-code one tagged union covering every address
//! family it supports. Rust's type system makes that an anti-pattern here:
//! callers bring their own key type and tell us how to hash, compare and
//! shorten it.

use std::hash::{Hash, Hasher};

/// Tags which address family a key belongs to, mirroring the `NET_*`
/// constants of the original FIB so a single process can keep separate
/// tables (or separate diagnostics) per family without the key type itself
/// needing to encode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// Plain IPv4 prefixes.
    Ip4,
    /// Plain IPv6 prefixes.
    Ip6,
    /// IPv4 prefixes qualified by a VPN route distinguisher.
    Vpn4,
    /// IPv6 prefixes qualified by a VPN route distinguisher.
    Vpn6,
    /// IPv4 ROA (Route Origin Authorization) records.
    Roa4,
    /// IPv6 ROA records.
    Roa6,
    /// IPv4 flow specification rules.
    Flow4,
    /// IPv6 flow specification rules.
    Flow6,
    /// IPv6 prefixes qualified by a source prefix (SADR routing).
    Ip6Sadr,
    /// MPLS labels.
    Mpls,
}

/// What a `Fib` needs to store a key: stable hashing and equality.
///
/// Hashing must be stable for the lifetime of the table (it determines the
/// node's position in the split-ordered list); keys that change their hash
/// after insertion will corrupt traversal order.
pub trait FibKey: Eq + Clone {
    /// Which address family this key belongs to.
    fn family(&self) -> AddressFamily;

    /// A 32-bit hash of the key. Does not need to be cryptographic; it only
    /// needs to be stable and reasonably uniform.
    fn fib_hash(&self) -> u32;
}

/// Extends [`FibKey`] with the operations `Fib::route` needs to walk from
/// the most specific prefix to the least specific one.
pub trait RoutableKey: FibKey {
    /// Current prefix length, in bits.
    fn prefix_len(&self) -> u8;

    /// Returns a copy of this key with its prefix shortened by one bit and
    /// the bit that fell off cleared (so `0.0.0.1/32` shortened once is
    /// `0.0.0.0/31`, not `0.0.0.1/31`).
    ///
    /// Called only while `prefix_len() > 0`.
    fn shorten_by_one(&self) -> Self;
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// An IPv4 prefix, `a.b.c.d/len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Prefix {
    /// The address, host bits beyond `len` already cleared.
    pub addr: u32,
    /// Prefix length in bits, `0..=32`.
    pub len: u8,
}

impl Ipv4Prefix {
    /// Builds a prefix, clearing any host bits beyond `len`.
    pub fn new(addr: u32, len: u8) -> Self {
        debug_assert!(len <= 32);
        Ipv4Prefix {
            addr: mask(addr, len),
            len,
        }
    }
}

impl Hash for Ipv4Prefix {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
        self.len.hash(state);
    }
}

impl FibKey for Ipv4Prefix {
    fn family(&self) -> AddressFamily {
        AddressFamily::Ip4
    }

    fn fib_hash(&self) -> u32 {
        fnv1a(&[
            (self.addr >> 24) as u8,
            (self.addr >> 16) as u8,
            (self.addr >> 8) as u8,
            self.addr as u8,
            self.len,
        ])
    }
}

impl RoutableKey for Ipv4Prefix {
    fn prefix_len(&self) -> u8 {
        self.len
    }

    fn shorten_by_one(&self) -> Self {
        debug_assert!(self.len > 0);
        Ipv4Prefix::new(self.addr, self.len - 1)
    }
}

fn mask(addr: u32, len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        addr & (u32::MAX << (32 - len as u32))
    }
}

/// An IPv6 prefix, stored as a 128-bit address split into two words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv6Prefix {
    /// High 64 bits of the address.
    pub hi: u64,
    /// Low 64 bits of the address.
    pub lo: u64,
    /// Prefix length in bits, `0..=128`.
    pub len: u8,
}

impl Ipv6Prefix {
    /// Builds a prefix, clearing any host bits beyond `len`.
    pub fn new(hi: u64, lo: u64, len: u8) -> Self {
        debug_assert!(len <= 128);
        let (hi, lo) = mask128(hi, lo, len);
        Ipv6Prefix { hi, lo, len }
    }
}

impl FibKey for Ipv6Prefix {
    fn family(&self) -> AddressFamily {
        AddressFamily::Ip6
    }

    fn fib_hash(&self) -> u32 {
        fnv1a(&[
            (self.hi >> 56) as u8,
            (self.hi >> 48) as u8,
            (self.hi >> 40) as u8,
            (self.hi >> 32) as u8,
            (self.hi >> 24) as u8,
            (self.hi >> 16) as u8,
            (self.hi >> 8) as u8,
            self.hi as u8,
            (self.lo >> 56) as u8,
            (self.lo >> 48) as u8,
            (self.lo >> 40) as u8,
            (self.lo >> 32) as u8,
            (self.lo >> 24) as u8,
            (self.lo >> 16) as u8,
            (self.lo >> 8) as u8,
            self.lo as u8,
            self.len,
        ])
    }
}

impl RoutableKey for Ipv6Prefix {
    fn prefix_len(&self) -> u8 {
        self.len
    }

    fn shorten_by_one(&self) -> Self {
        debug_assert!(self.len > 0);
        Ipv6Prefix::new(self.hi, self.lo, self.len - 1)
    }
}

fn mask128(hi: u64, lo: u64, len: u8) -> (u64, u64) {
    if len == 0 {
        return (0, 0);
    }
    if len >= 64 {
        let lo_len = len - 64;
        let lo_mask = if lo_len == 0 { 0 } else { u64::MAX << (64 - lo_len as u32) };
        (hi, lo & lo_mask)
    } else {
        (hi & (u64::MAX << (64 - len as u32)), 0)
    }
}
