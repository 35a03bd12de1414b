// IPv4 CIDR arithmetic.
//
// Addresses are handled as big-endian u32 values: the first dotted octet is
// the most significant byte, which matches `u32::from(Ipv4Addr)`.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::NetoflowError;

/// A prefix length in `0..=32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrefixLen(u8);

impl PrefixLen {
    pub const MAX: PrefixLen = PrefixLen(32);

    pub fn new(bits: u8) -> Result<Self, NetoflowError> {
        if bits > 32 {
            return Err(NetoflowError::InvalidPrefixLength(bits.to_string()));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl FromStr for PrefixLen {
    type Err = NetoflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NetoflowError::InvalidPrefixLength(s.to_string()));
        }
        let bits: u8 = s
            .parse()
            .map_err(|_| NetoflowError::InvalidPrefixLength(s.to_string()))?;
        Self::new(bits)
    }
}

impl fmt::Display for PrefixLen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a dotted-quad string into its u32 encoding.
///
/// Exactly four octets are required, each a canonical decimal number in
/// `0..=255` (digits only, no leading zeros other than a lone `0`).
pub fn address_to_int(s: &str) -> Result<u32, NetoflowError> {
    let invalid = || NetoflowError::InvalidAddressFormat(s.to_string());

    let mut addr: u32 = 0;
    let mut count = 0;
    for octet in s.split('.') {
        count += 1;
        if count > 4 {
            return Err(invalid());
        }
        if octet.is_empty()
            || octet.len() > 3
            || !octet.bytes().all(|b| b.is_ascii_digit())
            || (octet.len() > 1 && octet.starts_with('0'))
        {
            return Err(invalid());
        }
        let value: u8 = octet.parse().map_err(|_| invalid())?;
        addr = (addr << 8) | u32::from(value);
    }
    if count != 4 {
        return Err(invalid());
    }
    Ok(addr)
}

/// Render a u32 address as a dotted-quad string.
pub fn int_to_address(addr: u32) -> String {
    let [a, b, c, d] = addr.to_be_bytes();
    format!("{a}.{b}.{c}.{d}")
}

/// Netmask with the top `prefix` bits set.
pub fn mask_from_prefix_len(prefix: PrefixLen) -> u32 {
    match prefix.bits() {
        0 => 0,
        32 => u32::MAX,
        bits => u32::MAX << (32 - bits),
    }
}

pub fn broadcast_address(addr: u32, prefix: PrefixLen) -> u32 {
    addr | !mask_from_prefix_len(prefix)
}

/// True if `addr` and `network` agree on the first `prefix` bits.
pub fn address_in_prefix(addr: u32, network: u32, prefix: PrefixLen) -> bool {
    let mask = mask_from_prefix_len(prefix);
    (addr & mask) == (network & mask)
}

/// Split `a.b.c.d/n` into its two halves.
fn split_cidr(s: &str) -> Result<(&str, &str), NetoflowError> {
    let mut parts = s.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(addr), Some(bits), None) => Ok((addr, bits)),
        _ => Err(NetoflowError::InvalidCidr(s.to_string())),
    }
}

/// A configured network block such as `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrBlock {
    pub network: u32,
    pub prefix: PrefixLen,
}

impl CidrBlock {
    pub fn new(network: u32, prefix: PrefixLen) -> Self {
        Self { network, prefix }
    }

    pub fn mask(&self) -> u32 {
        mask_from_prefix_len(self.prefix)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        address_in_prefix(u32::from(addr), self.network, self.prefix)
    }
}

impl FromStr for CidrBlock {
    type Err = NetoflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, bits) = split_cidr(s.trim())?;
        Ok(Self::new(address_to_int(addr)?, bits.parse()?))
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", int_to_address(self.network), self.prefix)
    }
}

/// A local host address with the broadcast address of its subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHostInfo {
    pub address: u32,
    pub prefix: PrefixLen,
    pub broadcast: u32,
}

impl LocalHostInfo {
    pub fn new(address: u32, prefix: PrefixLen) -> Self {
        Self {
            address,
            prefix,
            broadcast: broadcast_address(address, prefix),
        }
    }
}

impl FromStr for LocalHostInfo {
    type Err = NetoflowError;

    /// Accepts `a.b.c.d/n`; a bare address is taken as a /32 host.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.contains('/') {
            return Ok(Self::new(address_to_int(s)?, PrefixLen::MAX));
        }
        let (addr, bits) = split_cidr(s)?;
        Ok(Self::new(address_to_int(addr)?, bits.parse()?))
    }
}
