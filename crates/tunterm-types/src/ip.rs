//! IP addresses, address families and the wire address descriptor codec.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Length of the address union in a wire address descriptor.
pub const WIRE_ADDRESS_LEN: usize = 16;

const WIRE_AF_IP4: u8 = 0;
const WIRE_AF_IP6: u8 = 1;

/// Address family of a classify table or a packet's inner header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Maps the API's `is_ipv6` flag to a family.
    pub const fn from_is_ipv6(is_ipv6: bool) -> Self {
        if is_ipv6 {
            AddressFamily::V6
        } else {
            AddressFamily::V4
        }
    }

    pub const fn is_ipv6(&self) -> bool {
        matches!(self, AddressFamily::V6)
    }

    /// The opposite family.
    pub const fn other(&self) -> Self {
        match self {
            AddressFamily::V4 => AddressFamily::V6,
            AddressFamily::V6 => AddressFamily::V4,
        }
    }

    /// Wire tag used by the address descriptor.
    pub const fn wire_tag(&self) -> u8 {
        match self {
            AddressFamily::V4 => WIRE_AF_IP4,
            AddressFamily::V6 => WIRE_AF_IP6,
        }
    }

    /// Parses a wire tag.
    pub fn from_wire_tag(tag: u8) -> Result<Self, ParseError> {
        match tag {
            WIRE_AF_IP4 => Ok(AddressFamily::V4),
            WIRE_AF_IP6 => Ok(AddressFamily::V6),
            other => Err(ParseError::UnknownWireFamily(other)),
        }
    }

    /// Ethertype of an inner header of this family.
    pub const fn ethertype(&self) -> u16 {
        match self {
            AddressFamily::V4 => 0x0800,
            AddressFamily::V6 => 0x86DD,
        }
    }

    /// Maps an ethertype to a family, `None` for anything unsupported.
    pub const fn from_ethertype(ethertype: u16) -> Option<Self> {
        match ethertype {
            0x0800 => Some(AddressFamily::V4),
            0x86DD => Some(AddressFamily::V6),
            _ => None,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "v4" | "ipv4" | "ip4" => Ok(AddressFamily::V4),
            "v6" | "ipv6" | "ip6" => Ok(AddressFamily::V6),
            _ => Err(ParseError::InvalidAddressFamily(s.to_string())),
        }
    }
}

/// An IPv4 address wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv4Address(Ipv4Addr);

impl Ipv4Address {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Address(Ipv4Addr::new(a, b, c, d))
    }

    pub const fn octets(&self) -> [u8; 4] {
        self.0.octets()
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv4Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Ipv4Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Ipv4Address(addr)
    }
}

/// An IPv6 address wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv6Address(Ipv6Addr);

impl Ipv6Address {
    pub const fn octets(&self) -> [u8; 16] {
        self.0.octets()
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv6Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv6Addr>()
            .map(Ipv6Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv6Addr> for Ipv6Address {
    fn from(addr: Ipv6Addr) -> Self {
        Ipv6Address(addr)
    }
}

/// An IP address that can be either IPv4 or IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpAddress {
    V4(Ipv4Address),
    V6(Ipv6Address),
}

impl IpAddress {
    pub const fn family(&self) -> AddressFamily {
        match self {
            IpAddress::V4(_) => AddressFamily::V4,
            IpAddress::V6(_) => AddressFamily::V6,
        }
    }

    pub const fn is_ipv6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// Network-order bytes of the address: 4 for IPv4, 16 for IPv6.
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            IpAddress::V4(addr) => addr.octets().to_vec(),
            IpAddress::V6(addr) => addr.octets().to_vec(),
        }
    }

    /// Decodes a wire address descriptor: a family tag plus a 16-byte union
    /// in which an IPv4 address occupies the first four bytes.
    pub fn decode(af_tag: u8, un: &[u8; WIRE_ADDRESS_LEN]) -> Result<Self, ParseError> {
        match AddressFamily::from_wire_tag(af_tag)? {
            AddressFamily::V4 => Ok(IpAddress::V4(Ipv4Address::new(
                un[0], un[1], un[2], un[3],
            ))),
            AddressFamily::V6 => Ok(IpAddress::V6(Ipv6Address(Ipv6Addr::from(*un)))),
        }
    }

    /// Encodes into a wire address descriptor (family tag, address union).
    pub fn encode(&self) -> (u8, [u8; WIRE_ADDRESS_LEN]) {
        let mut un = [0u8; WIRE_ADDRESS_LEN];
        match self {
            IpAddress::V4(addr) => un[..4].copy_from_slice(&addr.octets()),
            IpAddress::V6(addr) => un.copy_from_slice(&addr.octets()),
        }
        (self.family().wire_tag(), un)
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(addr) => addr.fmt(f),
            IpAddress::V6(addr) => addr.fmt(f),
        }
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Host prefixes ("10.0.0.5/32") are accepted; only full-length
        // prefixes name a single destination.
        let addr = match s.split_once('/') {
            Some((addr, len)) => {
                let full = if addr.contains(':') { "128" } else { "32" };
                if len != full {
                    return Err(ParseError::InvalidIpAddress(s.to_string()));
                }
                addr
            }
            None => s,
        };

        let parsed = if addr.contains(':') {
            addr.parse::<Ipv6Address>().map(IpAddress::V6)
        } else {
            addr.parse::<Ipv4Address>().map(IpAddress::V4)
        };
        parsed.map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(Ipv4Address(addr))
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(Ipv6Address(addr))
    }
}
