//! Common types for the tunnel-termination redirect engine.
//!
//! This crate provides type-safe representations of the primitives shared
//! by the control plane and the redirect dataplane:
//!
//! - [`AddressFamily`]: IPv4 or IPv6, fixed per classify table
//! - [`IpAddress`]: IPv4 and IPv6 addresses, including the wire address
//!   descriptor codec used by the control API
//! - [`SwIfIndex`], [`TableIndex`], [`AdjIndex`]: interface, classify table
//!   and adjacency handles, with the `~0` wire sentinel handled at the edges

mod index;
mod ip;

pub use index::{AdjIndex, SwIfIndex, TableIndex, INDEX_NONE};
pub use ip::{AddressFamily, IpAddress, Ipv4Address, Ipv6Address, WIRE_ADDRESS_LEN};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid address family: {0}")]
    InvalidAddressFamily(String),

    #[error("unknown wire address family tag {0}")]
    UnknownWireFamily(u8),

    #[error("index {0:#x} is the reserved sentinel")]
    SentinelIndex(u32),
}
