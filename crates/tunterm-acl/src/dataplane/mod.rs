//! Redirect dataplane.
//!
//! Every VXLAN packet arriving on an interface with the bypass feature
//! enabled passes through [`RedirectNode`]. The node reads the inner
//! ethertype, picks the table bound to the receiving interface for that
//! family and looks the packet up. A redirect hit strips the VXLAN and
//! inner Ethernet headers and hands the inner packet to the family's
//! rewrite stage with the session's adjacency; everything else continues
//! to `vxlan4-input` untouched, or is dropped when the ethertype is
//! neither IPv4 nor IPv6.
//!
//! The node only reads state, through [`DataplaneView`], and never
//! allocates except to append trace records.

pub mod frame;
mod node;
mod types;

pub use node::{DataplaneView, RedirectNode};
pub use types::{
    NextStage, PacketBuffer, RedirectCounters, RedirectOutcome, RedirectTrace,
    ETHERNET_HEADER_LEN, INNER_ETHERTYPE_OFFSET, REDIRECT_STRIP_LEN, VXLAN_HEADER_LEN,
};
