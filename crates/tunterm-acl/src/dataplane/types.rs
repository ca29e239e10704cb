//! Packet buffers, next stages, outcomes, counters and traces.

use std::fmt;
use std::ops::AddAssign;

use serde::Serialize;
use tunterm_types::{AdjIndex, SwIfIndex};

pub const VXLAN_HEADER_LEN: usize = 8;
pub const ETHERNET_HEADER_LEN: usize = 14;
const MAC_ADDRESS_LEN: usize = 6;

/// Offset of the inner ethertype from the buffer's current position, which
/// sits on the VXLAN header when the redirect stage runs.
pub const INNER_ETHERTYPE_OFFSET: usize = VXLAN_HEADER_LEN + 2 * MAC_ADDRESS_LEN;

/// Bytes stripped from a redirected packet: VXLAN plus inner Ethernet.
pub const REDIRECT_STRIP_LEN: usize = VXLAN_HEADER_LEN + ETHERNET_HEADER_LEN;

/// A received packet as the redirect stage sees it.
///
/// `data` holds the whole frame from the outer Ethernet header on;
/// `current_data` is the offset processing has reached. Classification
/// always keys off the start of `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBuffer {
    pub data: Vec<u8>,
    pub current_data: usize,
    pub rx_sw_if_index: SwIfIndex,
    pub tx_adj_index: Option<AdjIndex>,
    pub traced: bool,
}

impl PacketBuffer {
    pub fn new(data: Vec<u8>, current_data: usize, rx_sw_if_index: SwIfIndex) -> Self {
        Self {
            data,
            current_data,
            rx_sw_if_index,
            tx_adj_index: None,
            traced: false,
        }
    }

    pub fn traced(mut self) -> Self {
        self.traced = true;
        self
    }

    /// Bytes from the current position on.
    pub fn current(&self) -> &[u8] {
        self.data.get(self.current_data..).unwrap_or(&[])
    }

    pub fn advance(&mut self, n: usize) {
        self.current_data += n;
    }

    /// Big-endian ethertype of the inner Ethernet header, `None` when the
    /// buffer is too short to hold one.
    pub fn inner_ethertype(&self) -> Option<u16> {
        let at = self.current_data + INNER_ETHERTYPE_OFFSET;
        let bytes = self.data.get(at..at + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

/// Where a packet goes after the redirect stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum NextStage {
    Drop = 0,
    /// Default path. The outer tunnel is always IPv4, so inner IPv6 bypass
    /// traffic goes here too.
    #[default]
    Vxlan4Input = 1,
    Ip4Rewrite = 2,
    Ip6Rewrite = 3,
}

impl NextStage {
    pub const fn index(&self) -> u32 {
        *self as u32
    }

    pub const fn node_name(&self) -> &'static str {
        match self {
            NextStage::Drop => "error-drop",
            NextStage::Vxlan4Input => "vxlan4-input",
            NextStage::Ip4Rewrite => "ip4-rewrite",
            NextStage::Ip6Rewrite => "ip6-rewrite",
        }
    }
}

impl fmt::Display for NextStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node_name())
    }
}

/// Terminal outcome of one packet. Exactly one counter per packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectOutcome {
    Redirected,
    NoClassifyTable,
    ActionNotSupported,
    UnsupportedEthertype,
    NoMatch,
}

impl RedirectOutcome {
    pub const ALL: [RedirectOutcome; 5] = [
        RedirectOutcome::Redirected,
        RedirectOutcome::NoClassifyTable,
        RedirectOutcome::ActionNotSupported,
        RedirectOutcome::UnsupportedEthertype,
        RedirectOutcome::NoMatch,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            RedirectOutcome::Redirected => "redirected",
            RedirectOutcome::NoClassifyTable => "no_classify_table",
            RedirectOutcome::ActionNotSupported => "action_not_supported",
            RedirectOutcome::UnsupportedEthertype => "unsupported_ethertype",
            RedirectOutcome::NoMatch => "no_match",
        }
    }

    pub const fn description(&self) -> &'static str {
        match self {
            RedirectOutcome::Redirected => "Packets successfully redirected",
            RedirectOutcome::NoClassifyTable => "No classify table found",
            RedirectOutcome::ActionNotSupported => "Match found, but action not supported",
            RedirectOutcome::UnsupportedEthertype => "Unsupported ethertype",
            RedirectOutcome::NoMatch => "No match found in classify table",
        }
    }
}

/// The five redirect counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RedirectCounters {
    pub redirected: u64,
    pub no_classify_table: u64,
    pub action_not_supported: u64,
    pub unsupported_ethertype: u64,
    pub no_match: u64,
}

impl RedirectCounters {
    pub fn record(&mut self, outcome: RedirectOutcome) {
        *self.slot_mut(outcome) += 1;
    }

    pub fn get(&self, outcome: RedirectOutcome) -> u64 {
        match outcome {
            RedirectOutcome::Redirected => self.redirected,
            RedirectOutcome::NoClassifyTable => self.no_classify_table,
            RedirectOutcome::ActionNotSupported => self.action_not_supported,
            RedirectOutcome::UnsupportedEthertype => self.unsupported_ethertype,
            RedirectOutcome::NoMatch => self.no_match,
        }
    }

    fn slot_mut(&mut self, outcome: RedirectOutcome) -> &mut u64 {
        match outcome {
            RedirectOutcome::Redirected => &mut self.redirected,
            RedirectOutcome::NoClassifyTable => &mut self.no_classify_table,
            RedirectOutcome::ActionNotSupported => &mut self.action_not_supported,
            RedirectOutcome::UnsupportedEthertype => &mut self.unsupported_ethertype,
            RedirectOutcome::NoMatch => &mut self.no_match,
        }
    }

    /// Folds another worker's counters into these.
    pub fn merge(&mut self, other: &RedirectCounters) {
        for outcome in RedirectOutcome::ALL {
            *self.slot_mut(outcome) += other.get(outcome);
        }
    }

    pub fn total(&self) -> u64 {
        RedirectOutcome::ALL.iter().map(|o| self.get(*o)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RedirectOutcome, u64)> + '_ {
        RedirectOutcome::ALL.into_iter().map(|o| (o, self.get(o)))
    }
}

impl AddAssign<&RedirectCounters> for RedirectCounters {
    fn add_assign(&mut self, rhs: &RedirectCounters) {
        self.merge(rhs);
    }
}

/// Per-packet trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RedirectTrace {
    pub sw_if_index: SwIfIndex,
    pub next: NextStage,
    pub adj_index: Option<AdjIndex>,
}

impl fmt::Display for RedirectTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TUNTERM: sw_if_index {} next {} index {}",
            self.sw_if_index,
            self.next.index(),
            AdjIndex::to_wire(self.adj_index),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tunterm_types::INDEX_NONE;

    #[test]
    fn test_counters_merge() {
        let mut a = RedirectCounters::default();
        a.record(RedirectOutcome::Redirected);
        a.record(RedirectOutcome::NoMatch);

        let mut b = RedirectCounters::default();
        b.record(RedirectOutcome::Redirected);
        b.record(RedirectOutcome::UnsupportedEthertype);

        a += &b;
        assert_eq!(a.redirected, 2);
        assert_eq!(a.no_match, 1);
        assert_eq!(a.unsupported_ethertype, 1);
        assert_eq!(a.total(), 4);
    }

    #[test]
    fn test_counter_descriptions() {
        let names: Vec<&str> = RedirectOutcome::ALL.iter().map(|o| o.description()).collect();
        assert_eq!(
            names,
            vec![
                "Packets successfully redirected",
                "No classify table found",
                "Match found, but action not supported",
                "Unsupported ethertype",
                "No match found in classify table",
            ]
        );
    }

    #[test]
    fn test_trace_format() {
        let trace = RedirectTrace {
            sw_if_index: SwIfIndex::new(1),
            next: NextStage::Ip4Rewrite,
            adj_index: Some(AdjIndex::new(7)),
        };
        assert_eq!(trace.to_string(), "TUNTERM: sw_if_index 1 next 2 index 7");

        let bypass = RedirectTrace {
            next: NextStage::Vxlan4Input,
            adj_index: None,
            ..trace
        };
        assert_eq!(
            bypass.to_string(),
            format!("TUNTERM: sw_if_index 1 next 1 index {INDEX_NONE}")
        );
    }

    #[test]
    fn test_inner_ethertype_truncated() {
        let buf = PacketBuffer::new(vec![0u8; 50], 42, SwIfIndex::new(1));
        assert_eq!(buf.inner_ethertype(), None);
    }
}
