//! The redirect node: per-packet classification and rewrite.

use tunterm_types::{AddressFamily, AdjIndex, SwIfIndex, TableIndex};

use super::types::{
    NextStage, PacketBuffer, RedirectCounters, RedirectOutcome, RedirectTrace, REDIRECT_STRIP_LEN,
};
use crate::classify::{ClassifyAction, ClassifyEntry};

/// Read-only state the redirect node consults per packet.
pub trait DataplaneView {
    /// Table bound to `sw_if_index` for `af`.
    fn table_for(&self, sw_if_index: SwIfIndex, af: AddressFamily) -> Option<TableIndex>;

    /// Session of `table` matching packet `data` (keyed from the start of
    /// the frame). Must not allocate.
    fn find_entry(&self, table: TableIndex, data: &[u8]) -> Option<ClassifyEntry>;
}

/// The tunterm redirect stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedirectNode {
    /// Node-level trace switch; a packet is traced only when this and the
    /// buffer's own flag are both set.
    pub trace: bool,
}

impl RedirectNode {
    pub fn new(trace: bool) -> Self {
        Self { trace }
    }

    /// Classifies one packet, rewriting it when it is redirected.
    pub fn process_one<V: DataplaneView + ?Sized>(
        &self,
        view: &V,
        b: &mut PacketBuffer,
    ) -> (RedirectOutcome, NextStage) {
        let (af, rewrite) = match b.inner_ethertype().and_then(AddressFamily::from_ethertype) {
            Some(AddressFamily::V4) => (AddressFamily::V4, NextStage::Ip4Rewrite),
            Some(AddressFamily::V6) => (AddressFamily::V6, NextStage::Ip6Rewrite),
            None => return (RedirectOutcome::UnsupportedEthertype, NextStage::Drop),
        };

        let Some(table) = view.table_for(b.rx_sw_if_index, af) else {
            return (RedirectOutcome::NoClassifyTable, NextStage::Vxlan4Input);
        };

        match view.find_entry(table, &b.data) {
            Some(ClassifyEntry {
                action: ClassifyAction::SetMetadata,
                metadata,
            }) => {
                b.advance(REDIRECT_STRIP_LEN);
                b.tx_adj_index = AdjIndex::from_wire(metadata);
                (RedirectOutcome::Redirected, rewrite)
            }
            Some(_) => (RedirectOutcome::ActionNotSupported, NextStage::Vxlan4Input),
            None => (RedirectOutcome::NoMatch, NextStage::Vxlan4Input),
        }
    }

    /// Runs a frame of packets through the node.
    ///
    /// `nexts[i]` receives the next stage of `buffers[i]`, so both slices
    /// must have the same length. A trace record is appended for each
    /// traced packet when node tracing is on. Returns the counters of this
    /// frame only.
    pub fn process_frame<V: DataplaneView + ?Sized>(
        &self,
        view: &V,
        buffers: &mut [PacketBuffer],
        nexts: &mut [NextStage],
        traces: &mut Vec<RedirectTrace>,
    ) -> RedirectCounters {
        debug_assert_eq!(buffers.len(), nexts.len(), "one next slot per buffer");
        let mut counters = RedirectCounters::default();

        for (b, next) in buffers.iter_mut().zip(nexts.iter_mut()) {
            let (outcome, stage) = self.process_one(view, b);
            counters.record(outcome);
            *next = stage;

            if self.trace && b.traced {
                traces.push(RedirectTrace {
                    sw_if_index: b.rx_sw_if_index,
                    next: stage,
                    adj_index: b.tx_adj_index,
                });
            }
        }

        counters
    }
}
