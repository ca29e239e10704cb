//! Copy-on-write dataplane snapshots.

use std::collections::HashMap;

use ahash::RandomState;
use tunterm_types::{AddressFamily, SwIfIndex, TableIndex};

use crate::binding::InterfaceBinding;
use crate::classify::{ClassifyEntry, ClassifyMain};
use crate::dataplane::DataplaneView;

/// Frozen view of bindings and classify tables. Workers hold an `Arc` to
/// one of these for a whole frame; the control plane publishes a new one
/// after each change instead of mutating what workers read.
#[derive(Debug, Clone, Default)]
pub struct DataplaneSnapshot {
    generation: u64,
    bindings: HashMap<SwIfIndex, InterfaceBinding, RandomState>,
    classify: ClassifyMain,
}

impl DataplaneSnapshot {
    pub fn new(
        generation: u64,
        bindings: impl IntoIterator<Item = (SwIfIndex, InterfaceBinding)>,
        classify: ClassifyMain,
    ) -> Self {
        Self {
            generation,
            bindings: bindings.into_iter().collect(),
            classify,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn binding(&self, sw_if_index: SwIfIndex) -> Option<&InterfaceBinding> {
        self.bindings.get(&sw_if_index)
    }
}

impl DataplaneView for DataplaneSnapshot {
    fn table_for(&self, sw_if_index: SwIfIndex, af: AddressFamily) -> Option<TableIndex> {
        self.bindings.get(&sw_if_index).and_then(|b| b.slot(af))
    }

    fn find_entry(&self, table: TableIndex, data: &[u8]) -> Option<ClassifyEntry> {
        self.classify.find_entry(table, data).copied()
    }
}
