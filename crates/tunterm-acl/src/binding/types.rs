//! Interface binding records and registry errors.

use serde::Serialize;
use tunterm_types::{AddressFamily, SwIfIndex, TableIndex};

use crate::host::FeatureError;

/// Tables bound to one interface, one slot per address family.
///
/// Both slots exist together from the first time the interface is touched:
/// the redirect stage may see either family on a feature-enabled interface
/// whatever family was configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceBinding {
    pub v4: Option<TableIndex>,
    pub v6: Option<TableIndex>,
    pub feature_enabled: bool,
}

impl InterfaceBinding {
    pub fn slot(&self, af: AddressFamily) -> Option<TableIndex> {
        match af {
            AddressFamily::V4 => self.v4,
            AddressFamily::V6 => self.v6,
        }
    }

    pub(crate) fn slot_mut(&mut self, af: AddressFamily) -> &mut Option<TableIndex> {
        match af {
            AddressFamily::V4 => &mut self.v4,
            AddressFamily::V6 => &mut self.v6,
        }
    }

    /// True when `table` sits in either slot.
    pub fn references(&self, table: TableIndex) -> bool {
        self.v4 == Some(table) || self.v6 == Some(table)
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_none() && self.v6.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("table index is the none sentinel")]
    SentinelTable,

    #[error("interface {0} does not exist")]
    InvalidInterface(SwIfIndex),

    #[error("table {0} does not exist")]
    NoSuchTable(TableIndex),

    #[error("interface {sw_if_index} already has {af} table {bound} attached")]
    SlotInUse {
        sw_if_index: SwIfIndex,
        af: AddressFamily,
        bound: TableIndex,
    },

    #[error("table {table} is not attached to interface {sw_if_index}")]
    NotBound {
        sw_if_index: SwIfIndex,
        table: TableIndex,
    },

    #[error(transparent)]
    Feature(#[from] FeatureError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingStats {
    pub attaches: u64,
    pub detaches: u64,
    pub feature_enables: u64,
    pub feature_disables: u64,
}
