//! Rules, redirect sessions and table manager errors.

use serde::{Deserialize, Serialize};
use tunterm_types::{AddressFamily, AdjIndex, IpAddress, SwIfIndex, TableIndex};

use crate::classify::ClassifyError;
use crate::fib::{ForwardingPath, PathError, RoutePathDescriptor};

/// One submitted rule: redirect packets whose inner destination is `dst`
/// along `paths`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunTermRule {
    pub dst: IpAddress,
    pub paths: Vec<RoutePathDescriptor>,
}

impl TunTermRule {
    pub fn new(dst: IpAddress, path: RoutePathDescriptor) -> Self {
        Self {
            dst,
            paths: vec![path],
        }
    }
}

/// Session action. Only redirect exists today; the dataplane treats any
/// classify hit without metadata as "action not supported".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionAction {
    Redirect,
}

/// An installed redirect session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectSession {
    pub dst: IpAddress,
    pub action: SessionAction,
    /// Descriptors as submitted, kept so paths can be re-resolved.
    pub descriptors: Vec<RoutePathDescriptor>,
    pub paths: Vec<ForwardingPath>,
    /// Adjacency the path list contributes; the classify metadata.
    pub adj_index: AdjIndex,
    /// Packet-shaped match buffer handed to the classifier.
    pub(crate) match_buf: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("table index is the none sentinel")]
    SentinelTable,

    #[error("table {0} does not exist")]
    NoSuchTable(TableIndex),

    #[error("table {table} is {table_family}, request is {requested}")]
    FamilyMismatch {
        table: TableIndex,
        table_family: AddressFamily,
        requested: AddressFamily,
    },

    #[error("rule {rule}: destination is {found}, table is {expected}")]
    RuleFamilyMismatch {
        rule: usize,
        expected: AddressFamily,
        found: AddressFamily,
    },

    #[error("rule {rule}: no paths")]
    NoPaths { rule: usize },

    #[error("rule {rule}: {source}")]
    Path { rule: usize, source: PathError },

    #[error("table {table} is still bound to interface {sw_if_index}")]
    InUse {
        table: TableIndex,
        sw_if_index: SwIfIndex,
    },

    #[error("classifier: {0}")]
    Classify(#[from] ClassifyError),
}

/// Table manager counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableManagerStats {
    pub tables_created: u64,
    pub tables_deleted: u64,
    pub replaces: u64,
    pub sessions_installed: u64,
    pub batches_rejected: u64,
}
