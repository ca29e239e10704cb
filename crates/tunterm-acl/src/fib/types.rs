//! Route path descriptors, resolved paths and the resolver trait.

use std::fmt;

use serde::{Deserialize, Serialize};
use tunterm_types::{AdjIndex, IpAddress, SwIfIndex};

/// Unresolved next-hop description as submitted with a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutePathDescriptor {
    /// Egress interface; `None` asks for a recursive lookup in `table_id`.
    pub sw_if_index: Option<SwIfIndex>,
    pub table_id: u32,
    pub next_hop: IpAddress,
}

impl RoutePathDescriptor {
    pub fn via(sw_if_index: SwIfIndex, next_hop: IpAddress) -> Self {
        Self {
            sw_if_index: Some(sw_if_index),
            table_id: 0,
            next_hop,
        }
    }
}

impl fmt::Display for RoutePathDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sw_if_index {
            Some(idx) => write!(f, "via {} sw_if_index {}", self.next_hop, idx),
            None => write!(f, "via {} table {}", self.next_hop, self.table_id),
        }
    }
}

/// A resolved forwarding path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardingPath {
    pub sw_if_index: SwIfIndex,
    pub next_hop: IpAddress,
    pub adj_index: AdjIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path egress interface {0} does not exist")]
    InvalidInterface(SwIfIndex),
    #[error("route has no paths")]
    NoPaths,
    #[error("path {0} cannot be resolved")]
    Unresolved(String),
}

/// Turns next-hop descriptors into forwarding paths.
pub trait RoutePathResolver: Send + Sync {
    fn resolve(&self, path: &RoutePathDescriptor) -> Result<ForwardingPath, PathError>;

    /// The single adjacency a path list contributes for forwarding. The
    /// default forwards over the first path.
    fn contribute_forwarding(&self, paths: &[ForwardingPath]) -> Result<AdjIndex, PathError> {
        paths.first().map(|p| p.adj_index).ok_or(PathError::NoPaths)
    }

    /// Resolves a whole path list, failing on the first unresolvable path.
    fn resolve_all(
        &self,
        paths: &[RoutePathDescriptor],
    ) -> Result<Vec<ForwardingPath>, PathError> {
        if paths.is_empty() {
            return Err(PathError::NoPaths);
        }
        paths.iter().map(|p| self.resolve(p)).collect()
    }
}
