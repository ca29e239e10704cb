//! In-memory adjacency table used as the daemon's path resolver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use tunterm_types::{AdjIndex, IpAddress, SwIfIndex};

use super::types::{ForwardingPath, PathError, RoutePathDescriptor, RoutePathResolver};
use crate::host::InterfaceTable;

#[derive(Debug, Default)]
struct Adjacencies {
    by_neighbor: HashMap<(SwIfIndex, IpAddress), AdjIndex>,
    next: u32,
}

/// Resolves attached next hops to adjacencies, allocating a stable index per
/// (interface, next hop) on first use.
pub struct AdjacencyTable {
    interfaces: Arc<dyn InterfaceTable>,
    adjacencies: Mutex<Adjacencies>,
}

impl AdjacencyTable {
    pub fn new(interfaces: Arc<dyn InterfaceTable>) -> Self {
        Self {
            interfaces,
            adjacencies: Mutex::new(Adjacencies::default()),
        }
    }

    /// Drops the adjacency of a neighbor; the next resolution allocates a
    /// fresh one.
    pub fn withdraw(&self, sw_if_index: SwIfIndex, next_hop: IpAddress) -> Option<AdjIndex> {
        self.adjacencies
            .lock()
            .ok()?
            .by_neighbor
            .remove(&(sw_if_index, next_hop))
    }

    pub fn adjacency_count(&self) -> usize {
        self.adjacencies
            .lock()
            .map(|a| a.by_neighbor.len())
            .unwrap_or(0)
    }
}

impl RoutePathResolver for AdjacencyTable {
    fn resolve(&self, path: &RoutePathDescriptor) -> Result<ForwardingPath, PathError> {
        let sw_if_index = path
            .sw_if_index
            .ok_or_else(|| PathError::Unresolved(path.to_string()))?;

        if !self.interfaces.is_live(sw_if_index) {
            return Err(PathError::InvalidInterface(sw_if_index));
        }

        let mut adj = self
            .adjacencies
            .lock()
            .map_err(|_| PathError::Unresolved(path.to_string()))?;
        let next = adj.next;
        let adj_index = *adj
            .by_neighbor
            .entry((sw_if_index, path.next_hop))
            .or_insert(AdjIndex::new(next));
        if adj_index.as_u32() == next {
            adj.next += 1;
            debug!(%sw_if_index, next_hop = %path.next_hop, %adj_index, "allocated adjacency");
        }

        Ok(ForwardingPath {
            sw_if_index,
            next_hop: path.next_hop,
            adj_index,
        })
    }
}
