//! The tunterm ACL engine: table manager, binding registry and host seams
//! behind the three control operations.

use std::sync::Arc;

use tracing::info;
use tunterm_types::{AddressFamily, SwIfIndex, TableIndex};

use super::snapshot::DataplaneSnapshot;
use crate::binding::{BindingError, BindingRegistry};
use crate::classify::ClassifyEntry;
use crate::dataplane::DataplaneView;
use crate::fib::RoutePathResolver;
use crate::host::{FeatureArc, InterfaceTable};
use crate::table::{TableError, TableManager, TunTermRule};

/// Owns all tunterm control state. Every mutation goes through `&mut self`,
/// so a single owner (the control sequencer) serializes them.
pub struct TuntermAcl {
    tables: TableManager,
    bindings: BindingRegistry,
    resolver: Arc<dyn RoutePathResolver>,
    generation: u64,
}

impl TuntermAcl {
    pub fn new(
        interfaces: Arc<dyn InterfaceTable>,
        features: Arc<dyn FeatureArc>,
        resolver: Arc<dyn RoutePathResolver>,
    ) -> Self {
        Self {
            tables: TableManager::new(),
            bindings: BindingRegistry::new(interfaces, features),
            resolver,
            generation: 0,
        }
    }

    pub fn tables(&self) -> &TableManager {
        &self.tables
    }

    pub fn bindings(&self) -> &BindingRegistry {
        &self.bindings
    }

    /// Number of successful mutations so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Creates a table (`table == None`) or replaces an existing table's
    /// sessions with `rules`.
    pub fn add_replace(
        &mut self,
        af: AddressFamily,
        table: Option<TableIndex>,
        rules: &[TunTermRule],
    ) -> Result<TableIndex, TableError> {
        let index = self
            .tables
            .add_or_replace(af, rules, table, self.resolver.as_ref())?;
        self.generation += 1;
        Ok(index)
    }

    pub fn delete(&mut self, table: Option<TableIndex>) -> Result<(), TableError> {
        self.tables.delete_table(table, &self.bindings)?;
        self.generation += 1;
        Ok(())
    }

    pub fn interface_add_del(
        &mut self,
        sw_if_index: SwIfIndex,
        table: Option<TableIndex>,
        is_add: bool,
    ) -> Result<(), BindingError> {
        self.bindings
            .attach_or_detach(sw_if_index, table, is_add, &self.tables)?;
        self.generation += 1;
        Ok(())
    }

    /// Restacks sessions after a forwarding change. Returns the number of
    /// sessions whose adjacency moved.
    pub fn refresh_paths(&mut self) -> usize {
        let changed = self.tables.refresh_paths(self.resolver.as_ref());
        if changed > 0 {
            self.generation += 1;
            info!(changed, "restacked redirect sessions");
        }
        changed
    }

    pub fn show_interfaces(&self) -> String {
        self.bindings.show_interfaces()
    }

    /// Immutable copy of everything the redirect node reads.
    pub fn snapshot(&self) -> DataplaneSnapshot {
        DataplaneSnapshot::new(
            self.generation,
            self.bindings.interfaces().map(|(idx, b)| (idx, *b)),
            self.tables.classifier().clone(),
        )
    }
}

impl DataplaneView for TuntermAcl {
    fn table_for(&self, sw_if_index: SwIfIndex, af: AddressFamily) -> Option<TableIndex> {
        self.bindings.table_for(sw_if_index, af)
    }

    fn find_entry(&self, table: TableIndex, data: &[u8]) -> Option<ClassifyEntry> {
        self.tables.classifier().find_entry(table, data).copied()
    }
}
