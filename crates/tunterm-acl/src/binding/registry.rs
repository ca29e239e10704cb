//! Binding registry: interface to table slots and feature toggling.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info};
use tunterm_types::{AddressFamily, SwIfIndex, TableIndex, INDEX_NONE};

use super::types::{BindingError, BindingStats, InterfaceBinding};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::host::{FeatureArc, InterfaceTable};
use crate::table::TableManager;

const SOURCE: &str = "BindingRegistry";

/// Header line of the interface listing.
pub const SHOW_INTERFACES_HEADER: &str = "Interface\tIndex\tIPv4 Tunterm Index\tIPv6 Tunterm Index";

/// Maps each interface, per address family, to at most one table and owns
/// the enable/disable transitions of the bypass feature.
pub struct BindingRegistry {
    bindings: BTreeMap<SwIfIndex, InterfaceBinding>,
    interfaces: Arc<dyn InterfaceTable>,
    features: Arc<dyn FeatureArc>,
    stats: BindingStats,
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("bindings", &self.bindings)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl BindingRegistry {
    pub fn new(interfaces: Arc<dyn InterfaceTable>, features: Arc<dyn FeatureArc>) -> Self {
        Self {
            bindings: BTreeMap::new(),
            interfaces,
            features,
            stats: BindingStats::default(),
        }
    }

    /// Binding record of an interface; untouched interfaces read as the
    /// default (both slots empty, feature off).
    pub fn binding(&self, sw_if_index: SwIfIndex) -> InterfaceBinding {
        self.bindings.get(&sw_if_index).copied().unwrap_or_default()
    }

    pub fn table_for(&self, sw_if_index: SwIfIndex, af: AddressFamily) -> Option<TableIndex> {
        self.bindings.get(&sw_if_index).and_then(|b| b.slot(af))
    }

    /// First interface (and the slot family) still referencing `table`.
    pub fn references(&self, table: TableIndex) -> Option<(SwIfIndex, AddressFamily)> {
        self.bindings.iter().find_map(|(sw_if_index, b)| {
            [AddressFamily::V4, AddressFamily::V6]
                .into_iter()
                .find(|af| b.slot(*af) == Some(table))
                .map(|af| (*sw_if_index, af))
        })
    }

    /// Every interface touched so far, in index order.
    pub fn interfaces(&self) -> impl Iterator<Item = (SwIfIndex, &InterfaceBinding)> + '_ {
        self.bindings.iter().map(|(idx, b)| (*idx, b))
    }

    pub fn stats(&self) -> &BindingStats {
        &self.stats
    }

    /// Attaches `table` to (or detaches it from) an interface.
    ///
    /// Attach writes the slot of the table's family, then enables the bypass
    /// feature if the interface does not have it yet. Detach disables the
    /// feature first when this is the last bound table, then clears the
    /// slot; a failed disable leaves the binding in place.
    pub fn attach_or_detach(
        &mut self,
        sw_if_index: SwIfIndex,
        table: Option<TableIndex>,
        is_add: bool,
        tables: &TableManager,
    ) -> Result<(), BindingError> {
        let result = self.try_attach_or_detach(sw_if_index, table, is_add, tables);

        let action = if is_add { "attach" } else { "detach" };
        let record = AuditRecord::new(AuditCategory::NetworkConfig, SOURCE, action)
            .with_object_type("interface")
            .with_object_id(sw_if_index.to_string())
            .with_details(serde_json::json!({
                "table": TableIndex::to_wire(table),
            }));
        match &result {
            Ok(()) => {
                audit_log!(record.with_outcome(AuditOutcome::Success));
            }
            Err(e) => {
                audit_log!(record.with_error(e.to_string()));
            }
        }
        result
    }

    fn try_attach_or_detach(
        &mut self,
        sw_if_index: SwIfIndex,
        table: Option<TableIndex>,
        is_add: bool,
        tables: &TableManager,
    ) -> Result<(), BindingError> {
        let table = table.ok_or(BindingError::SentinelTable)?;
        if !self.interfaces.is_live(sw_if_index) {
            return Err(BindingError::InvalidInterface(sw_if_index));
        }
        let af = tables.family(table).ok_or(BindingError::NoSuchTable(table))?;
        let binding = self.binding(sw_if_index);

        if is_add {
            self.attach(sw_if_index, binding, table, af)
        } else {
            self.detach(sw_if_index, binding, table, af)
        }
    }

    fn attach(
        &mut self,
        sw_if_index: SwIfIndex,
        mut binding: InterfaceBinding,
        table: TableIndex,
        af: AddressFamily,
    ) -> Result<(), BindingError> {
        match binding.slot(af) {
            Some(bound) if bound == table => {
                debug!(%sw_if_index, %table, "table already attached");
                return Ok(());
            }
            Some(bound) => {
                return Err(BindingError::SlotInUse {
                    sw_if_index,
                    af,
                    bound,
                })
            }
            None => {}
        }

        *binding.slot_mut(af) = Some(table);
        let previous = self.bindings.insert(sw_if_index, binding);

        if !self.features.is_enabled(sw_if_index) {
            if let Err(e) = self.features.enable_disable(sw_if_index, true) {
                match previous {
                    Some(previous) => self.bindings.insert(sw_if_index, previous),
                    None => self.bindings.remove(&sw_if_index),
                };
                return Err(e.into());
            }
            self.stats.feature_enables += 1;
            info!(%sw_if_index, "enabled tunterm bypass");
        }
        binding.feature_enabled = true;
        self.bindings.insert(sw_if_index, binding);

        self.stats.attaches += 1;
        Ok(())
    }

    fn detach(
        &mut self,
        sw_if_index: SwIfIndex,
        mut binding: InterfaceBinding,
        table: TableIndex,
        af: AddressFamily,
    ) -> Result<(), BindingError> {
        if binding.slot(af) != Some(table) {
            return Err(BindingError::NotBound { sw_if_index, table });
        }

        if binding.slot(af.other()).is_none() {
            self.features.enable_disable(sw_if_index, false)?;
            binding.feature_enabled = false;
            self.stats.feature_disables += 1;
            info!(%sw_if_index, "disabled tunterm bypass");
        }

        *binding.slot_mut(af) = None;
        self.bindings.insert(sw_if_index, binding);
        self.stats.detaches += 1;
        Ok(())
    }

    /// The interface listing: a header, then one line per interface with
    /// the bypass feature enabled. Unset slots print as the wire sentinel.
    pub fn show_interfaces(&self) -> String {
        let mut out = String::from(SHOW_INTERFACES_HEADER);
        for sw_if_index in self.interfaces.interfaces() {
            if !self.features.is_enabled(sw_if_index) {
                continue;
            }
            let binding = self.binding(sw_if_index);
            let name = self
                .interfaces
                .name(sw_if_index)
                .unwrap_or_else(|| format!("sw_if_index{sw_if_index}"));
            let _ = write!(
                out,
                "\n{}\t{}\t{}\t{}",
                name,
                sw_if_index,
                binding.v4.map(|t| t.as_u32()).unwrap_or(INDEX_NONE),
                binding.v6.map(|t| t.as_u32()).unwrap_or(INDEX_NONE),
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fib::{AdjacencyTable, RoutePathDescriptor};
    use crate::host::{FeatureFlags, InterfaceMap};
    use crate::table::TunTermRule;
    use pretty_assertions::assert_eq;

    const ETH1: SwIfIndex = SwIfIndex::new(1);
    const ETH2: SwIfIndex = SwIfIndex::new(2);

    struct Fixture {
        tables: TableManager,
        registry: BindingRegistry,
        features: Arc<FeatureFlags>,
        v4: TableIndex,
        v6: TableIndex,
    }

    fn fixture() -> Fixture {
        let interfaces = Arc::new(InterfaceMap::new());
        interfaces.add(ETH1, "eth1");
        interfaces.add(ETH2, "eth2");
        let features = Arc::new(FeatureFlags::new());
        let resolver = AdjacencyTable::new(interfaces.clone());

        let mut tables = TableManager::new();
        let v4 = tables
            .add_or_replace(
                AddressFamily::V4,
                &[TunTermRule::new(
                    "10.0.0.5".parse().unwrap(),
                    RoutePathDescriptor::via(ETH2, "192.168.1.1".parse().unwrap()),
                )],
                None,
                &resolver,
            )
            .unwrap();
        let v6 = tables
            .add_or_replace(
                AddressFamily::V6,
                &[TunTermRule::new(
                    "2001:db8::5".parse().unwrap(),
                    RoutePathDescriptor::via(ETH2, "fe80::1".parse().unwrap()),
                )],
                None,
                &resolver,
            )
            .unwrap();

        Fixture {
            tables,
            registry: BindingRegistry::new(interfaces, features.clone()),
            features,
            v4,
            v6,
        }
    }

    #[test]
    fn test_attach_enables_feature_once() {
        let mut f = fixture();
        f.registry
            .attach_or_detach(ETH1, Some(f.v6), true, &f.tables)
            .unwrap();
        f.registry
            .attach_or_detach(ETH1, Some(f.v4), true, &f.tables)
            .unwrap();

        assert_eq!(f.features.transitions(), vec![(ETH1, true)]);
        assert_eq!(
            f.registry.binding(ETH1),
            InterfaceBinding {
                v4: Some(f.v4),
                v6: Some(f.v6),
                feature_enabled: true,
            }
        );
    }

    #[test]
    fn test_detach_last_table_disables_feature() {
        let mut f = fixture();
        f.registry
            .attach_or_detach(ETH1, Some(f.v4), true, &f.tables)
            .unwrap();
        f.registry
            .attach_or_detach(ETH1, Some(f.v6), true, &f.tables)
            .unwrap();

        f.registry
            .attach_or_detach(ETH1, Some(f.v4), false, &f.tables)
            .unwrap();
        assert!(f.features.is_enabled(ETH1));

        f.registry
            .attach_or_detach(ETH1, Some(f.v6), false, &f.tables)
            .unwrap();
        assert!(!f.features.is_enabled(ETH1));
        assert_eq!(f.features.transitions(), vec![(ETH1, true), (ETH1, false)]);
        assert!(f.registry.binding(ETH1).is_empty());
    }

    #[test]
    fn test_detach_unbound_table() {
        let mut f = fixture();
        f.registry
            .attach_or_detach(ETH1, Some(f.v4), true, &f.tables)
            .unwrap();
        assert_eq!(
            f.registry.attach_or_detach(ETH1, Some(f.v6), false, &f.tables),
            Err(BindingError::NotBound {
                sw_if_index: ETH1,
                table: f.v6,
            })
        );
        assert_eq!(f.registry.table_for(ETH1, AddressFamily::V4), Some(f.v4));
    }

    #[test]
    fn test_validation_errors() {
        let mut f = fixture();
        assert_eq!(
            f.registry.attach_or_detach(ETH1, None, true, &f.tables),
            Err(BindingError::SentinelTable)
        );
        assert_eq!(
            f.registry
                .attach_or_detach(SwIfIndex::new(9), Some(f.v4), true, &f.tables),
            Err(BindingError::InvalidInterface(SwIfIndex::new(9)))
        );
        assert_eq!(
            f.registry
                .attach_or_detach(ETH1, Some(TableIndex::new(7)), true, &f.tables),
            Err(BindingError::NoSuchTable(TableIndex::new(7)))
        );
        assert!(f.features.transitions().is_empty());
        assert_eq!(f.registry.interfaces().count(), 0);
    }

    #[test]
    fn test_rejected_requests_leave_no_record() {
        let mut f = fixture();
        let missing = TableIndex::new(7);
        for is_add in [true, false] {
            assert_eq!(
                f.registry.attach_or_detach(ETH2, Some(missing), is_add, &f.tables),
                Err(BindingError::NoSuchTable(missing))
            );
        }
        assert!(matches!(
            f.registry.attach_or_detach(ETH2, Some(f.v4), false, &f.tables),
            Err(BindingError::NotBound { .. })
        ));
        assert_eq!(f.registry.interfaces().count(), 0);
        assert_eq!(f.registry.references(f.v4), None);
    }

    #[test]
    fn test_first_touch_creates_both_slots() {
        let mut f = fixture();
        f.registry
            .attach_or_detach(ETH1, Some(f.v4), true, &f.tables)
            .unwrap();
        assert_eq!(f.registry.table_for(ETH1, AddressFamily::V6), None);
        assert_eq!(f.registry.interfaces().count(), 1);
    }

    #[test]
    fn test_attach_to_occupied_slot() {
        let mut f = fixture();
        let resolver = AdjacencyTable::new(Arc::new(InterfaceMap::new()));
        let other = f
            .tables
            .add_or_replace(AddressFamily::V4, &[], None, &resolver)
            .unwrap();

        f.registry
            .attach_or_detach(ETH1, Some(f.v4), true, &f.tables)
            .unwrap();
        f.registry
            .attach_or_detach(ETH1, Some(f.v4), true, &f.tables)
            .unwrap();
        assert_eq!(
            f.registry
                .attach_or_detach(ETH1, Some(other), true, &f.tables),
            Err(BindingError::SlotInUse {
                sw_if_index: ETH1,
                af: AddressFamily::V4,
                bound: f.v4,
            })
        );
        assert_eq!(f.registry.stats().attaches, 1);
    }

    #[test]
    fn test_failed_enable_restores_slot() {
        let mut f = fixture();
        f.features.fail_on(ETH1);
        assert!(matches!(
            f.registry.attach_or_detach(ETH1, Some(f.v4), true, &f.tables),
            Err(BindingError::Feature(_))
        ));
        assert_eq!(f.registry.binding(ETH1), InterfaceBinding::default());
        assert_eq!(f.registry.interfaces().count(), 0);
    }

    #[test]
    fn test_failed_disable_keeps_binding() {
        let mut f = fixture();
        f.registry
            .attach_or_detach(ETH1, Some(f.v4), true, &f.tables)
            .unwrap();
        f.features.fail_on(ETH1);
        assert!(f
            .registry
            .attach_or_detach(ETH1, Some(f.v4), false, &f.tables)
            .is_err());
        assert_eq!(f.registry.table_for(ETH1, AddressFamily::V4), Some(f.v4));
    }

    #[test]
    fn test_references() {
        let mut f = fixture();
        assert_eq!(f.registry.references(f.v6), None);
        f.registry
            .attach_or_detach(ETH2, Some(f.v6), true, &f.tables)
            .unwrap();
        assert_eq!(f.registry.references(f.v6), Some((ETH2, AddressFamily::V6)));
    }

    #[test]
    fn test_show_interfaces() {
        let mut f = fixture();
        f.registry
            .attach_or_detach(ETH2, Some(f.v6), true, &f.tables)
            .unwrap();

        let out = f.registry.show_interfaces();
        let eth2 = format!("eth2\t2\t4294967295\t{}", f.v6);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec![SHOW_INTERFACES_HEADER, eth2.as_str()]);
    }
}
