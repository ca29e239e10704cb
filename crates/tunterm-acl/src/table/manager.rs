//! Table manager: classify table lifecycle and batch session replacement.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use tunterm_types::{AddressFamily, TableIndex};

use super::types::{
    RedirectSession, SessionAction, TableError, TableManagerStats, TunTermRule,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::binding::BindingRegistry;
use crate::classify::{ClassifyEntry, ClassifyGeometry, ClassifyMain};
use crate::fib::{PathError, RoutePathResolver};

const SOURCE: &str = "TableManager";

/// Owns every tunterm classify table, its address family and its sessions.
#[derive(Debug, Clone, Default)]
pub struct TableManager {
    classify: ClassifyMain,
    families: BTreeMap<TableIndex, AddressFamily>,
    sessions: BTreeMap<TableIndex, Vec<RedirectSession>>,
    stats: TableManagerStats,
}

impl TableManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address family of a table, `None` if the table does not exist.
    pub fn family(&self, table: TableIndex) -> Option<AddressFamily> {
        self.families.get(&table).copied()
    }

    pub fn sessions(&self, table: TableIndex) -> &[RedirectSession] {
        self.sessions.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableIndex, AddressFamily)> + '_ {
        self.families.iter().map(|(t, af)| (*t, *af))
    }

    pub fn table_count(&self) -> usize {
        self.families.len()
    }

    pub fn classifier(&self) -> &ClassifyMain {
        &self.classify
    }

    pub fn stats(&self) -> &TableManagerStats {
        &self.stats
    }

    /// Creates a table (when `table` is `None`) or replaces the session set
    /// of an existing one.
    ///
    /// Every rule is resolved and validated into a staging list before the
    /// live table is touched; the first failing rule aborts the batch and
    /// leaves the table exactly as it was. On success the old sessions are
    /// cleared and the staged ones installed. Two rules with the same
    /// destination collapse into one session carrying the later rule's paths.
    pub fn add_or_replace(
        &mut self,
        af: AddressFamily,
        rules: &[TunTermRule],
        table: Option<TableIndex>,
        resolver: &dyn RoutePathResolver,
    ) -> Result<TableIndex, TableError> {
        let result = self.try_add_or_replace(af, rules, table, resolver);

        let category = if table.is_some() {
            AuditCategory::ResourceModify
        } else {
            AuditCategory::ResourceCreate
        };
        let record = AuditRecord::new(category, SOURCE, "add_replace")
            .with_object_type("tunterm_acl")
            .with_details(serde_json::json!({
                "address_family": af.to_string(),
                "rules": rules.len(),
            }));
        match &result {
            Ok(index) => {
                audit_log!(record
                    .with_outcome(AuditOutcome::Success)
                    .with_object_id(index.to_string()));
            }
            Err(e) => {
                self.stats.batches_rejected += 1;
                let record = match table {
                    Some(t) => record.with_object_id(t.to_string()),
                    None => record,
                };
                audit_log!(record.with_error(e.to_string()));
            }
        }
        result
    }

    fn try_add_or_replace(
        &mut self,
        af: AddressFamily,
        rules: &[TunTermRule],
        table: Option<TableIndex>,
        resolver: &dyn RoutePathResolver,
    ) -> Result<TableIndex, TableError> {
        if let Some(t) = table {
            let table_family = self.family(t).ok_or(TableError::NoSuchTable(t))?;
            if table_family != af {
                return Err(TableError::FamilyMismatch {
                    table: t,
                    table_family,
                    requested: af,
                });
            }
        }

        let staged = Self::stage(af, rules, resolver)?;

        let (index, created) = match table {
            Some(t) => (t, false),
            None => {
                let t = self.classify.add_table(ClassifyGeometry::for_family(af));
                self.families.insert(t, af);
                debug!(table = %t, %af, "created classify table");
                (t, true)
            }
        };

        if let Err(e) = self.commit(index, staged) {
            if created {
                self.families.remove(&index);
                let _ = self.classify.delete_table(index);
            }
            return Err(e);
        }

        if created {
            self.stats.tables_created += 1;
        } else {
            self.stats.replaces += 1;
        }
        Ok(index)
    }

    /// Resolves and validates every rule without touching any table.
    fn stage(
        af: AddressFamily,
        rules: &[TunTermRule],
        resolver: &dyn RoutePathResolver,
    ) -> Result<Vec<RedirectSession>, TableError> {
        let geometry = ClassifyGeometry::for_family(af);
        let mut staged: Vec<RedirectSession> = Vec::with_capacity(rules.len());

        for (rule_idx, rule) in rules.iter().enumerate() {
            let paths = resolver
                .resolve_all(&rule.paths)
                .map_err(|e| path_error(rule_idx, e))?;

            if rule.dst.family() != af {
                return Err(TableError::RuleFamilyMismatch {
                    rule: rule_idx,
                    expected: af,
                    found: rule.dst.family(),
                });
            }

            let adj_index = resolver
                .contribute_forwarding(&paths)
                .map_err(|e| path_error(rule_idx, e))?;

            let session = RedirectSession {
                dst: rule.dst,
                action: SessionAction::Redirect,
                descriptors: rule.paths.clone(),
                paths,
                adj_index,
                match_buf: geometry.session_match(&rule.dst),
            };

            match staged.iter_mut().find(|s| s.dst == rule.dst) {
                Some(existing) => *existing = session,
                None => staged.push(session),
            }
        }

        Ok(staged)
    }

    /// Swaps the staged sessions into the live table. If installing fails
    /// part way, the previous session set is put back.
    fn commit(&mut self, table: TableIndex, staged: Vec<RedirectSession>) -> Result<(), TableError> {
        let previous = self.sessions.remove(&table).unwrap_or_default();
        self.clear_classify(table, &previous);

        for (installed, session) in staged.iter().enumerate() {
            let entry = ClassifyEntry::set_metadata(session.adj_index.as_u32());
            if let Err(e) = self.classify.add_session(table, &session.match_buf, entry) {
                warn!(%table, error = %e, "session install failed, restoring previous sessions");
                self.clear_classify(table, &staged[..installed]);
                self.install_classify(table, &previous);
                self.sessions.insert(table, previous);
                return Err(e.into());
            }
        }

        self.stats.sessions_installed += staged.len() as u64;
        self.sessions.insert(table, staged);
        Ok(())
    }

    fn clear_classify(&mut self, table: TableIndex, sessions: &[RedirectSession]) {
        for session in sessions {
            if let Err(e) = self.classify.del_session(table, &session.match_buf) {
                warn!(%table, dst = %session.dst, error = %e, "session already gone");
            }
        }
    }

    fn install_classify(&mut self, table: TableIndex, sessions: &[RedirectSession]) {
        for session in sessions {
            let entry = ClassifyEntry::set_metadata(session.adj_index.as_u32());
            if let Err(e) = self.classify.add_session(table, &session.match_buf, entry) {
                warn!(%table, dst = %session.dst, error = %e, "failed to restore session");
            }
        }
    }

    /// Deletes a table. Refused while any interface still binds it.
    pub fn delete_table(
        &mut self,
        table: Option<TableIndex>,
        bindings: &BindingRegistry,
    ) -> Result<(), TableError> {
        let result = self.try_delete_table(table, bindings);

        let record = AuditRecord::new(AuditCategory::ResourceDelete, SOURCE, "delete_table")
            .with_object_type("tunterm_acl")
            .with_object_id(table.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string()));
        match &result {
            Ok(()) => {
                audit_log!(record.with_outcome(AuditOutcome::Success));
            }
            Err(e @ TableError::InUse { .. }) => {
                audit_log!(record.denied(e.to_string()));
            }
            Err(e) => {
                audit_log!(record.with_error(e.to_string()));
            }
        }
        result
    }

    fn try_delete_table(
        &mut self,
        table: Option<TableIndex>,
        bindings: &BindingRegistry,
    ) -> Result<(), TableError> {
        let table = table.ok_or(TableError::SentinelTable)?;

        if let Some((sw_if_index, _)) = bindings.references(table) {
            return Err(TableError::InUse { table, sw_if_index });
        }
        if !self.families.contains_key(&table) {
            return Err(TableError::NoSuchTable(table));
        }

        let sessions = self.sessions.remove(&table).unwrap_or_default();
        self.clear_classify(table, &sessions);
        self.classify.delete_table(table)?;
        self.families.remove(&table);
        self.stats.tables_deleted += 1;
        Ok(())
    }

    /// Re-resolves the paths of every session after a forwarding change and
    /// rewrites the metadata of sessions whose adjacency moved. Sessions
    /// whose paths no longer resolve keep their previous adjacency.
    ///
    /// Returns the number of sessions whose adjacency changed.
    pub fn refresh_paths(&mut self, resolver: &dyn RoutePathResolver) -> usize {
        let mut changed = 0;
        let classify = &mut self.classify;

        for (table, sessions) in self.sessions.iter_mut() {
            for session in sessions.iter_mut() {
                let restacked = resolver.resolve_all(&session.descriptors).and_then(|paths| {
                    resolver
                        .contribute_forwarding(&paths)
                        .map(|adj| (paths, adj))
                });
                let (paths, adj_index) = match restacked {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(%table, dst = %session.dst, error = %e, "session paths no longer resolve");
                        continue;
                    }
                };

                if adj_index == session.adj_index {
                    session.paths = paths;
                    continue;
                }

                // Paths and adjacency move together, only once the classifier
                // holds the new adjacency.
                let entry = ClassifyEntry::set_metadata(adj_index.as_u32());
                match classify.add_session(*table, &session.match_buf, entry) {
                    Ok(()) => {
                        debug!(%table, dst = %session.dst, from = %session.adj_index, to = %adj_index, "restacked session");
                        session.paths = paths;
                        session.adj_index = adj_index;
                        changed += 1;
                    }
                    Err(e) => warn!(%table, dst = %session.dst, error = %e, "restack failed"),
                }
            }
        }
        changed
    }
}

fn path_error(rule: usize, e: PathError) -> TableError {
    match e {
        PathError::NoPaths => TableError::NoPaths { rule },
        source => TableError::Path { rule, source },
    }
}
