//! Classify table storage.

use std::collections::HashMap;

use ahash::RandomState;
use tunterm_types::TableIndex;

use super::types::{ClassifyEntry, ClassifyGeometry, MatchKey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("classify table {0} does not exist")]
    NoSuchTable(TableIndex),
    #[error("match buffer of {len} bytes ends before the matched bytes ({need} bytes)")]
    MatchTooShort { len: usize, need: usize },
    #[error("no matching session in classify table {0}")]
    NoSuchSession(TableIndex),
}

/// One classify table: its geometry and its sessions.
#[derive(Debug, Clone)]
pub struct ClassifyTable {
    geometry: ClassifyGeometry,
    sessions: HashMap<MatchKey, ClassifyEntry, RandomState>,
}

impl ClassifyTable {
    fn new(geometry: ClassifyGeometry) -> Self {
        Self {
            geometry,
            sessions: HashMap::default(),
        }
    }

    pub fn geometry(&self) -> &ClassifyGeometry {
        &self.geometry
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Looks up the session matching `data`. Does not allocate.
    pub fn find_entry(&self, data: &[u8]) -> Option<&ClassifyEntry> {
        let key = self.geometry.extract_key(data)?;
        self.sessions.get(&key)
    }
}

/// Every classify table known to the host, indexed by [`TableIndex`].
///
/// Indices of deleted tables are reused, lowest first, like a pool.
#[derive(Debug, Clone, Default)]
pub struct ClassifyMain {
    tables: Vec<Option<ClassifyTable>>,
}

impl ClassifyMain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table and returns its index.
    pub fn add_table(&mut self, geometry: ClassifyGeometry) -> TableIndex {
        let table = ClassifyTable::new(geometry);
        match self.tables.iter().position(Option::is_none) {
            Some(free) => {
                self.tables[free] = Some(table);
                TableIndex::new(free as u32)
            }
            None => {
                self.tables.push(Some(table));
                TableIndex::new((self.tables.len() - 1) as u32)
            }
        }
    }

    /// Deletes a table together with any sessions it still holds.
    pub fn delete_table(&mut self, index: TableIndex) -> Result<(), ClassifyError> {
        let slot = self
            .tables
            .get_mut(index.as_usize())
            .filter(|slot| slot.is_some())
            .ok_or(ClassifyError::NoSuchTable(index))?;
        *slot = None;
        Ok(())
    }

    pub fn table(&self, index: TableIndex) -> Option<&ClassifyTable> {
        self.tables.get(index.as_usize()).and_then(Option::as_ref)
    }

    fn table_mut(&mut self, index: TableIndex) -> Result<&mut ClassifyTable, ClassifyError> {
        self.tables
            .get_mut(index.as_usize())
            .and_then(Option::as_mut)
            .ok_or(ClassifyError::NoSuchTable(index))
    }

    pub fn table_count(&self) -> usize {
        self.tables.iter().filter(|t| t.is_some()).count()
    }

    /// Adds a session, or updates the entry of an existing one with the
    /// same masked match.
    pub fn add_session(
        &mut self,
        index: TableIndex,
        match_buf: &[u8],
        entry: ClassifyEntry,
    ) -> Result<(), ClassifyError> {
        let table = self.table_mut(index)?;
        let key = Self::key_of(table, match_buf)?;
        table.sessions.insert(key, entry);
        Ok(())
    }

    /// Removes the session matching `match_buf`.
    pub fn del_session(&mut self, index: TableIndex, match_buf: &[u8]) -> Result<(), ClassifyError> {
        let table = self.table_mut(index)?;
        let key = Self::key_of(table, match_buf)?;
        table
            .sessions
            .remove(&key)
            .map(|_| ())
            .ok_or(ClassifyError::NoSuchSession(index))
    }

    pub fn session_count(&self, index: TableIndex) -> usize {
        self.table(index).map(ClassifyTable::session_count).unwrap_or(0)
    }

    /// Looks up the session of table `index` matching packet `data`.
    pub fn find_entry(&self, index: TableIndex, data: &[u8]) -> Option<&ClassifyEntry> {
        self.table(index)?.find_entry(data)
    }

    fn key_of(table: &ClassifyTable, match_buf: &[u8]) -> Result<MatchKey, ClassifyError> {
        table
            .geometry
            .extract_key(match_buf)
            .ok_or(ClassifyError::MatchTooShort {
                len: match_buf.len(),
                need: table.geometry.key_end(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifyAction;
    use pretty_assertions::assert_eq;
    use tunterm_types::{AddressFamily, IpAddress};

    fn v4_match(addr: &str) -> Vec<u8> {
        let ip: IpAddress = addr.parse().unwrap();
        ClassifyGeometry::for_family(AddressFamily::V4).session_match(&ip)
    }

    #[test]
    fn test_add_and_find() {
        let mut cm = ClassifyMain::new();
        let t = cm.add_table(ClassifyGeometry::for_family(AddressFamily::V4));
        cm.add_session(t, &v4_match("10.0.0.5"), ClassifyEntry::set_metadata(7))
            .unwrap();

        let mut packet = v4_match("10.0.0.5");
        packet.extend_from_slice(&[0u8; 64]);
        let entry = cm.find_entry(t, &packet).unwrap();
        assert_eq!(entry.action, ClassifyAction::SetMetadata);
        assert_eq!(entry.metadata, 7);

        assert!(cm.find_entry(t, &v4_match("10.0.0.6")).is_none());
    }

    #[test]
    fn test_add_session_updates_existing() {
        let mut cm = ClassifyMain::new();
        let t = cm.add_table(ClassifyGeometry::for_family(AddressFamily::V4));
        cm.add_session(t, &v4_match("10.0.0.5"), ClassifyEntry::set_metadata(1))
            .unwrap();
        cm.add_session(t, &v4_match("10.0.0.5"), ClassifyEntry::set_metadata(2))
            .unwrap();
        assert_eq!(cm.session_count(t), 1);
        assert_eq!(cm.find_entry(t, &v4_match("10.0.0.5")).unwrap().metadata, 2);
    }

    #[test]
    fn test_del_session() {
        let mut cm = ClassifyMain::new();
        let t = cm.add_table(ClassifyGeometry::for_family(AddressFamily::V4));
        cm.add_session(t, &v4_match("10.0.0.5"), ClassifyEntry::set_metadata(1))
            .unwrap();
        cm.del_session(t, &v4_match("10.0.0.5")).unwrap();
        assert_eq!(
            cm.del_session(t, &v4_match("10.0.0.5")),
            Err(ClassifyError::NoSuchSession(t))
        );
    }

    #[test]
    fn test_short_match_rejected() {
        let mut cm = ClassifyMain::new();
        let t = cm.add_table(ClassifyGeometry::for_family(AddressFamily::V4));
        assert_eq!(
            cm.add_session(t, &[0u8; 10], ClassifyEntry::set_metadata(1)),
            Err(ClassifyError::MatchTooShort { len: 10, need: 84 })
        );
    }

    #[test]
    fn test_table_index_reuse() {
        let mut cm = ClassifyMain::new();
        let a = cm.add_table(ClassifyGeometry::for_family(AddressFamily::V4));
        let b = cm.add_table(ClassifyGeometry::for_family(AddressFamily::V6));
        assert_eq!((a.as_u32(), b.as_u32()), (0, 1));

        cm.delete_table(a).unwrap();
        assert_eq!(cm.table_count(), 1);
        assert_eq!(cm.delete_table(a), Err(ClassifyError::NoSuchTable(a)));

        let c = cm.add_table(ClassifyGeometry::for_family(AddressFamily::V4));
        assert_eq!(c, a);
    }

    #[test]
    fn test_unknown_table_lookup_misses() {
        let cm = ClassifyMain::new();
        assert!(cm.find_entry(TableIndex::new(4), &[0u8; 128]).is_none());
    }
}
