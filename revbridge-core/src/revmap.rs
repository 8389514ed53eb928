//! Persistent revision ↔ commit map
//!
//! One SQLite database per bridged repository, WAL mode. The table is
//! append-only: every successfully committed delta records exactly one row,
//! and rows are never rewritten. Resume after a failure re-resolves deltas
//! from the highest recorded revision.

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, SyncError};
use crate::object::ObjectId;

/// Bidirectional association between target revisions and source commits.
pub struct RevisionMap {
    conn: Connection,
}

/// Serializable form of one mapping row (JSON export).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapEntry {
    pub revision: u64,
    pub commit: String,
    pub recorded_at: i64,
}

impl RevisionMap {
    /// Open (or create) the map database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// Ephemeral map for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS revision_map (
                revision INTEGER PRIMARY KEY,
                commit_id BLOB NOT NULL UNIQUE,
                recorded_at INTEGER NOT NULL
            ) WITHOUT ROWID;",
        )?;
        Ok(Self { conn })
    }

    /// Record one mapping. Fails if the revision or the commit is already
    /// mapped; rows are never overwritten.
    pub fn record(&mut self, revision: u64, commit: ObjectId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO revision_map (revision, commit_id, recorded_at)
             VALUES (?1, ?2, ?3)",
            params![revision as i64, commit.as_bytes().as_slice(), now],
        )?;
        if inserted == 0 {
            return Err(SyncError::Database(format!(
                "revision {} or commit {} already mapped",
                revision, commit
            )));
        }
        Ok(())
    }

    /// Commit mapped to a revision, if any.
    pub fn commit_for(&self, revision: u64) -> Result<Option<ObjectId>> {
        let row: Option<Vec<u8>> = self
            .conn
            .prepare_cached("SELECT commit_id FROM revision_map WHERE revision = ?1")?
            .query_row(params![revision as i64], |r| r.get(0))
            .optional()?;
        row.map(|bytes| decode_commit(&bytes)).transpose()
    }

    /// Revision mapped to a commit, if any.
    pub fn revision_for(&self, commit: ObjectId) -> Result<Option<u64>> {
        let row: Option<i64> = self
            .conn
            .prepare_cached("SELECT revision FROM revision_map WHERE commit_id = ?1")?
            .query_row(params![commit.as_bytes().as_slice()], |r| r.get(0))
            .optional()?;
        Ok(row.map(|r| r as u64))
    }

    /// Highest recorded (revision, commit) pair.
    pub fn last_mapped(&self) -> Result<Option<(u64, ObjectId)>> {
        let row: Option<(i64, Vec<u8>)> = self
            .conn
            .prepare_cached(
                "SELECT revision, commit_id FROM revision_map
                 ORDER BY revision DESC LIMIT 1",
            )?
            .query_row([], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        decode_pair(row)
    }

    /// Nearest mapped revision at or before `revision`.
    pub fn nearest_previous_mapped(&self, revision: u64) -> Result<Option<(u64, ObjectId)>> {
        let row: Option<(i64, Vec<u8>)> = self
            .conn
            .prepare_cached(
                "SELECT revision, commit_id FROM revision_map
                 WHERE revision <= ?1 ORDER BY revision DESC LIMIT 1",
            )?
            .query_row(params![revision as i64], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        decode_pair(row)
    }

    /// Number of recorded mappings.
    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM revision_map", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Result<Vec<MapEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT revision, commit_id, recorded_at FROM revision_map ORDER BY revision",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, Vec<u8>>(1)?, r.get::<_, i64>(2)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (revision, commit, recorded_at) = row?;
            entries.push(MapEntry {
                revision: revision as u64,
                commit: decode_commit(&commit)?.to_hex(),
                recorded_at,
            });
        }
        Ok(entries)
    }

    /// Export all entries as pretty JSON (atomic write via temp + rename).
    pub fn export_json(&self, path: &Path) -> Result<()> {
        let entries = self.entries()?;
        let data = serde_json::to_string_pretty(&entries)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Import entries from a JSON export into an empty map.
    pub fn import_json(&mut self, path: &Path) -> Result<()> {
        if !self.is_empty()? {
            return Err(SyncError::Database(
                "refusing to import into a non-empty revision map".to_string(),
            ));
        }
        let data = fs::read_to_string(path)?;
        let entries: Vec<MapEntry> = serde_json::from_str(&data)?;
        for entry in entries {
            let commit = ObjectId::from_hex(&entry.commit)
                .map_err(|e| SyncError::Serialization(e.to_string()))?;
            self.conn.execute(
                "INSERT INTO revision_map (revision, commit_id, recorded_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    entry.revision as i64,
                    commit.as_bytes().as_slice(),
                    entry.recorded_at
                ],
            )?;
        }
        Ok(())
    }
}

fn decode_commit(bytes: &[u8]) -> Result<ObjectId> {
    if bytes.len() != 32 {
        return Err(SyncError::Database(format!(
            "corrupt commit id of {} bytes in revision map",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    Ok(ObjectId::new(arr))
}

fn decode_pair(row: Option<(i64, Vec<u8>)>) -> Result<Option<(u64, ObjectId)>> {
    row.map(|(rev, bytes)| Ok((rev as u64, decode_commit(&bytes)?)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::new([byte; 32])
    }

    #[test]
    fn test_record_and_lookup() {
        let mut map = RevisionMap::open_in_memory().unwrap();
        map.record(5, oid(1)).unwrap();
        map.record(7, oid(2)).unwrap();

        assert_eq!(map.commit_for(5).unwrap(), Some(oid(1)));
        assert_eq!(map.commit_for(6).unwrap(), None);
        assert_eq!(map.revision_for(oid(2)).unwrap(), Some(7));
        assert_eq!(map.last_mapped().unwrap(), Some((7, oid(2))));
        assert_eq!(map.len().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_revision_rejected() {
        let mut map = RevisionMap::open_in_memory().unwrap();
        map.record(1, oid(1)).unwrap();
        assert!(map.record(1, oid(2)).is_err());
        assert!(map.record(2, oid(1)).is_err());
        assert_eq!(map.commit_for(1).unwrap(), Some(oid(1)));
    }

    #[test]
    fn test_nearest_previous_mapped() {
        let mut map = RevisionMap::open_in_memory().unwrap();
        map.record(3, oid(1)).unwrap();
        map.record(8, oid(2)).unwrap();

        assert_eq!(map.nearest_previous_mapped(2).unwrap(), None);
        assert_eq!(map.nearest_previous_mapped(3).unwrap(), Some((3, oid(1))));
        assert_eq!(map.nearest_previous_mapped(7).unwrap(), Some((3, oid(1))));
        assert_eq!(map.nearest_previous_mapped(100).unwrap(), Some((8, oid(2))));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("map.db");

        let mut map = RevisionMap::open(&db).unwrap();
        map.record(1, oid(9)).unwrap();
        drop(map);

        let map = RevisionMap::open(&db).unwrap();
        assert_eq!(map.commit_for(1).unwrap(), Some(oid(9)));
    }

    #[test]
    fn test_export_import_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("map.json");

        let mut map = RevisionMap::open_in_memory().unwrap();
        map.record(2, oid(1)).unwrap();
        map.record(4, oid(2)).unwrap();
        map.export_json(&json).unwrap();

        let mut restored = RevisionMap::open_in_memory().unwrap();
        restored.import_json(&json).unwrap();
        assert_eq!(restored.last_mapped().unwrap(), Some((4, oid(2))));
        assert_eq!(restored.commit_for(2).unwrap(), Some(oid(1)));

        // A second import must be refused.
        assert!(restored.import_json(&json).is_err());
    }
}
