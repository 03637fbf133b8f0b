//! SQLite storage backend.
//!
//! # Responsibility
//! - Persist versioned rows in one SQLite file per opened store.
//! - Apply the backend's own storage migrations before first use.
//!
//! # Invariants
//! - Storage version is tracked via `PRAGMA user_version`.
//! - Commit runs inside one transaction; a failed commit leaves no partial
//!   state behind.
//!
//! Row payloads are JSON field maps; the layout is this backend's private
//! concern and carries its own version, independent of the caller's schema.

use super::{apply_change, Backend, BackendError, BackendResult, ChangeSet, SaveReport, StoredRow};
use crate::model::entity::{Entity, EntityId};
use crate::model::value::Value;
use log::{error, info};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

const STORAGE_VERSION: u32 = 1;
const INIT_SQL: &str = include_str!("0001_rows.sql");

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Opens (or creates) the storage file and brings it up to the current
    /// storage version.
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        let started_at = Instant::now();
        info!("event=backend_open module=backend status=start kind=disk");

        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=backend_open module=backend status=error kind=disk duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err.into());
            }
        };

        match bootstrap(&conn) {
            Ok(()) => {
                info!(
                    "event=backend_open module=backend status=ok kind=disk duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Self { conn })
            }
            Err(err) => {
                error!(
                    "event=backend_open module=backend status=error kind=disk duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}

fn bootstrap(conn: &Connection) -> BackendResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;

    let db_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if db_version > STORAGE_VERSION {
        return Err(BackendError::UnsupportedSchemaVersion {
            db_version,
            latest_supported: STORAGE_VERSION,
        });
    }
    if db_version < STORAGE_VERSION {
        conn.execute_batch(INIT_SQL)?;
        conn.execute_batch(&format!("PRAGMA user_version = {STORAGE_VERSION};"))?;
    }
    Ok(())
}

fn parse_row(entity: &str, uuid_text: &str, version: i64, data: &str) -> BackendResult<StoredRow> {
    let uuid = Uuid::parse_str(uuid_text).map_err(|_| {
        BackendError::InvalidData(format!("invalid uuid value `{uuid_text}` in rows.uuid"))
    })?;
    let values: BTreeMap<String, Value> = serde_json::from_str(data)?;
    Ok(StoredRow {
        entity: Entity::detached(entity, EntityId::permanent(uuid), values),
        version: version.max(0) as u64,
    })
}

impl Backend for SqliteBackend {
    fn label(&self) -> &'static str {
        "disk"
    }

    fn rows(&self, entity: &str) -> BackendResult<BTreeMap<Uuid, StoredRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uuid, version, data FROM rows WHERE entity = ?1;")?;
        let mut rows = stmt.query(params![entity])?;

        let mut result = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let uuid_text: String = row.get(0)?;
            let version: i64 = row.get(1)?;
            let data: String = row.get(2)?;
            let stored = parse_row(entity, &uuid_text, version, &data)?;
            result.insert(stored.entity.id().uuid(), stored);
        }
        Ok(result)
    }

    fn commit(&mut self, changes: &ChangeSet) -> BackendResult<SaveReport> {
        let started_at = Instant::now();
        let mut report = SaveReport::default();

        // Materialize only the affected rows, run the shared versioning
        // bookkeeping on them, then write the results back transactionally.
        let mut touched: BTreeMap<String, BTreeMap<Uuid, StoredRow>> = BTreeMap::new();
        let tx = self.conn.transaction()?;
        for change in changes.iter() {
            let entity_name = change.entity.entity_name().to_string();
            let uuid = change.entity.id().uuid();
            let table = touched.entry(entity_name.clone()).or_default();

            if !table.contains_key(&uuid) {
                let existing = tx
                    .query_row(
                        "SELECT version, data FROM rows WHERE entity = ?1 AND uuid = ?2;",
                        params![entity_name, uuid.to_string()],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                    )
                    .map(Some)
                    .or_else(|err| match err {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                if let Some((version, data)) = existing {
                    let stored = parse_row(&entity_name, &uuid.to_string(), version, &data)?;
                    table.insert(uuid, stored);
                }
            }

            let before = table.contains_key(&uuid);
            apply_change(table, change, &mut report);

            match table.get(&uuid) {
                Some(stored) => {
                    let data = serde_json::to_string(stored.entity.values())?;
                    tx.execute(
                        "INSERT OR REPLACE INTO rows (entity, uuid, version, data)
                         VALUES (?1, ?2, ?3, ?4);",
                        params![entity_name, uuid.to_string(), stored.version as i64, data],
                    )?;
                }
                None if before => {
                    tx.execute(
                        "DELETE FROM rows WHERE entity = ?1 AND uuid = ?2;",
                        params![entity_name, uuid.to_string()],
                    )?;
                }
                None => {}
            }
        }
        tx.commit()?;

        info!(
            "event=backend_commit module=backend status=ok kind=disk changes={} conflicts={} duration_ms={}",
            report.committed,
            report.conflicts.len(),
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    fn assign_permanent(&mut self, _entity: &str, id: EntityId) -> BackendResult<EntityId> {
        Ok(id.promoted())
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteBackend;
    use crate::backend::{Backend, ChangeKind, ChangeSet, RowChange};
    use crate::model::entity::{Entity, EntityId};
    use crate::model::value::Value;
    use uuid::Uuid;

    fn person(name: &str) -> Entity {
        let mut entity = Entity::new("Person", EntityId::temporary(), Uuid::new_v4());
        entity.set("name", name);
        entity
    }

    #[test]
    fn rows_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite3");
        let entity = person("alice");

        {
            let mut backend = SqliteBackend::open(&path).unwrap();
            let mut set = ChangeSet::default();
            set.push(RowChange {
                kind: ChangeKind::Insert,
                entity: entity.clone(),
                base_version: None,
            });
            backend.commit(&set).unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        let rows = backend.rows("Person").unwrap();
        let stored = rows.get(&entity.id().uuid()).expect("row should persist");
        assert_eq!(stored.entity.get("name"), &Value::Text("alice".into()));
        assert_eq!(stored.version, 1);
        assert!(stored.entity.id().is_permanent());
    }

    #[test]
    fn delete_removes_the_stored_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite3");
        let entity = person("alice");

        let mut backend = SqliteBackend::open(&path).unwrap();
        let mut set = ChangeSet::default();
        set.push(RowChange {
            kind: ChangeKind::Insert,
            entity: entity.clone(),
            base_version: None,
        });
        backend.commit(&set).unwrap();

        let mut set = ChangeSet::default();
        set.push(RowChange {
            kind: ChangeKind::Delete,
            entity: entity.clone(),
            base_version: Some(1),
        });
        backend.commit(&set).unwrap();

        assert!(backend.rows("Person").unwrap().is_empty());
    }
}
