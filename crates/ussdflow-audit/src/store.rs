//! Audit store contract and SQLite implementation.
//!
//! Wraps a single rusqlite Connection in a Mutex, configures WAL mode,
//! and provides the two insert modes the pipeline needs: transactional
//! all-or-nothing for live batches, and conflict-ignoring chunked inserts
//! for spill-file replay.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::Connection;
use tracing::info;

use ussdflow_core::{Result, UssdError};

use crate::record::AuditRecord;

/// Transactional batch persistence for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert the whole batch in one transaction; any failure rolls the
    /// transaction back and leaves the store untouched.
    async fn insert_batch(&self, records: &[AuditRecord]) -> Result<()>;

    /// Insert in one transaction, in fixed-size chunks, silently skipping
    /// rows that collide with the natural unique key. Used by the
    /// recovery path so replaying a batch twice cannot duplicate rows.
    async fn insert_ignore_conflicts(
        &self,
        records: &[AuditRecord],
        chunk_size: usize,
    ) -> Result<()>;
}

/// SQLite-backed [`AuditStore`].
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteAuditStore {
    /// Open (or create) the audit database at the given path.
    pub fn new(path: &Path, table: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| UssdError::Storage(format!("failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| UssdError::Storage(format!("failed to set pragmas: {}", e)))?;

        info!("Audit database opened at {}", path.display());

        Self::with_table(conn, table)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| UssdError::Storage(format!("failed to open in-memory db: {}", e)))?;
        Self::with_table(conn, table)
    }

    fn with_table(conn: Connection, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let store = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        };
        store.with_conn(|conn| store.migrate(conn))?;
        Ok(store)
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| UssdError::Storage("connection lock poisoned".to_string()))?;
        f(&mut conn)
    }

    fn migrate(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id     TEXT NOT NULL,
                msisdn         TEXT NOT NULL,
                menu_name      TEXT NOT NULL,
                params         TEXT NOT NULL DEFAULT '',
                user_input     TEXT NOT NULL DEFAULT '',
                succeeded      INTEGER NOT NULL DEFAULT 0,
                status_message TEXT NOT NULL DEFAULT '',
                created_at     INTEGER NOT NULL,
                UNIQUE (session_id, msisdn, menu_name, created_at)
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_session ON {table} (session_id);
            CREATE INDEX IF NOT EXISTS idx_{table}_msisdn ON {table} (msisdn);",
            table = self.table
        ))
        .map_err(|e| UssdError::Storage(format!("failed to migrate {}: {}", self.table, e)))?;
        Ok(())
    }

    fn insert_rows(
        &self,
        tx: &rusqlite::Transaction<'_>,
        records: &[AuditRecord],
        ignore_conflicts: bool,
    ) -> Result<()> {
        let sql = format!(
            "INSERT {or_ignore} INTO {table}
                (session_id, msisdn, menu_name, params, user_input, succeeded, status_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            or_ignore = if ignore_conflicts { "OR IGNORE" } else { "" },
            table = self.table,
        );
        let mut stmt = tx
            .prepare(&sql)
            .map_err(|e| UssdError::Storage(e.to_string()))?;

        for record in records {
            stmt.execute(rusqlite::params![
                record.session_id,
                record.msisdn,
                record.menu_name,
                record.params,
                record.user_input,
                record.succeeded as i32,
                record.status_message,
                record.created_at.timestamp_micros(),
            ])
            .map_err(|e| UssdError::Storage(format!("failed to insert audit row: {}", e)))?;
        }

        Ok(())
    }

    /// Total number of stored rows.
    pub fn count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(|e| UssdError::Storage(e.to_string()))
        })
    }

    /// Fetch all rows for one session, oldest first.
    pub fn find_by_session(&self, session_id: &str) -> Result<Vec<AuditRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT session_id, msisdn, menu_name, params, user_input,
                            succeeded, status_message, created_at
                     FROM {} WHERE session_id = ?1 ORDER BY created_at ASC",
                    self.table
                ))
                .map_err(|e| UssdError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![session_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i32>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                })
                .map_err(|e| UssdError::Storage(e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                let (session_id, msisdn, menu_name, params, user_input, succeeded, status, micros) =
                    row.map_err(|e| UssdError::Storage(e.to_string()))?;
                let created_at = Utc.timestamp_micros(micros).single().ok_or_else(|| {
                    UssdError::Storage(format!("invalid created_at timestamp: {}", micros))
                })?;
                records.push(AuditRecord {
                    session_id,
                    msisdn,
                    menu_name,
                    params,
                    user_input,
                    succeeded: succeeded != 0,
                    status_message: status,
                    created_at,
                });
            }
            Ok(records)
        })
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn insert_batch(&self, records: &[AuditRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| UssdError::Storage(e.to_string()))?;
            self.insert_rows(&tx, records, false)?;
            tx.commit().map_err(|e| UssdError::Storage(e.to_string()))
        })
    }

    async fn insert_ignore_conflicts(
        &self,
        records: &[AuditRecord],
        chunk_size: usize,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let chunk_size = chunk_size.max(1);
        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| UssdError::Storage(e.to_string()))?;
            for chunk in records.chunks(chunk_size) {
                self.insert_rows(&tx, chunk, true)?;
            }
            tx.commit().map_err(|e| UssdError::Storage(e.to_string()))
        })
    }
}

/// Reject table names that cannot be spliced into SQL as identifiers.
fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(UssdError::Config(format!(
            "invalid audit table name: {:?}",
            table
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str, menu: &str, micros: i64) -> AuditRecord {
        AuditRecord {
            session_id: session_id.to_string(),
            msisdn: "254700111222".to_string(),
            menu_name: menu.to_string(),
            params: "1*2".to_string(),
            user_input: "2".to_string(),
            succeeded: true,
            status_message: String::new(),
            created_at: Utc.timestamp_micros(micros).single().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_batch_and_count() {
        let store = SqliteAuditStore::in_memory("ussd_logs").unwrap();
        let records = vec![record("s1", "home", 1), record("s1", "balance", 2)];
        store.insert_batch(&records).await.unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_empty_batch_is_noop() {
        let store = SqliteAuditStore::in_memory("ussd_logs").unwrap();
        store.insert_batch(&[]).await.unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_by_session_round_trips_fields() {
        let store = SqliteAuditStore::in_memory("ussd_logs").unwrap();
        let records = vec![record("s1", "home", 2), record("s1", "balance", 1)];
        store.insert_batch(&records).await.unwrap();

        let found = store.find_by_session("s1").unwrap();
        assert_eq!(found.len(), 2);
        // Oldest first.
        assert_eq!(found[0].menu_name, "balance");
        assert_eq!(found[1], records[0]);
        assert!(store.find_by_session("other").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plain_insert_rejects_duplicates() {
        let store = SqliteAuditStore::in_memory("ussd_logs").unwrap();
        let records = vec![record("s1", "home", 1)];
        store.insert_batch(&records).await.unwrap();
        assert!(store.insert_batch(&records).await.is_err());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_entirely() {
        let store = SqliteAuditStore::in_memory("ussd_logs").unwrap();
        store.insert_batch(&[record("s1", "home", 1)]).await.unwrap();

        // Second row collides; the fresh first row must roll back with it.
        let batch = vec![record("s2", "home", 5), record("s1", "home", 1)];
        assert!(store.insert_batch(&batch).await.is_err());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_ignore_conflicts_is_idempotent() {
        let store = SqliteAuditStore::in_memory("ussd_logs").unwrap();
        let records: Vec<AuditRecord> = (0..10)
            .map(|i| record("s1", &format!("menu{}", i), i))
            .collect();

        store.insert_ignore_conflicts(&records, 3).await.unwrap();
        assert_eq!(store.count().unwrap(), 10);

        // Replay, as after a crash between commit and spill-file delete.
        store.insert_ignore_conflicts(&records, 3).await.unwrap();
        assert_eq!(store.count().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_ignore_conflicts_keeps_new_rows_from_partial_overlap() {
        let store = SqliteAuditStore::in_memory("ussd_logs").unwrap();
        store.insert_batch(&[record("s1", "home", 1)]).await.unwrap();

        let batch = vec![record("s1", "home", 1), record("s1", "balance", 2)];
        store.insert_ignore_conflicts(&batch, 100).await.unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_custom_table_name() {
        let store = SqliteAuditStore::in_memory("bank_ussd_logs").unwrap();
        store.insert_batch(&[record("s1", "home", 1)]).await.unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        assert!(SqliteAuditStore::in_memory("ussd_logs; DROP TABLE x").is_err());
        assert!(SqliteAuditStore::in_memory("").is_err());
    }

    #[test]
    fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let store = SqliteAuditStore::new(&path, "ussd_logs").unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(path.exists());
    }
}
