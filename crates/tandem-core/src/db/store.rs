//! libSQL implementation of the sync store

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite stores versions as i64

use std::path::PathBuf;
use std::sync::Arc;

use libsql::{params, Connection, Row};
use serde_json::Value;
use tokio::sync::Mutex;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{
    CommittedOperation, Operation, OperationId, OperationKind, ResourceKey, ResourceState,
};
use crate::store::{check_commit, OperationLog, SyncStore, VersionStore};

const LOG_COLUMNS: &str = "operation_id, resource_type, resource_id, operation_payload, user_id, \
     version, timestamp, base_version, committed_at";

/// Sync store backed by a libSQL database. Clones share one connection.
#[derive(Debug, Clone)]
pub struct LibSqlStore {
    db: Arc<Mutex<Database>>,
}

impl LibSqlStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open (or create) the database file at `db_path`
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(Database::open(&db_path).await?))
    }

    /// Open an in-memory store (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    async fn stored_version(conn: &Connection, key: &ResourceKey) -> Result<Option<u64>> {
        let mut rows = conn
            .query(
                "SELECT version FROM resource_states WHERE resource_type = ? AND resource_id = ?",
                params![key.resource_type.as_str(), key.resource_id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<i64>(0)? as u64)),
            None => Ok(None),
        }
    }

    async fn write_commit(
        conn: &Connection,
        expected_version: u64,
        state: &ResourceState,
        entry: &CommittedOperation,
    ) -> Result<u64> {
        let key = state.key();
        let updated = conn
            .execute(
                "UPDATE resource_states
                 SET version = ?, data = ?, last_modified = ?, last_modified_by = ?
                 WHERE resource_type = ? AND resource_id = ? AND version = ?",
                params![
                    state.version as i64,
                    serde_json::to_string(&state.data)?,
                    state.last_modified,
                    state.last_modified_by.as_str(),
                    key.resource_type.as_str(),
                    key.resource_id.as_str(),
                    expected_version as i64
                ],
            )
            .await?;

        if updated == 0 {
            return match Self::stored_version(conn, &key).await? {
                Some(actual) => Err(Error::VersionMismatch {
                    expected: expected_version,
                    actual,
                }),
                None => Err(Error::ResourceNotFound(key)),
            };
        }

        let operation = &entry.operation;
        conn.execute(
            &format!(
                "INSERT INTO operation_log ({LOG_COLUMNS}, operation_type)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                operation.id.as_str(),
                operation.resource_type.as_str(),
                operation.resource_id.as_str(),
                serde_json::to_string(&operation.kind)?,
                operation.user_id.as_str(),
                entry.version as i64,
                operation.timestamp,
                operation.base_version as i64,
                entry.committed_at,
                operation.kind.type_name()
            ],
        )
        .await?;

        Ok(state.version)
    }

    fn parse_committed(row: &Row) -> Result<CommittedOperation> {
        let id: String = row.get(0)?;
        let id: OperationId = id
            .parse()
            .map_err(|error| Error::Database(format!("Invalid operation id {id}: {error}")))?;
        let resource_type = row.get::<String>(1)?.parse()?;
        let kind: OperationKind = serde_json::from_str(&row.get::<String>(3)?)?;

        Ok(CommittedOperation {
            operation: Operation {
                id,
                resource_type,
                resource_id: row.get(2)?,
                user_id: row.get(4)?,
                timestamp: row.get(6)?,
                base_version: row.get::<i64>(7)? as u64,
                kind,
            },
            version: row.get::<i64>(5)? as u64,
            committed_at: row.get(8)?,
        })
    }

    async fn collect_operations(mut rows: libsql::Rows) -> Result<Vec<CommittedOperation>> {
        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_committed(&row)?);
        }
        Ok(operations)
    }
}

impl VersionStore for LibSqlStore {
    async fn load_state(&self, key: &ResourceKey) -> Result<Option<ResourceState>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT version, data, last_modified, last_modified_by
                 FROM resource_states WHERE resource_type = ? AND resource_id = ?",
                params![key.resource_type.as_str(), key.resource_id.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(ResourceState {
            resource_type: key.resource_type,
            resource_id: key.resource_id.clone(),
            version: row.get::<i64>(0)? as u64,
            data: serde_json::from_str(&row.get::<String>(1)?)?,
            last_modified: row.get(2)?,
            last_modified_by: row.get(3)?,
        }))
    }

    async fn create_state(&self, state: &ResourceState) -> Result<bool> {
        let data = serde_json::to_string(&state.data)?;
        let db = self.db.lock().await;
        let inserted = db
            .connection()
            .execute(
                "INSERT OR IGNORE INTO resource_states
                 (resource_type, resource_id, version, data, initial_data, last_modified, last_modified_by)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    state.resource_type.as_str(),
                    state.resource_id.as_str(),
                    state.version as i64,
                    data.as_str(),
                    data.as_str(),
                    state.last_modified,
                    state.last_modified_by.as_str()
                ],
            )
            .await?;
        Ok(inserted > 0)
    }
}

impl OperationLog for LibSqlStore {
    async fn operations_after(
        &self,
        key: &ResourceKey,
        version: u64,
    ) -> Result<Vec<CommittedOperation>> {
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM operation_log
                     WHERE resource_type = ? AND resource_id = ? AND version > ?
                     ORDER BY version ASC"
                ),
                params![
                    key.resource_type.as_str(),
                    key.resource_id.as_str(),
                    version as i64
                ],
            )
            .await?;
        Self::collect_operations(rows).await
    }

    async fn recent_operations(
        &self,
        key: &ResourceKey,
        limit: usize,
    ) -> Result<Vec<CommittedOperation>> {
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM operation_log
                     WHERE resource_type = ? AND resource_id = ?
                     ORDER BY version DESC LIMIT ?"
                ),
                params![
                    key.resource_type.as_str(),
                    key.resource_id.as_str(),
                    limit as i64
                ],
            )
            .await?;
        Self::collect_operations(rows).await
    }

    async fn initial_data(&self, key: &ResourceKey) -> Result<Option<Value>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT initial_data FROM resource_states WHERE resource_type = ? AND resource_id = ?",
                params![key.resource_type.as_str(), key.resource_id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String>(0)?)?)),
            None => Ok(None),
        }
    }
}

impl SyncStore for LibSqlStore {
    async fn commit(
        &self,
        expected_version: u64,
        state: &ResourceState,
        entry: &CommittedOperation,
    ) -> Result<u64> {
        check_commit(expected_version, state, entry)?;

        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN IMMEDIATE", ()).await?;

        match Self::write_commit(conn, expected_version, state, entry).await {
            Ok(version) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
                Ok(version)
            }
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                Err(e)
            }
        }
    }
}
