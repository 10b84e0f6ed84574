//! Flow checkpoint persistence.
//!
//! A flow records its stage before every step that talks to another party, so
//! a restarted node can pick it up where it left off. Backends must make each
//! `save` atomic.

use crate::error::{LedgerError, Result};
use crate::finality::{FlowStage, FollowUp};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flow_id: Uuid,
    pub flow_name: String,
    pub stage: FlowStage,
    /// Work left once the transaction is final.
    pub follow_up: Option<FollowUp>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(flow_id: Uuid, flow_name: &str, stage: FlowStage) -> Self {
        Checkpoint {
            flow_id,
            flow_name: flow_name.to_string(),
            stage,
            follow_up: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_follow_up(mut self, follow_up: Option<FollowUp>) -> Self {
        self.follow_up = follow_up;
        self
    }
}

pub trait CheckpointStore: Send + Sync {
    /// Insert or overwrite the checkpoint for `checkpoint.flow_id`.
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
    fn load(&self, flow_id: Uuid) -> Result<Option<Checkpoint>>;
    fn remove(&self, flow_id: Uuid) -> Result<()>;
    /// Every stored checkpoint, oldest first.
    fn list(&self) -> Result<Vec<Checkpoint>>;
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<Uuid, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .insert(checkpoint.flow_id, checkpoint.clone());
        Ok(())
    }

    fn load(&self, flow_id: Uuid) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.read().get(&flow_id).cloned())
    }

    fn remove(&self, flow_id: Uuid) -> Result<()> {
        self.checkpoints.write().remove(&flow_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut all: Vec<Checkpoint> = self.checkpoints.read().values().cloned().collect();
        all.sort_by_key(|c| c.updated_at);
        Ok(all)
    }
}

/// SQLite-backed store. Stages are kept as JSON so they survive schema-free.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to open database: {}", e)))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to open database: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                flow_id TEXT PRIMARY KEY,
                flow_name TEXT NOT NULL,
                stage TEXT NOT NULL,
                follow_up TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            LedgerError::DatabaseError(format!("Failed to create checkpoints table: {}", e))
        })?;
        Ok(SqliteCheckpointStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::DatabaseError("Mutex poisoned".to_string()))
    }
}

struct RawRow {
    flow_id: String,
    flow_name: String,
    stage: String,
    follow_up: Option<String>,
    updated_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        flow_id: row.get(0)?,
        flow_name: row.get(1)?,
        stage: row.get(2)?,
        follow_up: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn decode_row(row: RawRow) -> Result<Checkpoint> {
    let RawRow {
        flow_id,
        flow_name,
        stage,
        follow_up,
        updated_at,
    } = row;
    let flow_id = Uuid::parse_str(&flow_id)
        .map_err(|e| LedgerError::DatabaseError(format!("Bad flow id '{}': {}", flow_id, e)))?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| LedgerError::DatabaseError(format!("Bad timestamp '{}': {}", updated_at, e)))?
        .with_timezone(&Utc);
    Ok(Checkpoint {
        flow_id,
        flow_name,
        stage: serde_json::from_str(&stage)?,
        follow_up: follow_up
            .as_deref()
            .map(serde_json::from_str::<FollowUp>)
            .transpose()?,
        updated_at,
    })
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let stage = serde_json::to_string(&checkpoint.stage)?;
        let follow_up = checkpoint
            .follow_up
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints (flow_id, flow_name, stage, follow_up, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                checkpoint.flow_id.to_string(),
                checkpoint.flow_name,
                stage,
                follow_up,
                checkpoint.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| LedgerError::DatabaseError(format!("Failed to save checkpoint: {}", e)))?;
        Ok(())
    }

    fn load(&self, flow_id: Uuid) -> Result<Option<Checkpoint>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT flow_id, flow_name, stage, follow_up, updated_at FROM checkpoints WHERE flow_id = ?1",
                params![flow_id.to_string()],
                read_row,
            )
            .optional()
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to load checkpoint: {}", e)))?;
        row.map(decode_row).transpose()
    }

    fn remove(&self, flow_id: Uuid) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM checkpoints WHERE flow_id = ?1",
            params![flow_id.to_string()],
        )
        .map_err(|e| LedgerError::DatabaseError(format!("Failed to remove checkpoint: {}", e)))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT flow_id, flow_name, stage, follow_up, updated_at FROM checkpoints ORDER BY updated_at ASC",
            )
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], read_row)
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to query checkpoints: {}", e)))?;

        let mut checkpoints = Vec::new();
        for row in rows {
            let row = row.map_err(|e| {
                LedgerError::DatabaseError(format!("Failed to load checkpoint: {}", e))
            })?;
            checkpoints.push(decode_row(row)?);
        }
        Ok(checkpoints)
    }
}
