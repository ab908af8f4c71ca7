//! SQLite triples store for locally added data.
//!
//! The store has no pagination, so its rows are only merged into the first
//! page of a fetch. Outgoing neighbors are reported with the type `Thing`,
//! incoming ones untyped.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::{MixerError, Result};
use crate::types::{Direction, EntityInfo, GraphKey, UNTYPED};

/// Type given to every outgoing local neighbor.
pub const LOCAL_NODE_TYPE: &str = "Thing";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS triples (
    subject_id TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object_id TEXT NOT NULL DEFAULT '',
    object_value TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_triples_subject ON triples (subject_id, predicate);
CREATE INDEX IF NOT EXISTS idx_triples_object ON triples (object_id, predicate);
";

/// Shared handle to the triples database.
#[derive(Clone, Debug)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened local triples store");
        Self::with_connection(conn)
    }

    /// Database living only in memory.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Adds one triple; pass an empty `object_id` for scalar values.
    pub fn insert(
        &self,
        subject_id: &str,
        predicate: &str,
        object_id: &str,
        object_value: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO triples (subject_id, predicate, object_id, object_value)
             VALUES (?1, ?2, ?3, ?4)",
            params![subject_id, predicate, object_id, object_value],
        )?;
        Ok(())
    }

    /// Values of every `(node, property)` pair, keyed the way the engine keys
    /// its results.
    pub async fn fetch(
        &self,
        nodes: &BTreeSet<&str>,
        properties: &BTreeSet<&str>,
        direction: Direction,
    ) -> Result<Vec<(GraphKey, EntityInfo)>> {
        let conn = Arc::clone(&self.conn);
        let nodes: Vec<String> = nodes.iter().map(|n| (*n).to_owned()).collect();
        let properties: Vec<String> = properties.iter().map(|p| (*p).to_owned()).collect();
        tokio::task::spawn_blocking(move || {
            query_pairs(&conn.lock(), &nodes, &properties, direction)
        })
        .await
        .map_err(|err| MixerError::internal(format!("local store task failed: {err}")))?
    }
}

fn query_pairs(
    conn: &Connection,
    nodes: &[String],
    properties: &[String],
    direction: Direction,
) -> Result<Vec<(GraphKey, EntityInfo)>> {
    let sql = match direction {
        Direction::Out => {
            "SELECT subject_id, object_id, object_value FROM triples
             WHERE subject_id = ?1 AND predicate = ?2
             ORDER BY object_id, object_value"
        }
        Direction::In => {
            "SELECT subject_id, object_id, object_value FROM triples
             WHERE object_id = ?1 AND predicate = ?2
             ORDER BY subject_id"
        }
    };
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = Vec::new();
    for node in nodes {
        for property in properties {
            let mut found = stmt.query(params![node, property])?;
            while let Some(row) = found.next()? {
                let subject_id: String = row.get(0)?;
                let object_id: String = row.get(1)?;
                let object_value: String = row.get(2)?;
                rows.push(match direction {
                    Direction::Out => (
                        GraphKey::new(node.as_str(), property.as_str(), LOCAL_NODE_TYPE),
                        EntityInfo {
                            dcid: object_id,
                            value: object_value,
                            types: vec![LOCAL_NODE_TYPE.to_owned()],
                            ..EntityInfo::default()
                        },
                    ),
                    Direction::In => (
                        GraphKey::new(node.as_str(), property.as_str(), UNTYPED),
                        EntityInfo::node(subject_id),
                    ),
                });
            }
        }
    }
    debug!(%direction, rows = rows.len(), "queried local triples");
    Ok(rows)
}
