//! SQLite-backed record reader
//!
//! Opens the panel database read-only. Queries run on the blocking pool so
//! callers on the async runtime are never stalled by SQLite I/O.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::{Map, Value};

use crate::records::{NodeRecord, TunnelRecord, TunnelStatus};
use crate::TunnelStore;

/// How long a read waits on a writer holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open an existing panel database read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open tunnel database {:?}", path))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set SQLite busy timeout")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .context("SQLite query task panicked")?
    }
}

/// Parse a JSON column into an object. NULL, malformed or non-object
/// values yield an empty map so the caller sees "fields missing".
fn json_object(raw: Option<String>, what: &str, id: &str) -> Map<String, Value> {
    let Some(raw) = raw else {
        return Map::new();
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!("{what} of {id} is not a JSON object, ignoring");
            Map::new()
        }
        Err(e) => {
            tracing::warn!("corrupt {what} JSON for {id}, ignoring: {e}");
            Map::new()
        }
    }
}

#[async_trait]
impl TunnelStore for SqliteStore {
    async fn active_tunnels(&self) -> Result<Vec<TunnelRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, node_id, core, type, status, spec \
                     FROM tunnels WHERE status = 'active' ORDER BY id",
                )
                .context("Failed to prepare tunnel query")?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                })
                .context("Failed to query active tunnels")?;

            let mut tunnels = Vec::new();
            for row in rows {
                let (id, node_id, core, tunnel_type, status, spec) =
                    row.context("Failed to read tunnel row")?;
                let spec = json_object(spec, "tunnel spec", &id);
                tunnels.push(TunnelRecord {
                    id,
                    node_id: node_id.filter(|n| !n.is_empty()),
                    core: core.unwrap_or_default(),
                    tunnel_type: tunnel_type.unwrap_or_default(),
                    status: TunnelStatus::parse(&status),
                    spec,
                });
            }
            Ok(tunnels)
        })
        .await
    }

    async fn node(&self, node_id: &str) -> Result<Option<NodeRecord>> {
        let node_id = node_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, node_metadata FROM nodes WHERE id = ?1",
                    [&node_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()
                .with_context(|| format!("Failed to query node '{}'", node_id))?;

            Ok(row.map(|(id, name, metadata)| {
                let metadata = json_object(metadata, "node metadata", &id);
                NodeRecord {
                    id,
                    name: name.unwrap_or_default(),
                    node_metadata: Value::Object(metadata),
                }
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_handles_null_and_garbage() {
        assert!(json_object(None, "spec", "t").is_empty());
        assert!(json_object(Some("not json".into()), "spec", "t").is_empty());
        assert!(json_object(Some("[1,2]".into()), "spec", "t").is_empty());

        let map = json_object(Some(r#"{"remote_port": 80}"#.into()), "spec", "t");
        assert_eq!(map.get("remote_port"), Some(&Value::from(80)));
    }

    #[test]
    fn open_missing_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteStore::open(&dir.path().join("absent.db"));
        assert!(result.is_err());
    }
}
