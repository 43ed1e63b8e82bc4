//! Persisted tunnel and node records for smite
//!
//! The relational store is owned by the panel's data layer. This crate only
//! reads from it: the forwarding supervisor rebuilds its in-memory state from
//! these records on boot and never writes status back.

pub mod memory;
pub mod records;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use records::{NodeRecord, TunnelRecord, TunnelStatus};
pub use sqlite::SqliteStore;

/// Read-only view over persisted tunnels and nodes
#[async_trait]
pub trait TunnelStore: Send + Sync {
    /// All tunnels whose status is `active`
    async fn active_tunnels(&self) -> Result<Vec<TunnelRecord>>;

    /// Look up a node by id; `Ok(None)` when it does not exist
    async fn node(&self, node_id: &str) -> Result<Option<NodeRecord>>;
}
