//! In-memory store, for tests and embedders that keep records elsewhere

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::records::{NodeRecord, TunnelRecord};
use crate::TunnelStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tunnels: RwLock<Vec<TunnelRecord>>,
    nodes: RwLock<HashMap<String, NodeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tunnel(&self, tunnel: TunnelRecord) {
        let mut tunnels = self.tunnels.write();
        tunnels.retain(|t| t.id != tunnel.id);
        tunnels.push(tunnel);
    }

    pub fn insert_node(&self, node: NodeRecord) {
        self.nodes.write().insert(node.id.clone(), node);
    }
}

#[async_trait]
impl TunnelStore for MemoryStore {
    async fn active_tunnels(&self) -> Result<Vec<TunnelRecord>> {
        Ok(self
            .tunnels
            .read()
            .iter()
            .filter(|t| t.status.is_active())
            .cloned()
            .collect())
    }

    async fn node(&self, node_id: &str) -> Result<Option<NodeRecord>> {
        Ok(self.nodes.read().get(node_id).cloned())
    }
}
