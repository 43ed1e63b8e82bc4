//! Startup reconciliation: rebuild supervision state from persisted tunnels.
//!
//! Nothing from a previous run is trusted. Every active tunnel whose core
//! needs a local forwarder gets exactly one `start`; incomplete records are
//! skipped and failures are logged, neither stops the pass.

use std::sync::Arc;

use smite_store::{TunnelRecord, TunnelStore};

use crate::forward::{GostConfig, GostSupervisor, RatholeConfig, RatholeSupervisor};

/// xray tunnel types served by a local gost relay.
const XRAY_GOST_TYPES: [&str; 3] = ["tcp", "ws", "grpc"];

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    /// `(tunnel_id, reason)` for records missing required fields.
    pub skipped: Vec<(String, String)>,
    /// `(tunnel_id, error)` for starts that failed.
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    fn skip(&mut self, tunnel_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Skipping tunnel {tunnel_id}: {reason}");
        self.skipped.push((tunnel_id.to_string(), reason));
    }

    fn record<E: std::fmt::Display>(&mut self, tunnel_id: &str, engine: &str, result: Result<(), E>) {
        match result {
            Ok(()) => {
                tracing::info!("Restored {engine} forward for tunnel {tunnel_id}");
                self.started.push(tunnel_id.to_string());
            }
            Err(e) => {
                tracing::error!("Failed to restore {engine} forward for tunnel {tunnel_id}: {e}");
                self.failed.push((tunnel_id.to_string(), e.to_string()));
            }
        }
    }
}

/// Which forwarder, if any, a tunnel record needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Gost,
    Rathole,
    None,
}

fn route(tunnel: &TunnelRecord) -> Route {
    let core = tunnel.core.trim().to_ascii_lowercase();
    let kind = tunnel.tunnel_type.trim().to_ascii_lowercase();
    match core.as_str() {
        "gost" => Route::Gost,
        "xray" if XRAY_GOST_TYPES.contains(&kind.as_str()) => Route::Gost,
        "rathole" => Route::Rathole,
        _ => Route::None,
    }
}

pub struct Reconciler {
    store: Arc<dyn TunnelStore>,
    gost: Arc<GostSupervisor>,
    rathole: Option<Arc<RatholeSupervisor>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TunnelStore>, gost: Arc<GostSupervisor>) -> Self {
        Self {
            store,
            gost,
            rathole: None,
        }
    }

    /// Also restore rathole servers.
    pub fn with_rathole(mut self, rathole: Arc<RatholeSupervisor>) -> Self {
        self.rathole = Some(rathole);
        self
    }

    /// Run one pass. Never fails; a store error yields an empty report.
    pub async fn run(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let tunnels = match self.store.active_tunnels().await {
            Ok(tunnels) => tunnels,
            Err(e) => {
                tracing::error!("Failed to load active tunnels, skipping restore: {e:#}");
                return report;
            }
        };
        tracing::info!("Restoring forwards for {} active tunnel(s)", tunnels.len());

        for tunnel in &tunnels {
            match route(tunnel) {
                Route::Gost => self.restore_gost(tunnel, &mut report).await,
                Route::Rathole => self.restore_rathole(tunnel, &mut report).await,
                Route::None => {
                    tracing::debug!(
                        "Tunnel {} ({}/{}) needs no local forwarder",
                        tunnel.id,
                        tunnel.core,
                        tunnel.tunnel_type
                    );
                }
            }
        }

        tracing::info!(
            "Restore finished: {} started, {} skipped, {} failed",
            report.started.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    async fn restore_gost(&self, tunnel: &TunnelRecord, report: &mut ReconcileReport) {
        let id = tunnel.id.as_str();

        let Some(port) = tunnel.spec_port() else {
            report.skip(id, "no remote_port or listen_port");
            return;
        };
        let Some(node_id) = tunnel.node_id.as_deref() else {
            report.skip(id, "no node_id");
            return;
        };
        let node = match self.store.node(node_id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                report.skip(id, format!("node {node_id} not found"));
                return;
            }
            Err(e) => {
                report.skip(id, format!("node {node_id} lookup failed: {e:#}"));
                return;
            }
        };
        let Some(ip) = node.ip_address() else {
            report.skip(id, format!("node {node_id} has no ip_address"));
            return;
        };

        let tunnel_kind = if tunnel.core.eq_ignore_ascii_case("xray") {
            "tcp".to_string()
        } else {
            tunnel.tunnel_type.clone()
        };
        let config = GostConfig {
            local_port: port,
            forward_target: format!("{ip}:{port}"),
            tunnel_kind,
        };
        let result = self.gost.start(id, config).await;
        report.record(id, "gost", result);
    }

    async fn restore_rathole(&self, tunnel: &TunnelRecord, report: &mut ReconcileReport) {
        let id = tunnel.id.as_str();

        let Some(rathole) = self.rathole.as_ref() else {
            report.skip(id, "rathole supervision not enabled");
            return;
        };
        let Some(remote_addr) = tunnel.spec_str("remote_addr") else {
            report.skip(id, "no remote_addr");
            return;
        };
        let Some(token) = tunnel.spec_str("token") else {
            report.skip(id, "no token");
            return;
        };
        let Some(port) = tunnel.spec_port() else {
            report.skip(id, "no remote_port or listen_port");
            return;
        };

        let config = RatholeConfig {
            remote_addr: remote_addr.to_string(),
            token: token.to_string(),
            proxy_port: port,
        };
        let result = rathole.start(id, config).await;
        report.record(id, "rathole", result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smite_store::TunnelStatus;

    fn tunnel(core: &str, kind: &str) -> TunnelRecord {
        TunnelRecord {
            id: "t".into(),
            node_id: None,
            core: core.into(),
            tunnel_type: kind.into(),
            status: TunnelStatus::Active,
            spec: serde_json::Map::new(),
        }
    }

    #[test]
    fn routes_by_core_and_type() {
        assert_eq!(route(&tunnel("gost", "udp")), Route::Gost);
        assert_eq!(route(&tunnel("gost", "tcpmux")), Route::Gost);
        assert_eq!(route(&tunnel("xray", "ws")), Route::Gost);
        assert_eq!(route(&tunnel("XRAY", "GRPC")), Route::Gost);
        assert_eq!(route(&tunnel("xray", "udp")), Route::None);
        assert_eq!(route(&tunnel("rathole", "tcp")), Route::Rathole);
        assert_eq!(route(&tunnel("backhaul", "tcp")), Route::None);
    }
}
