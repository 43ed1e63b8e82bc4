//! smite: supervises the external forwarding processes (gost, rathole) that
//! carry tunnel traffic, one process per tunnel.

pub mod config;
pub mod forward;
pub mod reconcile;

use std::sync::Arc;

pub use config::Config;
pub use reconcile::{ReconcileReport, Reconciler};

use forward::{BinaryLocator, GostEngine, GostSupervisor, RatholeEngine, RatholeSupervisor, Supervisor};

/// Both supervisors, built from one config.
#[derive(Debug, Clone)]
pub struct Supervisors {
    pub gost: Arc<GostSupervisor>,
    pub rathole: Arc<RatholeSupervisor>,
}

impl Supervisors {
    pub fn from_config(config: &Config) -> Self {
        let fwd = &config.forward;
        let timings = fwd.timings.to_timings();
        let gost = GostEngine::new(BinaryLocator::new("gost", &fwd.gost_binary));
        let rathole = RatholeEngine::new(BinaryLocator::new("rathole", &fwd.rathole_binary));
        Self {
            gost: Arc::new(Supervisor::new(gost, fwd.gost_dir(), timings)),
            rathole: Arc::new(Supervisor::new(rathole, fwd.rathole_dir(), timings)),
        }
    }

    /// Stop everything both supervisors own.
    pub async fn cleanup_all(&self) {
        tokio::join!(self.gost.cleanup_all(), self.rathole.cleanup_all());
    }
}
