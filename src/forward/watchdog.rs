//! Background crash healer.
//!
//! Periodically runs [`Supervisor::is_active`] over every registered tunnel,
//! which restarts any process found dead. Without it, healing only happens
//! when something asks about a tunnel.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::engine::ForwardEngine;
use super::supervisor::Supervisor;

/// Default pause between sweeps.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of one pass over a supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogPass {
    pub healthy: usize,
    /// Tunnels that were dead and could not be brought back.
    pub down: Vec<String>,
}

/// Check every registered tunnel once.
pub async fn check_once<E: ForwardEngine>(supervisor: &Supervisor<E>) -> WatchdogPass {
    let mut pass = WatchdogPass::default();
    for tunnel_id in supervisor.tunnel_ids() {
        // Pruned ids only linger for the port sweep; nothing to heal.
        if supervisor.pid(&tunnel_id).await.is_none() {
            continue;
        }
        if supervisor.is_active(&tunnel_id).await {
            pass.healthy += 1;
        } else {
            pass.down.push(tunnel_id);
        }
    }
    pass
}

/// Spawn the watchdog loop. Stops when `token` is cancelled.
pub fn spawn_watchdog<E: ForwardEngine>(
    supervisor: Arc<Supervisor<E>>,
    interval: Duration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let name = supervisor.engine().name();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; reconciliation has just run.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("{name} watchdog cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let pass = check_once(&supervisor).await;
                    if pass.down.is_empty() {
                        tracing::debug!("{name} watchdog: {} tunnel(s) healthy", pass.healthy);
                    } else {
                        tracing::warn!(
                            "{name} watchdog: {} healthy, down: {}",
                            pass.healthy,
                            pass.down.join(", ")
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::gost::GostEngine;
    use crate::forward::supervisor::SupervisorTimings;

    #[tokio::test]
    async fn empty_supervisor_pass() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(GostEngine::default(), dir.path(), SupervisorTimings::default());
        assert_eq!(check_once(&sup).await, WatchdogPass::default());
    }

    #[tokio::test]
    async fn loop_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Arc::new(Supervisor::new(
            GostEngine::default(),
            dir.path(),
            SupervisorTimings::default(),
        ));
        let token = CancellationToken::new();
        let handle = spawn_watchdog(sup, Duration::from_millis(20), token.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watchdog did not stop")
            .unwrap();
    }
}
