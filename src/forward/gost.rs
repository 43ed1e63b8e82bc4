//! gost engine: one `gost -L ... -F ...` process per tunnel.

use std::path::{Path, PathBuf};

use super::binary::BinaryLocator;
use super::command::{gost_args, TunnelKind};
use super::engine::ForwardEngine;
use super::error::{ForwardError, ForwardResult};
use super::supervisor::Supervisor;

/// Install location inside the panel image.
pub const DEFAULT_GOST_PATH: &str = "/usr/local/bin/gost";

/// Parameters of one gost forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GostConfig {
    pub local_port: u16,
    /// `host:port` the forward relays to.
    pub forward_target: String,
    /// Raw tunnel type; parsed at start so unknown kinds fail there.
    pub tunnel_kind: String,
}

#[derive(Debug, Clone)]
pub struct GostEngine {
    locator: BinaryLocator,
}

impl GostEngine {
    pub fn new(locator: BinaryLocator) -> Self {
        Self { locator }
    }

    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self::new(BinaryLocator::new("gost", path))
    }
}

impl Default for GostEngine {
    fn default() -> Self {
        Self::with_binary(DEFAULT_GOST_PATH)
    }
}

impl ForwardEngine for GostEngine {
    type Config = GostConfig;

    fn locator(&self) -> &BinaryLocator {
        &self.locator
    }

    fn local_port(&self, config: &GostConfig) -> u16 {
        config.local_port
    }

    fn describe(&self, config: &GostConfig) -> String {
        format!(
            "Local port: {}, Forward to: {}",
            config.local_port, config.forward_target
        )
    }

    fn prepare(
        &self,
        tunnel_id: &str,
        config: &GostConfig,
        _workdir: &Path,
    ) -> ForwardResult<Vec<String>> {
        let kind: TunnelKind = config.tunnel_kind.parse()?;
        let target = config.forward_target.trim();
        if target.is_empty() {
            return Err(ForwardError::InvalidConfig {
                tunnel_id: tunnel_id.to_string(),
                reason: "empty forward target".into(),
            });
        }
        Ok(gost_args(kind, config.local_port, target))
    }
}

pub type GostSupervisor = Supervisor<GostEngine>;

impl Supervisor<GostEngine> {
    /// Start (or restart) a gost forward from `0.0.0.0:local_port` to
    /// `forward_target`.
    pub async fn start_forward(
        &self,
        tunnel_id: &str,
        local_port: u16,
        forward_target: &str,
        tunnel_kind: &str,
    ) -> ForwardResult<()> {
        let config = GostConfig {
            local_port,
            forward_target: forward_target.to_string(),
            tunnel_kind: tunnel_kind.to_string(),
        };
        self.start(tunnel_id, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str, target: &str) -> GostConfig {
        GostConfig {
            local_port: 8080,
            forward_target: target.into(),
            tunnel_kind: kind.into(),
        }
    }

    #[test]
    fn prepare_builds_gost_args() {
        let dir = tempfile::tempdir().unwrap();
        let args = GostEngine::default()
            .prepare("t1", &config("ws", "10.0.0.2:443"), dir.path())
            .unwrap();
        assert_eq!(args, vec!["-L=ws://0.0.0.0:8080", "-F=tcp://10.0.0.2:443"]);
    }

    #[test]
    fn prepare_rejects_unknown_kind() {
        let dir = tempfile::tempdir().unwrap();
        let err = GostEngine::default()
            .prepare("t1", &config("bogus", "10.0.0.2:443"), dir.path())
            .unwrap_err();
        assert!(matches!(err, ForwardError::UnsupportedTunnelKind(k) if k == "bogus"));
    }

    #[test]
    fn prepare_rejects_empty_target() {
        let dir = tempfile::tempdir().unwrap();
        let err = GostEngine::default()
            .prepare("t1", &config("tcp", "  "), dir.path())
            .unwrap_err();
        assert!(matches!(err, ForwardError::InvalidConfig { .. }));
    }

    #[test]
    fn describe_matches_log_header() {
        let engine = GostEngine::default();
        assert_eq!(
            engine.describe(&config("tcp", "1.2.3.4:80")),
            "Local port: 8080, Forward to: 1.2.3.4:80"
        );
        assert_eq!(engine.name(), "gost");
        assert_eq!(engine.locator().preferred(), Path::new(DEFAULT_GOST_PATH));
    }
}
