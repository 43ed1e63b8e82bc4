//! rathole engine: one `rathole --server <file>` process per tunnel.
//!
//! rathole only takes its settings from a file, so `prepare` renders a
//! per-tunnel TOML config into the scratch directory:
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:23333"
//! default_token = "..."
//!
//! [server.services.<tunnel_id>]
//! bind_addr = "0.0.0.0:<proxy_port>"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::binary::BinaryLocator;
use super::engine::{file_stem, ForwardEngine};
use super::error::{ForwardError, ForwardResult};
use super::supervisor::Supervisor;

pub const DEFAULT_RATHOLE_PATH: &str = "/usr/local/bin/rathole";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatholeConfig {
    /// `host:port` the rathole server accepts clients on.
    pub remote_addr: String,
    pub token: String,
    /// Public port the tunnelled service is exposed on.
    pub proxy_port: u16,
}

#[derive(Serialize)]
struct ServerFile<'a> {
    server: ServerSection<'a>,
}

#[derive(Serialize)]
struct ServerSection<'a> {
    bind_addr: &'a str,
    default_token: &'a str,
    services: BTreeMap<&'a str, ServiceSection>,
}

#[derive(Serialize)]
struct ServiceSection {
    bind_addr: String,
}

#[derive(Debug, Clone)]
pub struct RatholeEngine {
    locator: BinaryLocator,
}

impl RatholeEngine {
    pub fn new(locator: BinaryLocator) -> Self {
        Self { locator }
    }

    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self::new(BinaryLocator::new("rathole", path))
    }

    /// Where the server config for `tunnel_id` is written.
    pub fn config_path(workdir: &Path, tunnel_id: &str) -> PathBuf {
        workdir.join(format!("rathole_{}.toml", file_stem(tunnel_id)))
    }
}

impl Default for RatholeEngine {
    fn default() -> Self {
        Self::with_binary(DEFAULT_RATHOLE_PATH)
    }
}

impl ForwardEngine for RatholeEngine {
    type Config = RatholeConfig;

    fn locator(&self) -> &BinaryLocator {
        &self.locator
    }

    fn local_port(&self, config: &RatholeConfig) -> u16 {
        config.proxy_port
    }

    fn describe(&self, config: &RatholeConfig) -> String {
        format!(
            "Local port: {}, Server bind: {}",
            config.proxy_port, config.remote_addr
        )
    }

    fn prepare(
        &self,
        tunnel_id: &str,
        config: &RatholeConfig,
        workdir: &Path,
    ) -> ForwardResult<Vec<String>> {
        let invalid = |reason: &str| ForwardError::InvalidConfig {
            tunnel_id: tunnel_id.to_string(),
            reason: reason.to_string(),
        };

        let remote_addr = config.remote_addr.trim();
        let port_ok = remote_addr.rsplit_once(':').is_some_and(|(host, port)| {
            !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0)
        });
        if !port_ok {
            return Err(invalid("remote_addr must be host:port"));
        }
        if config.token.trim().is_empty() {
            return Err(invalid("empty token"));
        }

        let service_bind = format!("0.0.0.0:{}", config.proxy_port);
        let file = ServerFile {
            server: ServerSection {
                bind_addr: remote_addr,
                default_token: config.token.trim(),
                services: BTreeMap::from([(
                    tunnel_id,
                    ServiceSection {
                        bind_addr: service_bind,
                    },
                )]),
            },
        };
        let rendered = toml::to_string(&file).map_err(|e| invalid(&e.to_string()))?;

        let path = Self::config_path(workdir, tunnel_id);
        std::fs::write(&path, rendered).map_err(|source| ForwardError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(vec!["--server".to_string(), path.display().to_string()])
    }
}

pub type RatholeSupervisor = Supervisor<RatholeEngine>;

impl Supervisor<RatholeEngine> {
    /// Start (or restart) the rathole server for `tunnel_id`.
    pub async fn start_server(
        &self,
        tunnel_id: &str,
        remote_addr: &str,
        token: &str,
        proxy_port: u16,
    ) -> ForwardResult<()> {
        let config = RatholeConfig {
            remote_addr: remote_addr.to_string(),
            token: token.to_string(),
            proxy_port,
        };
        self.start(tunnel_id, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(remote_addr: &str, token: &str) -> RatholeConfig {
        RatholeConfig {
            remote_addr: remote_addr.into(),
            token: token.into(),
            proxy_port: 9000,
        }
    }

    #[test]
    fn prepare_writes_server_config() {
        let dir = tempfile::tempdir().unwrap();
        let args = RatholeEngine::default()
            .prepare("t-1", &config("0.0.0.0:23333", "s3cret"), dir.path())
            .unwrap();

        let path = RatholeEngine::config_path(dir.path(), "t-1");
        assert_eq!(args, vec!["--server".to_string(), path.display().to_string()]);

        let parsed: toml::Table = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let server = parsed["server"].as_table().unwrap();
        assert_eq!(server["bind_addr"].as_str(), Some("0.0.0.0:23333"));
        assert_eq!(server["default_token"].as_str(), Some("s3cret"));
        assert_eq!(
            server["services"]["t-1"]["bind_addr"].as_str(),
            Some("0.0.0.0:9000")
        );
    }

    #[test]
    fn prepare_rejects_bad_remote_addr() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["", "23333", ":23333", "host:", "host:99999"] {
            let err = RatholeEngine::default()
                .prepare("t1", &config(bad, "tok"), dir.path())
                .unwrap_err();
            assert!(matches!(err, ForwardError::InvalidConfig { .. }), "{bad:?}");
        }
    }

    #[test]
    fn prepare_rejects_empty_token() {
        let dir = tempfile::tempdir().unwrap();
        let err = RatholeEngine::default()
            .prepare("t1", &config("0.0.0.0:23333", " "), dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("empty token"));
        assert!(!RatholeEngine::config_path(dir.path(), "t1").exists());
    }

    #[test]
    fn probes_proxy_port() {
        assert_eq!(RatholeEngine::default().local_port(&config("h:1", "t")), 9000);
    }
}
