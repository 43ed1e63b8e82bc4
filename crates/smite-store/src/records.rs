//! Tunnel and node record types
//!
//! Field names follow the panel database columns. The tunnel `spec` is a
//! free-form JSON object; accessors here tolerate the loose typing the panel
//! writes (ports stored either as numbers or as numeric strings).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status column of a tunnel row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Active,
    Pending,
    Error,
    Inactive,
    /// Any status string this crate does not know about.
    #[serde(untagged)]
    Other(String),
}

impl TunnelStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "pending" => Self::Pending,
            "error" => Self::Error,
            "inactive" => Self::Inactive,
            _ => Self::Other(s.to_string()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Pending => write!(f, "pending"),
            Self::Error => write!(f, "error"),
            Self::Inactive => write!(f, "inactive"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A persisted tunnel row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelRecord {
    pub id: String,
    /// Companion node; `None` for tunnels that do not go through a node.
    pub node_id: Option<String>,
    /// Engine family, e.g. `gost`, `xray`, `rathole`.
    pub core: String,
    /// Tunnel kind, e.g. `tcp`, `udp`, `ws`, `grpc`, `tcpmux`.
    #[serde(rename = "type")]
    pub tunnel_type: String,
    pub status: TunnelStatus,
    #[serde(default)]
    pub spec: Map<String, Value>,
}

impl TunnelRecord {
    /// Port the panel exposes for this tunnel: `remote_port`, else `listen_port`.
    ///
    /// Zero, negative, out-of-range and non-numeric values count as missing.
    pub fn spec_port(&self) -> Option<u16> {
        self.spec_u16("remote_port")
            .or_else(|| self.spec_u16("listen_port"))
    }

    /// A non-empty string field from the spec.
    pub fn spec_str(&self, key: &str) -> Option<&str> {
        self.spec
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn spec_u16(&self, key: &str) -> Option<u16> {
        let port = match self.spec.get(key)? {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.trim().parse::<u64>().ok()?,
            _ => return None,
        };
        u16::try_from(port).ok().filter(|p| *p != 0)
    }
}

/// A persisted node row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub node_metadata: Value,
}

impl NodeRecord {
    /// Peer address reported by the node agent, if any.
    pub fn ip_address(&self) -> Option<&str> {
        self.node_metadata
            .get("ip_address")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tunnel(spec: Value) -> TunnelRecord {
        TunnelRecord {
            id: "t1".into(),
            node_id: Some("n1".into()),
            core: "gost".into(),
            tunnel_type: "tcp".into(),
            status: TunnelStatus::Active,
            spec: spec.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn spec_port_prefers_remote_port() {
        let t = tunnel(json!({"remote_port": 8080, "listen_port": 9090}));
        assert_eq!(t.spec_port(), Some(8080));
    }

    #[test]
    fn spec_port_falls_back_to_listen_port() {
        let t = tunnel(json!({"listen_port": 9090}));
        assert_eq!(t.spec_port(), Some(9090));
    }

    #[test]
    fn spec_port_accepts_numeric_strings() {
        let t = tunnel(json!({"remote_port": " 443 "}));
        assert_eq!(t.spec_port(), Some(443));
    }

    #[test]
    fn spec_port_rejects_garbage() {
        assert_eq!(tunnel(json!({"remote_port": "abc"})).spec_port(), None);
        assert_eq!(tunnel(json!({"remote_port": 0})).spec_port(), None);
        assert_eq!(tunnel(json!({"remote_port": 70000})).spec_port(), None);
        assert_eq!(tunnel(json!({"remote_port": -1})).spec_port(), None);
        assert_eq!(tunnel(json!({})).spec_port(), None);
    }

    #[test]
    fn spec_str_skips_blank_values() {
        let t = tunnel(json!({"token": "  ", "remote_addr": "0.0.0.0:2333"}));
        assert_eq!(t.spec_str("token"), None);
        assert_eq!(t.spec_str("remote_addr"), Some("0.0.0.0:2333"));
    }

    #[test]
    fn node_ip_address_from_metadata() {
        let node = NodeRecord {
            id: "n1".into(),
            name: "edge".into(),
            node_metadata: json!({"ip_address": "10.0.0.7"}),
        };
        assert_eq!(node.ip_address(), Some("10.0.0.7"));

        let bare = NodeRecord {
            id: "n2".into(),
            name: "edge2".into(),
            node_metadata: Value::Null,
        };
        assert_eq!(bare.ip_address(), None);
    }

    #[test]
    fn status_parse_and_display() {
        assert!(TunnelStatus::parse("Active").is_active());
        assert_eq!(TunnelStatus::parse("error"), TunnelStatus::Error);
        assert_eq!(
            TunnelStatus::parse("draining"),
            TunnelStatus::Other("draining".into())
        );
        assert_eq!(TunnelStatus::Other("draining".into()).to_string(), "draining");
    }
}
