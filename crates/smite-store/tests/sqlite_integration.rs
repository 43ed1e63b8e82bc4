//! SqliteStore against a database laid out like the panel's.

use rusqlite::{params, Connection};
use smite_store::{SqliteStore, TunnelStatus, TunnelStore};

fn seed(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE nodes (
             id TEXT PRIMARY KEY,
             name TEXT,
             node_metadata TEXT
         );
         CREATE TABLE tunnels (
             id TEXT PRIMARY KEY,
             name TEXT,
             core TEXT,
             type TEXT,
             node_id TEXT,
             spec TEXT,
             status TEXT NOT NULL
         );",
    )
    .unwrap();

    conn.execute(
        "INSERT INTO nodes (id, name, node_metadata) VALUES (?1, ?2, ?3)",
        params!["node-1", "edge-1", r#"{"ip_address": "203.0.113.9"}"#],
    )
    .unwrap();

    let rows = [
        ("t-gost", "gost", "tcp", Some("node-1"), Some(r#"{"remote_port": 8443}"#), "active"),
        ("t-xray", "xray", "ws", Some("node-1"), Some(r#"{"listen_port": "9443"}"#), "active"),
        ("t-down", "gost", "udp", Some("node-1"), Some(r#"{"remote_port": 53}"#), "error"),
        ("t-bad", "rathole", "tcp", None, Some("{broken"), "active"),
    ];
    for (id, core, kind, node, spec, status) in rows {
        conn.execute(
            "INSERT INTO tunnels (id, name, core, type, node_id, spec, status)
             VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, core, kind, node, spec, status],
        )
        .unwrap();
    }
}

#[tokio::test]
async fn lists_only_active_tunnels() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("smite.db");
    seed(&db);

    let store = SqliteStore::open(&db).unwrap();
    let tunnels = store.active_tunnels().await.unwrap();
    let ids: Vec<_> = tunnels.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t-bad", "t-gost", "t-xray"]);
    assert!(tunnels.iter().all(|t| t.status == TunnelStatus::Active));
}

#[tokio::test]
async fn decodes_spec_and_tolerates_corrupt_json() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("smite.db");
    seed(&db);

    let store = SqliteStore::open(&db).unwrap();
    let tunnels = store.active_tunnels().await.unwrap();

    let gost = tunnels.iter().find(|t| t.id == "t-gost").unwrap();
    assert_eq!(gost.core, "gost");
    assert_eq!(gost.tunnel_type, "tcp");
    assert_eq!(gost.node_id.as_deref(), Some("node-1"));
    assert_eq!(gost.spec_port(), Some(8443));

    let xray = tunnels.iter().find(|t| t.id == "t-xray").unwrap();
    assert_eq!(xray.spec_port(), Some(9443));

    let bad = tunnels.iter().find(|t| t.id == "t-bad").unwrap();
    assert!(bad.spec.is_empty());
    assert!(bad.node_id.is_none());
}

#[tokio::test]
async fn node_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("smite.db");
    seed(&db);

    let store = SqliteStore::open(&db).unwrap();
    let node = store.node("node-1").await.unwrap().unwrap();
    assert_eq!(node.name, "edge-1");
    assert_eq!(node.ip_address(), Some("203.0.113.9"));

    assert!(store.node("node-404").await.unwrap().is_none());
}
