//! Command builder: tunnel kind + endpoints → forwarding engine invocation.
//!
//! The mapping is a fixed table. Each kind picks the scheme the engine listens
//! with on `0.0.0.0:<port>`; the forward side is always a plain TCP relay
//! except for UDP, since any session framing terminates at the engine.
//!
//! ```text
//! kind     listen        forward
//! tcp      tcp://        tcp://
//! udp      udp://        udp://
//! ws       ws://         tcp://
//! grpc     grpc://       tcp://
//! tcpmux   tcpmux://     tcp://
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::error::ForwardError;

/// Tunnel kinds the gost engine can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelKind {
    Tcp,
    Udp,
    Ws,
    Grpc,
    TcpMux,
}

impl TunnelKind {
    pub const ALL: [TunnelKind; 5] = [
        TunnelKind::Tcp,
        TunnelKind::Udp,
        TunnelKind::Ws,
        TunnelKind::Grpc,
        TunnelKind::TcpMux,
    ];

    /// Scheme of the externally facing listener.
    pub fn listen_scheme(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Ws => "ws",
            Self::Grpc => "grpc",
            Self::TcpMux => "tcpmux",
        }
    }

    /// Scheme of the relay towards the target.
    pub fn forward_scheme(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp | Self::Ws | Self::Grpc | Self::TcpMux => "tcp",
        }
    }
}

impl fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.listen_scheme())
    }
}

impl FromStr for TunnelKind {
    type Err = ForwardError;

    /// Fails closed: there is no default kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "ws" => Ok(Self::Ws),
            "grpc" => Ok(Self::Grpc),
            "tcpmux" => Ok(Self::TcpMux),
            _ => Err(ForwardError::UnsupportedTunnelKind(s.to_string())),
        }
    }
}

/// A fully resolved external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Space-joined command line, for logs and diagnostics only.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Arguments for a gost forward of `kind` from `0.0.0.0:local_port` to `forward_target`.
pub fn gost_args(kind: TunnelKind, local_port: u16, forward_target: &str) -> Vec<String> {
    vec![
        format!("-L={}://0.0.0.0:{}", kind.listen_scheme(), local_port),
        format!("-F={}://{}", kind.forward_scheme(), forward_target),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_args() {
        assert_eq!(
            gost_args(TunnelKind::Tcp, 8080, "127.0.0.1:9999"),
            vec!["-L=tcp://0.0.0.0:8080", "-F=tcp://127.0.0.1:9999"]
        );
    }

    #[test]
    fn udp_relays_udp() {
        assert_eq!(
            gost_args(TunnelKind::Udp, 53, "1.2.3.4:53"),
            vec!["-L=udp://0.0.0.0:53", "-F=udp://1.2.3.4:53"]
        );
    }

    #[test]
    fn framed_kinds_relay_plain_tcp() {
        for kind in [TunnelKind::Ws, TunnelKind::Grpc, TunnelKind::TcpMux] {
            let args = gost_args(kind, 443, "10.0.0.2:443");
            assert_eq!(args[0], format!("-L={}://0.0.0.0:443", kind.listen_scheme()));
            assert_eq!(args[1], "-F=tcp://10.0.0.2:443");
        }
    }

    #[test]
    fn every_kind_listens_on_all_interfaces() {
        for kind in TunnelKind::ALL {
            let args = gost_args(kind, 1234, "h:1");
            assert!(args[0].ends_with("://0.0.0.0:1234"), "{kind}: {}", args[0]);
        }
    }

    #[test]
    fn parse_kinds_case_insensitive() {
        assert_eq!("TCP".parse::<TunnelKind>().unwrap(), TunnelKind::Tcp);
        assert_eq!(" tcpmux ".parse::<TunnelKind>().unwrap(), TunnelKind::TcpMux);
        for kind in TunnelKind::ALL {
            assert_eq!(kind.to_string().parse::<TunnelKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_fails_closed() {
        for bogus in ["bogus", "", "tcp+tls", "quic"] {
            match bogus.parse::<TunnelKind>() {
                Err(ForwardError::UnsupportedTunnelKind(k)) => assert_eq!(k, bogus),
                other => panic!("expected UnsupportedTunnelKind for {bogus:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn command_line_joins_args() {
        let inv = Invocation::new(
            "/usr/local/bin/gost",
            gost_args(TunnelKind::Ws, 80, "example.com:8080"),
        );
        assert_eq!(
            inv.command_line(),
            "/usr/local/bin/gost -L=ws://0.0.0.0:80 -F=tcp://example.com:8080"
        );
    }
}
