//! Errors surfaced by the forwarding supervisor.

use std::path::PathBuf;

/// Why a `start` call failed. `stop` and `cleanup_all` never produce these.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("{binary} binary not found at {}{}", .tried.display(), path_hint(.searched_path))]
    BinaryNotFound {
        binary: &'static str,
        tried: PathBuf,
        /// Whether a `PATH` lookup was also attempted.
        searched_path: bool,
    },

    #[error("{binary} binary at {} is not executable", .path.display())]
    BinaryNotExecutable { binary: &'static str, path: PathBuf },

    #[error("unsupported tunnel type: {0}")]
    UnsupportedTunnelKind(String),

    #[error("invalid forward config for tunnel {tunnel_id}: {reason}")]
    InvalidConfig { tunnel_id: String, reason: String },

    /// I/O on a log sink or on the supervisor's scratch directory.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {binary} process: {source}")]
    SpawnFailed {
        binary: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} failed to start (exit status: {status}): {}", tail_or_unknown(.log_tail))]
    ProcessExitedImmediately {
        binary: &'static str,
        status: String,
        log_tail: String,
    },
}

fn path_hint(searched_path: &bool) -> &'static str {
    if *searched_path {
        " or in PATH"
    } else {
        ""
    }
}

fn tail_or_unknown(tail: &str) -> &str {
    if tail.trim().is_empty() {
        "Unknown error"
    } else {
        tail
    }
}

pub type ForwardResult<T> = std::result::Result<T, ForwardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exited_immediately_includes_tail() {
        let err = ForwardError::ProcessExitedImmediately {
            binary: "gost",
            status: "exit status: 1".into(),
            log_tail: "bind: address already in use".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("gost failed to start"));
        assert!(msg.contains("address already in use"));
    }

    #[test]
    fn exited_immediately_without_output() {
        let err = ForwardError::ProcessExitedImmediately {
            binary: "rathole",
            status: "signal: 9 (SIGKILL)".into(),
            log_tail: "\n".into(),
        };
        assert!(err.to_string().ends_with("Unknown error"));
    }

    #[test]
    fn unsupported_kind_message() {
        let err = ForwardError::UnsupportedTunnelKind("bogus".into());
        assert_eq!(err.to_string(), "unsupported tunnel type: bogus");
    }
}
