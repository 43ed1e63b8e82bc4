//! Engine abstraction: the parts of supervision that differ between
//! forwarding binaries.
//!
//! The [`Supervisor`](super::Supervisor) owns process lifecycle, logging,
//! probing and the registry. An engine only knows how to find its binary,
//! which port a config occupies, and how to turn a config into arguments.

use std::fmt::{self, Write as _};
use std::path::Path;

use super::binary::BinaryLocator;
use super::error::ForwardResult;

pub trait ForwardEngine: Send + Sync + 'static {
    /// Everything needed to (re)start one tunnel. Kept in the registry so a
    /// crashed process can be restarted with identical parameters.
    type Config: Clone + fmt::Debug + Send + Sync + 'static;

    fn locator(&self) -> &BinaryLocator;

    /// Short engine name used for log files and messages.
    fn name(&self) -> &'static str {
        self.locator().name()
    }

    /// Local port the process serves; probed after start and swept on stop.
    fn local_port(&self, config: &Self::Config) -> u16;

    /// Human-readable summary for the log header.
    fn describe(&self, config: &Self::Config) -> String;

    /// Validate `config` and produce the argument vector.
    ///
    /// May write per-tunnel files under `workdir`, which exists by the time
    /// this is called. Must not spawn anything.
    fn prepare(
        &self,
        tunnel_id: &str,
        config: &Self::Config,
        workdir: &Path,
    ) -> ForwardResult<Vec<String>>;
}

/// Tunnel id made safe for use in a file name.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. Distinct ids always map to distinct stems.
pub fn file_stem(tunnel_id: &str) -> String {
    let mut stem = String::with_capacity(tunnel_id.len());
    for byte in tunnel_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            // Writing to a String cannot fail.
            let _ = write!(stem, "%{byte:02X}");
        }
    }
    stem
}
