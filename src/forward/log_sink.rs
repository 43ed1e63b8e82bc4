//! Per-tunnel log file that receives the child's combined stdout/stderr.
//!
//! The file is truncated when the sink is opened and then held open in append
//! mode, so supervisor header lines and child output interleave without
//! clobbering each other. Dropping the sink closes it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use super::error::{ForwardError, ForwardResult};

/// Characters of log output attached to startup failures.
pub const DIAGNOSTIC_TAIL_CHARS: usize = 500;

#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: File,
}

impl LogSink {
    /// Truncate (or create) `path` and open it for appending.
    pub fn create(path: &Path) -> ForwardResult<Self> {
        let io_err = |source| ForwardError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        File::create(path).map_err(io_err)?;
        let file = OpenOptions::new().append(true).open(path).map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Failures are logged and swallowed: the sink is for
    /// diagnostics and must not turn a healthy start into a failed one.
    pub fn line(&mut self, message: &str) {
        if let Err(e) = writeln!(self.file, "{message}").and_then(|()| self.file.flush()) {
            tracing::debug!("failed to write to {}: {e}", self.path.display());
        }
    }

    /// Two handles on the same open file, for the child's stdout and stderr.
    pub fn child_stdio(&self) -> ForwardResult<(Stdio, Stdio)> {
        let io_err = |source| ForwardError::Io {
            path: self.path.clone(),
            source,
        };
        let out = self.file.try_clone().map_err(io_err)?;
        let err = self.file.try_clone().map_err(io_err)?;
        Ok((Stdio::from(out), Stdio::from(err)))
    }

    /// Last `max_chars` characters written so far.
    pub fn tail(&self, max_chars: usize) -> String {
        read_tail(&self.path, max_chars)
    }
}

/// Last `max_chars` characters of the file at `path`.
///
/// Reads at most a bounded window from the end of the file. A missing or
/// unreadable file yields a short explanation instead of an error.
pub fn read_tail(path: &Path, max_chars: usize) -> String {
    match read_tail_inner(path, max_chars) {
        Ok(tail) => tail,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => "Log file not found".to_string(),
        Err(e) => format!("Could not read log file: {e}"),
    }
}

fn read_tail_inner(path: &Path, max_chars: usize) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    // A UTF-8 char is at most 4 bytes.
    let window = (max_chars as u64).saturating_mul(4);
    file.seek(SeekFrom::Start(len.saturating_sub(window)))?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);

    let total = text.chars().count();
    Ok(text.chars().skip(total.saturating_sub(max_chars)).collect())
}
