//! Forwarding binary resolution.
//!
//! A fixed install path is tried first, then a `PATH` lookup by name. Both
//! failing is a hard error before anything is spawned.

use std::path::{Path, PathBuf};

use super::error::{ForwardError, ForwardResult};

/// Resolves one forwarding engine binary. One locator per supervisor.
#[derive(Debug, Clone)]
pub struct BinaryLocator {
    /// Short engine name, used for `PATH` lookup and in messages.
    name: &'static str,
    /// Well-known install path tried first.
    preferred: PathBuf,
    /// Whether to fall back to `PATH` when `preferred` does not exist.
    search_path: bool,
}

impl BinaryLocator {
    pub fn new(name: &'static str, preferred: impl Into<PathBuf>) -> Self {
        Self {
            name,
            preferred: preferred.into(),
            search_path: true,
        }
    }

    /// Only accept the preferred path.
    pub fn without_path_search(mut self) -> Self {
        self.search_path = false;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn preferred(&self) -> &Path {
        &self.preferred
    }

    /// Resolve to an existing, executable file.
    pub fn resolve(&self) -> ForwardResult<PathBuf> {
        if self.preferred.exists() {
            if !is_executable(&self.preferred) {
                return Err(ForwardError::BinaryNotExecutable {
                    binary: self.name,
                    path: self.preferred.clone(),
                });
            }
            return Ok(self.preferred.clone());
        }

        if self.search_path {
            // `which` already filters on the executable bit.
            if let Ok(found) = which::which(self.name) {
                tracing::debug!(
                    "{} not at {}, using {} from PATH",
                    self.name,
                    self.preferred.display(),
                    found.display()
                );
                return Ok(found);
            }
        }

        Err(ForwardError::BinaryNotFound {
            binary: self.name,
            tried: self.preferred.clone(),
            searched_path: self.search_path,
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn write_file(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn preferred_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("gost");
        write_file(&bin, 0o755);

        let locator = BinaryLocator::new("gost", &bin);
        assert_eq!(locator.resolve().unwrap(), bin);
    }

    #[cfg(unix)]
    #[test]
    fn preferred_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("gost");
        write_file(&bin, 0o644);

        let err = BinaryLocator::new("gost", &bin).resolve().unwrap_err();
        assert!(matches!(err, ForwardError::BinaryNotExecutable { .. }));
    }

    #[test]
    fn missing_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let locator = BinaryLocator::new(
            "smite-test-no-such-forwarder",
            dir.path().join("smite-test-no-such-forwarder"),
        );
        let err = locator.resolve().unwrap_err();
        assert!(matches!(err, ForwardError::BinaryNotFound { .. }));
        assert!(err.to_string().contains("or in PATH"));
    }

    #[cfg(unix)]
    #[test]
    fn falls_back_to_path_lookup() {
        // `sh` is on PATH on every unix CI image.
        let dir = tempfile::tempdir().unwrap();
        let locator = BinaryLocator::new("sh", dir.path().join("sh"));
        let found = locator.resolve().unwrap();
        assert!(found.ends_with("sh"));

        let strict = BinaryLocator::new("sh", dir.path().join("sh")).without_path_search();
        let err = strict.resolve().unwrap_err();
        assert!(matches!(
            err,
            ForwardError::BinaryNotFound {
                searched_path: false,
                ..
            }
        ));
        assert!(!err.to_string().contains("PATH"), "{err}");
    }
}
