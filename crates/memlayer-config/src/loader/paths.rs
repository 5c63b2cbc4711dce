//! Where config layers live on disk.

use super::{DEFAULT_CONFIG_DIR, DEFAULT_CONFIG_FILE};
use crate::ConfigError;
use directories::UserDirs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[cfg(unix)]
const SYSTEM_DIR: Option<&str> = Some("/etc/memlayer");
#[cfg(windows)]
const SYSTEM_DIR: Option<&str> = Some("C:\\ProgramData\\memlayer");
#[cfg(not(any(unix, windows)))]
const SYSTEM_DIR: Option<&str> = None;

const REQUIREMENTS_FILE: &str = "requirements.json5";

/// `memlayer.json5` in the machine-wide config directory.
pub(super) fn system_config() -> Option<PathBuf> {
    SYSTEM_DIR.map(|dir| Path::new(dir).join(DEFAULT_CONFIG_FILE))
}

/// Locked settings next to the system config.
pub(super) fn system_requirements() -> Option<PathBuf> {
    SYSTEM_DIR.map(|dir| Path::new(dir).join(REQUIREMENTS_FILE))
}

/// `~/.memlayer/memlayer.json5`.
pub(super) fn user_config() -> Option<PathBuf> {
    let dirs = UserDirs::new()?;
    Some(
        dirs.home_dir()
            .join(DEFAULT_CONFIG_DIR)
            .join(DEFAULT_CONFIG_FILE),
    )
}

/// Canonical working directory. A directory that does not exist yet is kept as given.
pub(super) fn resolve_cwd(cwd: &Path) -> Result<PathBuf, ConfigError> {
    match cwd.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(cwd.to_path_buf()),
        Err(source) => Err(ConfigError::Read {
            path: cwd.to_path_buf(),
            source,
        }),
    }
}

/// Key used to skip a file reached through two layers (e.g. cwd == project root).
pub(super) fn identity(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Nearest ancestor of `cwd` (inclusive) containing one of `markers`.
pub(super) fn project_root(cwd: &Path, markers: &[String]) -> Option<PathBuf> {
    cwd.ancestors()
        .find(|dir| markers.iter().any(|marker| dir.join(marker).exists()))
        .map(Path::to_path_buf)
}
