//! Path helpers for configured locations.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory. Other paths are returned
/// unchanged, as is `~` when no home directory is known.
pub fn expand_tilde(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Resolve a mount point to an absolute path, creating it when missing.
///
/// Fails when the path exists but is not a directory.
pub fn prepare_mount_point(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = expand_tilde(path);
    if !path.exists() {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create mount point: {}", path.display()))?;
    }
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve mount point: {}", path.display()))?;
    if !canonical.is_dir() {
        anyhow::bail!("Mount point '{}' is not a directory", canonical.display());
    }
    Ok(canonical)
}
