//! `KEY=VALUE` files used for the superblock, the hash index and tag metadata.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped; the
/// value is everything after the first `=`.
pub(crate) fn parse(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Parse `[1,2,3]` (or `[]`) into a list of integers.
pub(crate) fn parse_array(value: &str) -> Option<Vec<u64>> {
    let inner = value.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    inner.split(',').map(|item| item.trim().parse().ok()).collect()
}

pub(crate) fn render_array(values: &[u64]) -> String {
    let items: Vec<String> = values.iter().map(u64::to_string).collect();
    format!("[{}]", items.join(","))
}

/// Staging name used by [`write_atomic`], unique per process and thread.
pub(crate) fn temp_path(path: &Path) -> io::Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_name = format!(
        "{}.{}.{:?}.tmp",
        file_name.to_string_lossy(),
        std::process::id(),
        std::thread::current().id()
    );
    Ok(path.with_file_name(temp_name))
}

/// Replace `path` with `contents` through a temp file + rename so readers
/// never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = temp_path(path)?;

    let mut file = File::create(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}
