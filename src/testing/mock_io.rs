//! Scratch directories for exercising exports and imports.
//!
//! Flat files are small in tests: write them in one go with [`write_fixture`],
//! run the conversion, and read the result back with [`read_records`].

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch directory, removed with everything in it when dropped.
pub struct TempDirPath {
    dir: TempDir,
}

impl TempDirPath {
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("create scratch directory")?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where `filename` lives inside the directory; nothing is created.
    #[must_use]
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.dir.path().join(filename)
    }
}

/// Write `content` to `dir/name`, creating intermediate directories, and
/// return the full path.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_fixture(dir: impl AsRef<Path>, name: &str, content: impl AsRef<[u8]>) -> Result<PathBuf> {
    let path = dir.as_ref().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Read a UTF-8 file and split it into records on `separator`. A trailing
/// separator does not produce an empty last record.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not UTF-8.
pub fn read_records(path: impl AsRef<Path>, separator: &str) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let body = text.strip_suffix(separator).unwrap_or(&text);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    Ok(body.split(separator).map(str::to_string).collect())
}
