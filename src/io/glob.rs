//! Glob expansion for batch exports.
//!
//! Legacy interfaces often drop one flat file per day or per batch
//! (`in/ORD*.DAT`, `spool/2024-*/orders.txt`). [`expand_glob`] turns such a
//! pattern into the concrete list of files, in a deterministic order, so that
//! [`Exporter::export_glob`](crate::mapping::export::Exporter::export_glob) can
//! load them one after another into the same store.
//!
//! ```no_run
//! use flatbridge::io::glob::expand_glob;
//!
//! for path in expand_glob("spool/ORD*.DAT")? {
//!     println!("{}", path.display());
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::FlatError;
use anyhow::{Context, Result};
use glob::glob;
use std::path::PathBuf;

/// Expand `pattern` into the sorted list of matching regular files.
///
/// Supports `*`, `?`, `**` and `[...]` classes. Directories are skipped. No match
/// is not an error.
///
/// # Errors
/// Returns a schema error for a malformed pattern and an I/O error when a
/// directory along the way cannot be read.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).map_err(|e| {
        FlatError::schema(format!("pattern {pattern}"), format!("invalid glob pattern: {e}"))
    })?;

    let mut files = Vec::new();
    for entry in paths {
        let path = entry
            .with_context(|| FlatError::io(format!("pattern {pattern}"), "unreadable glob entry"))?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Like [`expand_glob`] but zero matches is an I/O error.
///
/// # Errors
/// See [`expand_glob`]; also fails when nothing matches.
pub fn expand_glob_required(pattern: &str) -> Result<Vec<PathBuf>> {
    let files = expand_glob(pattern)?;
    if files.is_empty() {
        crate::flat_bail!(io, format!("pattern {pattern}"), "no files found matching pattern");
    }
    Ok(files)
}
