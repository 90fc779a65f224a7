//! Testing utilities for flat-file conversions.
//!
//! - **Assertions**: check table contents and written files
//! - **Fixtures**: sample rule documents and flat files
//! - **Mock I/O**: scratch directories and fixture file helpers
//!
//! # Quick Start
//!
//! ```
//! use flatbridge::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ws = TestWorkspace::new()?;
//! let input = ws.write("orders.txt", ORDERS_FILE)?;
//! let rules = orders_rules(&input)?;
//!
//! let mut store = ws.store();
//! rules.exporter()?.export(&mut store)?;
//! assert_table_len(&store, "orders", 2);
//! assert_column_values(&store, "order_lines", "order_id", &[1, 1, 2]);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_io;

pub use assertions::*;
pub use fixtures::*;
pub use mock_io::*;

use crate::store::MemoryStore;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// A scratch directory for flat files plus a factory for empty stores.
pub struct TestWorkspace {
    dir: TempDirPath,
}

impl TestWorkspace {
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDirPath::new()?,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the workspace; the file need not exist.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.file_path(name)
    }

    /// Write a fixture file into the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, name: &str, content: impl AsRef<[u8]>) -> Result<PathBuf> {
        write_fixture(self.dir.path(), name, content)
    }

    /// Records of a workspace file, split on `separator`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn records(&self, name: &str, separator: &str) -> Result<Vec<String>> {
        read_records(self.path(name), separator)
    }

    #[must_use]
    pub fn store(&self) -> MemoryStore {
        MemoryStore::new()
    }
}
