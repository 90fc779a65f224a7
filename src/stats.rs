//! Counters reported by an export or import run.
//!
//! Every [`Exporter`](crate::mapping::Exporter) and
//! [`Importer`](crate::mapping::Importer) call returns a [`TransferStats`]. It
//! can be printed, turned into JSON, or saved next to the converted file:
//!
//! ```no_run
//! # use flatbridge::stats::TransferStats;
//! # fn run() -> anyhow::Result<TransferStats> { Ok(TransferStats::default()) }
//! let stats = run()?;
//! stats.print();
//! stats.save_to_file("orders.stats.json")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    /// Files read or written.
    pub files: usize,
    /// Records recognized as a segment (memo continuation lines excluded).
    pub records_read: u64,
    /// Records written, memo continuation lines included.
    pub records_written: u64,
    /// Lines appended to, or split out of, memo fields.
    pub memo_continuations: u64,
    /// Root records and everything nested under them.
    pub object_graphs: u64,
    pub rows_inserted: u64,
    /// Rows found by a look-up instead of being inserted again.
    pub rows_reused: u64,
    pub rows_read: u64,
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl TransferStats {
    /// Add the counters of another run to this one.
    pub fn merge(&mut self, other: &TransferStats) {
        self.files += other.files;
        self.records_read += other.records_read;
        self.records_written += other.records_written;
        self.memo_continuations += other.memo_continuations;
        self.object_graphs += other.object_graphs;
        self.rows_inserted += other.rows_inserted;
        self.rows_reused += other.rows_reused;
        self.rows_read += other.rows_read;
        self.elapsed += other.elapsed;
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    /// Print the counters to stdout.
    pub fn print(&self) {
        println!("\n========== Transfer Statistics ==========");
        println!(
            "Elapsed: {:.3}s ({} ms)",
            self.elapsed.as_secs_f64(),
            self.elapsed.as_millis()
        );
        println!("-----------------------------------------");
        println!("files: {}", self.files);
        println!("records_read: {}", self.records_read);
        println!("records_written: {}", self.records_written);
        println!("memo_continuations: {}", self.memo_continuations);
        println!("object_graphs: {}", self.object_graphs);
        println!("rows_inserted: {}", self.rows_inserted);
        println!("rows_reused: {}", self.rows_reused);
        println!("rows_read: {}", self.rows_read);
        println!("=========================================\n");
    }

    /// Save the counters as pretty-printed JSON.
    ///
    /// # Errors
    /// Fails if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
