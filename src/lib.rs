//! # Flatbridge
//!
//! Conversion between **flat record files** and **relational tables**.
//!
//! A flat file is a sequence of records, each either fixed-width or delimited,
//! optionally prefixed by a discriminator that names its *segment* (record
//! shape). Segments nest: an order header is followed by its lines, a line by
//! its notes. Flatbridge reads such files into tables linked by keys, and
//! writes tables back out as files, driven by declarative rules.
//!
//! ## Key Features
//!
//! - **Queued file I/O** - a worker thread per file with backpressure, or a synchronous fallback
//! - **Record framing** - any record separator, field separators, quoted fields, chunk-boundary safe
//! - **Field codecs** - alpha, integer, decimal, date/time and memo types with fixed or free widths
//! - **Nested segments** - dotted link trees with optional and unique flags, checked while reading
//! - **Export and import** - file to tables and tables to file, including memo continuation lines
//! - **Virtual tables** - one table split into several record shapes by column values
//! - **Rule documents** - XML (feature `xml-rules`) or JSON
//!
//! ## Quick Start
//!
//! ```
//! use flatbridge::schema::RuleSet;
//! use flatbridge::store::{MemoryStore, RelationalStore};
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! # let dir = tempfile::tempdir()?;
//! # let input = dir.path().join("orders.txt");
//! # std::fs::write(&input, flatbridge::testing::ORDERS_FILE)?;
//! let rules = RuleSet::from_json_str(&flatbridge::testing::orders_rules_json(&input))?.build()?;
//!
//! // File to tables
//! let mut store = MemoryStore::new();
//! let stats = rules.exporter()?.export(&mut store)?;
//! assert_eq!(stats.records_read, 5);
//! assert_eq!(store.count("order_lines")?, 3);
//!
//! // Tables back to a file
//! let output = dir.path().join("copy.txt");
//! rules.importer()?.import_to(&output, &store)?;
//! assert_eq!(std::fs::read_to_string(&output)?, std::fs::read_to_string(&input)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### File schema
//!
//! A [`FileSchema`] lists the segments of a file, its record and field
//! separators, its text encoding and the *link tree* that says which segment
//! follows which. Link lines use leading dots for depth and an optional
//! `.F` (optional), `.U` (unique) or `.FU` suffix:
//!
//! ```text
//! HDR
//! .LINE.F
//! ..NOTE.FU
//! ```
//!
//! ### Table schema
//!
//! A [`TableSchema`] lists tables, their columns and primary keys, and a link
//! tree of the same grammar whose child links carry the key columns joining
//! the child to its parent.
//!
//! ### Mappings
//!
//! Export and import mappings tie segment fields to table columns. See
//! [`mapping`] for the line syntax.
//!
//! ### Stores
//!
//! Tables live behind the [`RelationalStore`] trait. [`MemoryStore`] is the
//! bundled implementation.
//!
//! ## Errors
//!
//! Every failure is an [`anyhow::Error`] whose chain carries a [`FlatError`]
//! naming its [`ErrorKind`] and the record, field or rule it concerns. Use
//! [`error_kind`] to branch on the category.
//!
//! ## Logging
//!
//! Progress and skipped input are reported through the [`log`] facade; install
//! any logger (for example `env_logger`) to see them.
//!
//! ## Module Overview
//!
//! - [`config`] - I/O engine settings
//! - [`error`] - error categories
//! - [`io`] - queued file engine, record framing, text encodings, globbing
//! - [`types`] - field codecs and values
//! - [`schema`] - file and table schemas, link trees, rule documents
//! - [`mapping`] - export and import
//! - [`store`] - relational store trait and in-memory store
//! - [`stats`] - transfer counters
//! - [`testing`] - fixtures and assertions for downstream tests

pub mod config;
pub mod error;
pub mod io;
pub mod mapping;
pub mod schema;
pub mod stats;
pub mod store;
pub mod testing;
pub mod types;

pub use config::{IoConfig, IoMode};
pub use error::{ErrorKind, FlatError, error_kind, flat_error};
pub use io::engine::{Access, AsyncFile, EngineState, ReadChunk, ReadSink};
pub use io::record::{RecordFormat, RecordReader, RecordWriter};
pub use mapping::{ExportMapping, Exporter, ImportMapping, Importer, VirtualTable};
pub use schema::{FileSchema, Rules, RuleSet, TableSchema};
pub use stats::TransferStats;
pub use store::{MemoryStore, RelationalStore, Row};
pub use types::{FieldType, Value};
