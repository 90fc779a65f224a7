//! Declarative description of both sides of a conversion.
//!
//! - [`FileSchema`]: one flat file, its framing and its [`Segment`]s.
//! - [`TableSchema`]: tables, columns and the key joins between them.
//! - [`link`]: the dotted outline notation that builds parent/child forests on
//!   either side.
//! - [`rules`]: loading all of the above, plus mapping lines, from XML or JSON.

pub mod file;
pub mod link;
pub mod rules;
pub mod table;

pub use file::{EncodedRecord, FieldDef, FileSchema, FileSchemaBuilder, Layout, RawRecord, RecordSeparator, Segment};
pub use link::{LinkFlags, LinkId, LinkNode, LinkSpec, LinkTree};
pub use rules::{Rules, RuleSet};
pub use table::{ColumnDef, KeyJoin, TableDef, TableSchema, TableSchemaBuilder};
