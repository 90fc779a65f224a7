//! Moving data between a [`FileSchema`](crate::schema::FileSchema) and a
//! [`TableSchema`](crate::schema::TableSchema).
//!
//! Mappings are written one per line, as dotted paths:
//!
//! | direction | line                          | meaning                                   |
//! |-----------|-------------------------------|-------------------------------------------|
//! | export    | `HDR.order_no.orders.id`      | field `order_no` of `HDR` into `orders.id` |
//! | export    | `LINE.qty.order_lines`        | column defaults to the field name         |
//! | export    | `HDR.=EU.orders.region`       | constant `EU` into `orders.region`        |
//! | import    | `HDR.order_no.orders.id`      | column `orders.id` into field `order_no`  |
//! | import    | `HDR.kind.=[A.1]`             | constant (brackets allow dots)            |
//!
//! Import mappings may also name a virtual table: a named subset of a real
//! table's rows selected by column equality, used when one table carries
//! several record shapes.
//!
//! [`Exporter`] reads a file into the store, [`Importer`] writes the store back
//! out as a file. Both validate their mappings against the schemas when they
//! are constructed, so a bad mapping fails before any data is touched.

pub mod export;
pub mod import;
pub mod plan;

pub use export::Exporter;
pub use import::Importer;

use crate::error::FlatError;
use anyhow::Result;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Literal(String),
}

fn tokenize(line: &str) -> Result<Vec<Token>> {
    let source = format!("mapping {line:?}");
    let mut tokens = Vec::new();
    let mut rest = line.trim();
    if rest.is_empty() {
        crate::flat_bail!(schema, source, "empty mapping");
    }
    loop {
        if let Some(r) = rest.strip_prefix("=[") {
            let Some(end) = r.find(']') else {
                crate::flat_bail!(schema, source, "unclosed '[' in constant");
            };
            tokens.push(Token::Literal(r[..end].to_string()));
            rest = &r[end + 1..];
        } else if let Some(r) = rest.strip_prefix('=') {
            let end = r.find('.').unwrap_or(r.len());
            tokens.push(Token::Literal(r[..end].to_string()));
            rest = &r[end..];
        } else {
            let end = rest.find('.').unwrap_or(rest.len());
            let name = rest[..end].trim();
            if name.is_empty() {
                crate::flat_bail!(schema, source, "empty name in mapping path");
            }
            tokens.push(Token::Name(name.to_string()));
            rest = &rest[end..];
        }
        if rest.is_empty() {
            return Ok(tokens);
        }
        match rest.strip_prefix('.') {
            Some(r) if !r.is_empty() => rest = r,
            _ => crate::flat_bail!(schema, source, "expected a name after '.'"),
        }
    }
}

/// Where an exported column value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Field(String),
    Constant(String),
}

/// One export line: a segment field (or constant) into a table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportMapping {
    pub segment: String,
    pub source: FieldSource,
    pub table: String,
    pub column: String,
}

impl ExportMapping {
    /// Parse `segment.field.table[.column]` or `segment.=literal.table.column`.
    ///
    /// # Errors
    /// Malformed lines are schema errors.
    pub fn parse(line: &str) -> Result<Self> {
        let tokens = tokenize(line)?;
        let name = |t: &Token| match t {
            Token::Name(n) => Some(n.clone()),
            Token::Literal(_) => None,
        };
        let parsed = match tokens.as_slice() {
            [Token::Name(s), Token::Name(f), Token::Name(t)] => Some(Self {
                segment: s.clone(),
                source: FieldSource::Field(f.clone()),
                table: t.clone(),
                column: f.clone(),
            }),
            [Token::Name(s), src, Token::Name(t), Token::Name(c)] => Some(Self {
                segment: s.clone(),
                source: match src {
                    Token::Name(f) => FieldSource::Field(f.clone()),
                    Token::Literal(v) => FieldSource::Constant(v.clone()),
                },
                table: t.clone(),
                column: c.clone(),
            }),
            [Token::Name(_), Token::Literal(_), t] if name(t).is_some() => {
                crate::flat_bail!(schema, format!("mapping {line:?}"), "a constant needs an explicit column");
            }
            _ => None,
        };
        parsed.ok_or_else(|| {
            FlatError::schema(
                format!("mapping {line:?}"),
                "expected segment.field.table[.column] or segment.=constant.table.column",
            )
            .into()
        })
    }
}

impl fmt::Display for ExportMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            FieldSource::Field(field) => write!(f, "{}.{field}.{}.{}", self.segment, self.table, self.column),
            FieldSource::Constant(v) => write!(f, "{}.=[{v}].{}.{}", self.segment, self.table, self.column),
        }
    }
}

/// Where an imported field value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// `table` is a real or a virtual table name.
    Column { table: String, column: String },
    Constant(String),
}

/// One import line: a table column (or constant) into a segment field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportMapping {
    pub segment: String,
    pub field: String,
    pub source: ColumnSource,
}

impl ImportMapping {
    /// Parse `segment.field.table[.column]` or `segment.field.=literal`.
    ///
    /// # Errors
    /// Malformed lines are schema errors.
    pub fn parse(line: &str) -> Result<Self> {
        let tokens = tokenize(line)?;
        let parsed = match tokens.as_slice() {
            [Token::Name(s), Token::Name(f), Token::Name(t)] => Some(Self {
                segment: s.clone(),
                field: f.clone(),
                source: ColumnSource::Column {
                    table: t.clone(),
                    column: f.clone(),
                },
            }),
            [Token::Name(s), Token::Name(f), Token::Name(t), Token::Name(c)] => Some(Self {
                segment: s.clone(),
                field: f.clone(),
                source: ColumnSource::Column {
                    table: t.clone(),
                    column: c.clone(),
                },
            }),
            [Token::Name(s), Token::Name(f), Token::Literal(v)] => Some(Self {
                segment: s.clone(),
                field: f.clone(),
                source: ColumnSource::Constant(v.clone()),
            }),
            _ => None,
        };
        parsed.ok_or_else(|| {
            FlatError::schema(
                format!("mapping {line:?}"),
                "expected segment.field.table[.column] or segment.field.=constant",
            )
            .into()
        })
    }
}

impl fmt::Display for ImportMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ColumnSource::Column { table, column } => {
                write!(f, "{}.{}.{table}.{column}", self.segment, self.field)
            }
            ColumnSource::Constant(v) => write!(f, "{}.{}.=[{v}]", self.segment, self.field),
        }
    }
}

/// A named subset of a table's rows, selected by `column = literal` terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualTable {
    pub name: String,
    pub table: String,
    /// `(column, literal)` pairs, parsed with the column's type when the import
    /// plan is built.
    pub terms: Vec<(String, String)>,
}

impl VirtualTable {
    /// Parse a `col=value,col2=[value, with commas]` selection.
    ///
    /// # Errors
    /// An empty or malformed selection is a schema error.
    pub fn parse(name: impl Into<String>, table: impl Into<String>, selection: &str) -> Result<Self> {
        let name = name.into();
        let source = format!("virtual table {name}");
        let mut terms = Vec::new();
        let mut rest = selection.trim();
        while !rest.is_empty() {
            let Some(eq) = rest.find('=') else {
                crate::flat_bail!(schema, source, "expected column=value in {selection:?}");
            };
            let column = rest[..eq].trim();
            if column.is_empty() {
                crate::flat_bail!(schema, source, "missing column name in {selection:?}");
            }
            let after = rest[eq + 1..].trim_start();
            let (value, tail) = if let Some(r) = after.strip_prefix('[') {
                let Some(end) = r.find(']') else {
                    crate::flat_bail!(schema, source, "unclosed '[' in {selection:?}");
                };
                (r[..end].to_string(), &r[end + 1..])
            } else {
                let end = after.find(',').unwrap_or(after.len());
                (after[..end].trim().to_string(), &after[end..])
            };
            terms.push((column.to_string(), value));
            let tail = tail.trim_start();
            rest = match tail.strip_prefix(',') {
                Some(r) => r.trim_start(),
                None if tail.is_empty() => tail,
                None => crate::flat_bail!(schema, source, "expected ',' after a term in {selection:?}"),
            };
        }
        if terms.is_empty() {
            crate::flat_bail!(schema, source, "a virtual table needs at least one selection term");
        }
        Ok(Self {
            name,
            table: table.into(),
            terms,
        })
    }
}
