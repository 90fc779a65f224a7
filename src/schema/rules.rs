//! Rule documents: one file describing both schemas and the mappings.
//!
//! Rules are usually kept in XML next to the flat files they describe:
//!
//! ```xml
//! <rules>
//!   <file path="orders.txt" encoding="utf-8" record-separator="\n" field-separator=";">
//!     <segment name="HDR" discriminator="H">
//!       <field name="order_no" type="integer"/>
//!       <field name="customer" type="alpha"/>
//!     </segment>
//!     <segment name="LINE" discriminator="L">
//!       <field name="sku" type="alpha"/>
//!       <field name="qty" type="integer"/>
//!     </segment>
//!     <links>
//!       <link>HDR</link>
//!       <link>.LINE</link>
//!     </links>
//!   </file>
//!   <tables>
//!     <table name="orders">
//!       <column name="id" type="integer" key="true"/>
//!       <column name="customer" type="alpha"/>
//!     </table>
//!     <table name="order_lines">
//!       <column name="order_id" type="integer" key="true"/>
//!       <column name="sku" type="alpha" key="true"/>
//!       <column name="qty" type="integer"/>
//!     </table>
//!     <links>
//!       <link>orders</link>
//!       <link parent-keys="id" child-keys="order_id">.order_lines</link>
//!     </links>
//!   </tables>
//!   <export>
//!     <map>HDR.order_no.orders.id</map>
//!     <map>HDR.customer.orders</map>
//!     <map>LINE.sku.order_lines</map>
//!     <map>LINE.qty.order_lines</map>
//!   </export>
//!   <import>
//!     <map>HDR.order_no.orders.id</map>
//!     <map>HDR.customer.orders</map>
//!     <map>LINE.sku.order_lines</map>
//!     <map>LINE.qty.order_lines</map>
//!   </import>
//! </rules>
//! ```
//!
//! The same document can be written in JSON. Attributes become plain keys,
//! repeated elements become arrays under their element name (`segment`,
//! `field`, `table`, `column`, `link`, `map`, `virtual`) and a link is written
//! `{"line": ".LINE"}`. XML loading sits behind the `xml-rules` feature (on by
//! default).

use super::file::{FieldDef, FileSchema, Layout, Segment};
use super::table::{ColumnDef, KeyJoin, TableDef, TableSchema};
use crate::error::FlatError;
use crate::mapping::{ExportMapping, Exporter, ImportMapping, Importer, VirtualTable};
use crate::types::FieldType;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "rules")]
pub struct RuleSet {
    pub file: FileRule,
    pub tables: TablesRule,
    #[serde(default)]
    pub export: Option<ExportRule>,
    #[serde(default)]
    pub import: Option<ImportRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRule {
    #[serde(rename = "@path", alias = "path")]
    pub path: String,
    #[serde(rename = "@encoding", alias = "encoding", default)]
    pub encoding: Option<String>,
    #[serde(rename = "@record-separator", alias = "record-separator", default)]
    pub record_separator: Option<String>,
    #[serde(rename = "@field-separator", alias = "field-separator", default)]
    pub field_separator: Option<String>,
    #[serde(rename = "@field-quote", alias = "field-quote", default)]
    pub field_quote: Option<String>,
    #[serde(rename = "@chunk-size", alias = "chunk-size", default)]
    pub chunk_size: Option<usize>,
    #[serde(rename = "segment", default)]
    pub segments: Vec<SegmentRule>,
    #[serde(default)]
    pub links: Option<LinksRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentRule {
    #[serde(rename = "@name", alias = "name")]
    pub name: String,
    #[serde(rename = "@discriminator", alias = "discriminator", default)]
    pub discriminator: Option<String>,
    /// Fixed-width layout inside a delimited file.
    #[serde(rename = "@fixed", alias = "fixed", default)]
    pub fixed: Option<bool>,
    #[serde(rename = "field", alias = "fields", default)]
    pub fields: Vec<FieldRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldRule {
    #[serde(rename = "@name", alias = "name")]
    pub name: String,
    #[serde(rename = "@type", alias = "type")]
    pub kind: String,
    #[serde(rename = "@format", alias = "format", default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinksRule {
    #[serde(rename = "link", default)]
    pub links: Vec<LinkRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkRule {
    #[serde(rename = "$text", alias = "line")]
    pub line: String,
    #[serde(rename = "@parent-keys", alias = "parent-keys", default)]
    pub parent_keys: Option<String>,
    #[serde(rename = "@child-keys", alias = "child-keys", default)]
    pub child_keys: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TablesRule {
    #[serde(rename = "table", default)]
    pub tables: Vec<TableRule>,
    #[serde(default)]
    pub links: Option<LinksRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableRule {
    #[serde(rename = "@name", alias = "name")]
    pub name: String,
    #[serde(rename = "column", alias = "columns", default)]
    pub columns: Vec<ColumnRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnRule {
    #[serde(rename = "@name", alias = "name")]
    pub name: String,
    #[serde(rename = "@type", alias = "type")]
    pub kind: String,
    #[serde(rename = "@format", alias = "format", default)]
    pub format: Option<String>,
    #[serde(rename = "@key", alias = "key", default)]
    pub key: Option<bool>,
    #[serde(rename = "@nullable", alias = "nullable", default)]
    pub nullable: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportRule {
    #[serde(rename = "map", default)]
    pub maps: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRule {
    #[serde(rename = "virtual", default)]
    pub virtuals: Vec<VirtualRule>,
    #[serde(rename = "map", default)]
    pub maps: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualRule {
    #[serde(rename = "@name", alias = "name")]
    pub name: String,
    #[serde(rename = "@table", alias = "table")]
    pub table: String,
    #[serde(rename = "@where", alias = "where")]
    pub selection: String,
}

/// Schemas and mappings built from a [`RuleSet`].
#[derive(Debug, Clone)]
pub struct Rules {
    pub file: Arc<FileSchema>,
    pub tables: Arc<TableSchema>,
    pub export: Vec<ExportMapping>,
    pub import: Vec<ImportMapping>,
    pub virtuals: Vec<VirtualTable>,
}

impl Rules {
    /// # Errors
    /// Fails when the document has no export mappings or they do not fit.
    pub fn exporter(&self) -> Result<Exporter> {
        if self.export.is_empty() {
            crate::flat_bail!(schema, "rules", "no <export> mappings");
        }
        Exporter::new(self.file.clone(), self.tables.clone(), &self.export)
    }

    /// # Errors
    /// Fails when the document has no import mappings or they do not fit.
    pub fn importer(&self) -> Result<Importer> {
        if self.import.is_empty() {
            crate::flat_bail!(schema, "rules", "no <import> mappings");
        }
        Importer::new(self.file.clone(), self.tables.clone(), &self.import, &self.virtuals)
    }
}

impl RuleSet {
    /// # Errors
    /// Malformed XML, or XML that does not match the rules grammar.
    #[cfg(feature = "xml-rules")]
    pub fn from_xml_str(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml).map_err(|e| FlatError::schema("rules", format!("invalid XML rules: {e}")).into())
    }

    /// # Errors
    /// Unreadable files and malformed rules.
    #[cfg(feature = "xml-rules")]
    pub fn from_xml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = fs::read_to_string(path)
            .with_context(|| FlatError::io(format!("rules {}", path.display()), "cannot read rules file"))?;
        Self::from_xml_str(&xml).with_context(|| format!("load rules {}", path.display()))
    }

    /// # Errors
    /// Malformed JSON, or JSON that does not match the rules grammar.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FlatError::schema("rules", format!("invalid JSON rules: {e}")).into())
    }

    /// # Errors
    /// Unreadable files and malformed rules.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| FlatError::io(format!("rules {}", path.display()), "cannot read rules file"))?;
        Self::from_json_str(&json).with_context(|| format!("load rules {}", path.display()))
    }

    /// Validate the document and build both schemas. Mapping lines are parsed
    /// here; they are checked against the schemas by
    /// [`Rules::exporter`] and [`Rules::importer`].
    ///
    /// # Errors
    /// Any schema error in the document.
    pub fn build(&self) -> Result<Rules> {
        let file = self.build_file().context("build file schema")?;
        let tables = self.build_tables().context("build table schema")?;

        let export = self
            .export
            .as_ref()
            .map(|e| e.maps.iter().map(|m| ExportMapping::parse(m)).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();
        let (import, virtuals) = match &self.import {
            Some(rule) => (
                rule.maps.iter().map(|m| ImportMapping::parse(m)).collect::<Result<Vec<_>>>()?,
                rule.virtuals
                    .iter()
                    .map(|v| VirtualTable::parse(&v.name, &v.table, &v.selection))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(Rules {
            file: Arc::new(file),
            tables: Arc::new(tables),
            export,
            import,
            virtuals,
        })
    }

    fn build_file(&self) -> Result<FileSchema> {
        let rule = &self.file;
        let mut builder = FileSchema::builder(&rule.path);
        if let Some(encoding) = &rule.encoding {
            builder = builder.encoding(encoding);
        }
        if let Some(rs) = &rule.record_separator {
            builder = builder.record_separator(rs);
        }
        if let Some(fs) = &rule.field_separator {
            builder = builder.field_separator(fs);
        }
        if let Some(q) = &rule.field_quote {
            builder = builder.field_quote(q);
        }
        if let Some(n) = rule.chunk_size {
            builder = builder.chunk_size(n);
        }
        for seg in &rule.segments {
            let fields = seg
                .fields
                .iter()
                .map(|f| FieldDef::parse(&f.name, &f.kind, f.format.as_deref().unwrap_or_default()))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("segment {}", seg.name))?;
            let layout = if rule.field_separator.is_none() || seg.fixed.unwrap_or(false) {
                Layout::Fixed
            } else {
                Layout::Delimited
            };
            builder = builder.segment(Segment::new(&seg.name, layout, seg.discriminator.as_deref(), fields)?);
        }
        for link in rule.links.iter().flat_map(|l| &l.links) {
            builder = builder.link(link.line.trim());
        }
        builder.build()
    }

    fn build_tables(&self) -> Result<TableSchema> {
        let mut builder = TableSchema::builder();
        for table in &self.tables.tables {
            let mut columns = Vec::with_capacity(table.columns.len());
            let mut key = Vec::new();
            for c in &table.columns {
                let ty = FieldType::from_spec(&c.kind, c.format.as_deref().unwrap_or_default())
                    .with_context(|| format!("column {}.{}", table.name, c.name))?;
                let mut column = ColumnDef::new(&c.name, ty);
                if c.nullable == Some(false) {
                    column = column.not_null();
                }
                if c.key.unwrap_or(false) {
                    key.push(c.name.clone());
                }
                columns.push(column);
            }
            builder = builder.table(TableDef::new(&table.name, columns, key)?);
        }
        for link in self.tables.links.iter().flat_map(|l| &l.links) {
            let join = KeyJoin::parse(
                link.parent_keys.as_deref().unwrap_or_default(),
                link.child_keys.as_deref().unwrap_or_default(),
            );
            builder = builder.link_with(link.line.trim(), join);
        }
        builder.build()
    }
}
