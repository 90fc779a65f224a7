//! Mapping plans: mapping lines resolved against both schemas.
//!
//! Building a plan is where every construction-time check lives. A plan that
//! builds only refers to segments, fields, tables and columns that exist, and
//! its table references line up with the file's link forest so that every
//! dependent row has a parent row in scope when it is needed.

use super::{ColumnSource, ExportMapping, FieldSource, ImportMapping, VirtualTable};
use crate::error::FlatError;
use crate::schema::{FileSchema, TableSchema};
use crate::store::{Row, row_matches};
use crate::types::Value;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::debug;
use std::collections::BTreeSet;
use std::fmt;

/// Value source of one exported column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    Field(String),
    Constant(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFeed {
    pub column: String,
    pub feed: Feed,
}

/// Columns of one table fed by one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFeed {
    pub table: String,
    pub columns: Vec<ColumnFeed>,
    /// The table is also fed deeper in the file: look the row up before
    /// creating it.
    pub check_first: bool,
}

/// Validated export mappings, grouped by segment.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    segments: IndexMap<String, Vec<TableFeed>>,
    updated: Vec<String>,
}

impl ExportPlan {
    /// # Errors
    /// Unknown names, constants that do not fit their column, and table sets
    /// that cannot be populated top-down from the file are schema errors.
    pub fn new(file: &FileSchema, tables: &TableSchema, mappings: &[ExportMapping]) -> Result<Self> {
        if mappings.is_empty() {
            crate::flat_bail!(schema, "export plan", "no export mappings");
        }

        let mut segments: IndexMap<String, Vec<TableFeed>> = IndexMap::new();
        for m in mappings {
            let source = format!("mapping {m}");
            let segment = file.require_segment(&m.segment).with_context(|| source.clone())?;
            let table = tables.require_table(&m.table).with_context(|| source.clone())?;
            let column = table.require_column(&m.column).with_context(|| source.clone())?;
            let feed = match &m.source {
                FieldSource::Field(f) => {
                    if segment.field(f).is_none() {
                        crate::flat_bail!(schema, source, "segment {} has no field {f}", segment.name());
                    }
                    Feed::Field(f.clone())
                }
                FieldSource::Constant(v) => Feed::Constant(column.ty.parse(v).with_context(|| {
                    FlatError::schema(source.clone(), format!("constant {v:?} does not fit {}", column.ty))
                })?),
            };

            let feeds = segments.entry(m.segment.clone()).or_default();
            let idx = match feeds.iter().position(|t| t.table == m.table) {
                Some(i) => i,
                None => {
                    feeds.push(TableFeed {
                        table: m.table.clone(),
                        columns: Vec::new(),
                        check_first: false,
                    });
                    feeds.len() - 1
                }
            };
            if feeds[idx].columns.iter().any(|c| c.column == m.column) {
                crate::flat_bail!(schema, source, "{}.{} is already fed by {}", m.table, m.column, m.segment);
            }
            feeds[idx].columns.push(ColumnFeed {
                column: m.column.clone(),
                feed,
            });
        }
        for feeds in segments.values_mut() {
            feeds.sort_by_key(|t| tables.depth_of(&t.table));
        }

        let mut updated: Vec<String> = Vec::new();
        for feed in segments.values().flatten() {
            if !updated.contains(&feed.table) {
                updated.push(feed.table.clone());
            }
        }
        updated.sort_by_key(|t| tables.depth_of(t));
        check_single_root(tables, &updated)?;
        check_parent_rows(file, tables, &segments, &updated)?;
        mark_check_first(file, &mut segments);

        debug!(
            "export plan for {}: {} segments feed {}",
            file.path().display(),
            segments.len(),
            updated.join(", ")
        );
        Ok(Self { segments, updated })
    }

    /// Table feeds of `segment`, parent tables first.
    pub fn feeds(&self, segment: &str) -> &[TableFeed] {
        self.segments.get(segment).map_or(&[], Vec::as_slice)
    }

    /// Every table the plan writes to, parents first.
    pub fn updated_tables(&self) -> &[String] {
        &self.updated
    }
}

/// All updated tables hang below one updated table, with no unmapped table in
/// between.
fn check_single_root(tables: &TableSchema, updated: &[String]) -> Result<()> {
    if updated.len() < 2 {
        return Ok(());
    }
    let source = "export plan";
    let mut tops = Vec::new();
    for t in updated {
        match tables.links().parent_target(t) {
            Some(p) if updated.iter().any(|u| u == p) => {}
            Some(p) => {
                let lineage = tables.lineage(t);
                if let Some(above) = lineage.iter().rev().skip(1).find(|a| updated.iter().any(|u| u == *a)) {
                    crate::flat_bail!(
                        schema,
                        source,
                        "table {p} sits between {above} and {t} but nothing is mapped to it"
                    );
                }
                tops.push(t.as_str());
            }
            None => tops.push(t.as_str()),
        }
    }
    if tops.len() > 1 {
        crate::flat_bail!(
            schema,
            source,
            "mapped tables must hang below a single mapped root table, found {}",
            tops.join(", ")
        );
    }
    Ok(())
}

/// A dependent table's parent must be fed by the same segment or by one of its
/// ancestors in the file.
fn check_parent_rows(
    file: &FileSchema,
    tables: &TableSchema,
    segments: &IndexMap<String, Vec<TableFeed>>,
    updated: &[String],
) -> Result<()> {
    for (segment, feeds) in segments {
        let Some(link) = file.link_of(segment) else {
            crate::flat_bail!(schema, "export plan", "segment {segment} is not linked");
        };
        for feed in feeds {
            let Some((parent, _)) = tables.parent_of(&feed.table) else {
                continue;
            };
            if !updated.contains(&parent.name) {
                continue;
            }
            let covered = segments.iter().any(|(other, other_feeds)| {
                other_feeds.iter().any(|f| f.table == parent.name)
                    && (other == segment
                        || file
                            .link_of(other)
                            .is_some_and(|o| file.links().is_ancestor(o, link)))
            });
            if !covered {
                crate::flat_bail!(
                    schema,
                    "export plan",
                    "rows of {} from segment {segment} have no {} row above them in the file",
                    feed.table,
                    parent.name
                );
            }
        }
    }
    Ok(())
}

fn mark_check_first(file: &FileSchema, segments: &mut IndexMap<String, Vec<TableFeed>>) {
    let depth = |segment: &str| file.link_of(segment).map_or(0, |id| file.links().get(id).depth);
    let mut deepest: IndexMap<String, BTreeSet<usize>> = IndexMap::new();
    for (segment, feeds) in segments.iter() {
        for feed in feeds {
            deepest.entry(feed.table.clone()).or_default().insert(depth(segment));
        }
    }
    for (segment, feeds) in segments.iter_mut() {
        let d = depth(segment);
        for feed in feeds.iter_mut() {
            if let Some(depths) = deepest.get(&feed.table)
                && depths.len() > 1
                && depths.last().is_some_and(|max| d < *max)
            {
                feed.check_first = true;
            }
        }
    }
}

/// Rows of a table, optionally narrowed to a virtual table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSource {
    pub table: String,
    pub view: Option<String>,
}

impl fmt::Display for RowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.view {
            Some(v) => write!(f, "{v} ({})", self.table),
            None => f.write_str(&self.table),
        }
    }
}

/// Value source of one imported field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFeed {
    Column { source: RowSource, column: String },
    Constant(Value),
}

/// Field feeds of one segment and the row source that drives its instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    pub segment: String,
    pub fields: Vec<(String, FieldFeed)>,
    /// Deepest table the segment reads from; `None` for constant-only segments.
    pub driver: Option<RowSource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDef {
    pub name: String,
    pub table: String,
    pub predicate: Vec<(String, Value)>,
}

/// Validated import mappings, grouped by segment.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    segments: IndexMap<String, SegmentPlan>,
    views: IndexMap<String, ViewDef>,
}

impl ImportPlan {
    /// # Errors
    /// Unknown names, constants that do not fit their field, ambiguous drivers
    /// and segments whose tables do not nest the way the file does are schema
    /// errors.
    pub fn new(
        file: &FileSchema,
        tables: &TableSchema,
        mappings: &[ImportMapping],
        virtuals: &[VirtualTable],
    ) -> Result<Self> {
        if mappings.is_empty() {
            crate::flat_bail!(schema, "import plan", "no import mappings");
        }
        let views = resolve_views(tables, virtuals)?;

        let mut segments: IndexMap<String, SegmentPlan> = IndexMap::new();
        for m in mappings {
            let source = format!("mapping {m}");
            let segment = file.require_segment(&m.segment).with_context(|| source.clone())?;
            let Some(field) = segment.field(&m.field) else {
                crate::flat_bail!(schema, source, "segment {} has no field {}", m.segment, m.field);
            };
            let feed = match &m.source {
                ColumnSource::Constant(v) => FieldFeed::Constant(field.ty.parse(v).with_context(|| {
                    FlatError::schema(source.clone(), format!("constant {v:?} does not fit {}", field.ty))
                })?),
                ColumnSource::Column { table, column } => {
                    let row_source = match views.get(table) {
                        Some(view) => RowSource {
                            table: view.table.clone(),
                            view: Some(view.name.clone()),
                        },
                        None => RowSource {
                            table: tables.require_table(table).with_context(|| source.clone())?.name.clone(),
                            view: None,
                        },
                    };
                    tables
                        .require_table(&row_source.table)?
                        .require_column(column)
                        .with_context(|| source.clone())?;
                    FieldFeed::Column {
                        source: row_source,
                        column: column.clone(),
                    }
                }
            };
            let plan = segments.entry(m.segment.clone()).or_insert_with(|| SegmentPlan {
                segment: m.segment.clone(),
                fields: Vec::new(),
                driver: None,
            });
            if plan.fields.iter().any(|(f, _)| f == &m.field) {
                crate::flat_bail!(schema, source, "field {}.{} is already fed", m.segment, m.field);
            }
            plan.fields.push((m.field.clone(), feed));
        }

        for plan in segments.values_mut() {
            plan.driver = choose_driver(tables, plan)?;
        }
        check_nesting(file, tables, &segments)?;

        debug!(
            "import plan for {}: {} segments, {} virtual tables",
            file.path().display(),
            segments.len(),
            views.len()
        );
        Ok(Self { segments, views })
    }

    pub fn segment(&self, name: &str) -> Option<&SegmentPlan> {
        self.segments.get(name)
    }

    pub fn view(&self, name: &str) -> Option<&ViewDef> {
        self.views.get(name)
    }

    /// Whether `row` of `source.table` belongs to `source`. A plain table source
    /// only sees the rows no virtual table over it selects.
    pub fn accepts(&self, source: &RowSource, row: &Row) -> bool {
        match &source.view {
            Some(v) => self.views.get(v).is_some_and(|view| row_matches(row, &view.predicate)),
            None => !self
                .views
                .values()
                .filter(|view| view.table == source.table)
                .any(|view| row_matches(row, &view.predicate)),
        }
    }
}

fn resolve_views(tables: &TableSchema, virtuals: &[VirtualTable]) -> Result<IndexMap<String, ViewDef>> {
    let mut views = IndexMap::new();
    for v in virtuals {
        let source = format!("virtual table {}", v.name);
        if tables.table(&v.name).is_some() {
            crate::flat_bail!(schema, source, "name clashes with a real table");
        }
        if views.contains_key(&v.name) {
            crate::flat_bail!(schema, source, "declared twice");
        }
        let table = tables.require_table(&v.table).with_context(|| source.clone())?;
        let mut predicate = Vec::with_capacity(v.terms.len());
        for (column, literal) in &v.terms {
            let def = table.require_column(column).with_context(|| source.clone())?;
            let value = def.ty.parse(literal).with_context(|| {
                FlatError::schema(source.clone(), format!("{literal:?} does not fit {}.{column}", table.name))
            })?;
            predicate.push((column.clone(), value));
        }
        views.insert(
            v.name.clone(),
            ViewDef {
                name: v.name.clone(),
                table: table.name.clone(),
                predicate,
            },
        );
    }
    Ok(views)
}

fn choose_driver(tables: &TableSchema, plan: &SegmentPlan) -> Result<Option<RowSource>> {
    let mut sources: Vec<&RowSource> = Vec::new();
    for (_, feed) in &plan.fields {
        if let FieldFeed::Column { source, .. } = feed
            && !sources.contains(&source)
        {
            sources.push(source);
        }
    }
    let Some(driver) = sources.iter().max_by_key(|s| tables.depth_of(&s.table)).copied() else {
        return Ok(None);
    };
    let owner = format!("segment {}", plan.segment);
    for other in &sources {
        if *other == driver {
            continue;
        }
        if other.table == driver.table {
            crate::flat_bail!(schema, owner, "reads both {other} and {driver}; pick one");
        }
        if !tables.is_ancestor(&other.table, &driver.table) {
            crate::flat_bail!(
                schema,
                owner,
                "reads {other} and {driver}, which are not on one parent/child path"
            );
        }
    }
    Ok(Some(driver.clone()))
}

/// Each segment's driver is its file ancestors' driver or a dependent of it.
fn check_nesting(file: &FileSchema, tables: &TableSchema, segments: &IndexMap<String, SegmentPlan>) -> Result<()> {
    let links = file.links();
    for plan in segments.values() {
        let Some(driver) = &plan.driver else {
            continue;
        };
        let Some(id) = file.link_of(&plan.segment) else {
            continue;
        };
        for ancestor in links.ancestors(id) {
            let name = &links.get(ancestor).target;
            let Some(above) = segments.get(name).and_then(|p| p.driver.as_ref()) else {
                continue;
            };
            if above.table != driver.table && !tables.is_ancestor(&above.table, &driver.table) {
                crate::flat_bail!(
                    schema,
                    format!("segment {}", plan.segment),
                    "reads {driver} below segment {name}, which reads the unrelated table {above}"
                );
            }
        }
    }
    Ok(())
}
