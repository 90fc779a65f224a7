//! Tables -> file.
//!
//! The file's link forest is walked top-down. For every link, the segment's
//! driving table (the deepest table its fields read from) decides how many
//! records it gets:
//!
//! - the driving row is already in scope (an ancestor record read the same
//!   table): one record, or none for an optional segment whose mapped columns
//!   are all null;
//! - otherwise the driving table's rows are enumerated by descending the table
//!   forest from the deepest table already in scope, following the key joins,
//!   and every row yields one record followed by that record's own children;
//! - constant-only segments get one record per parent record.
//!
//! Sibling segments driven by the same table (typically through virtual
//! tables) share one enumeration, so records come out in row order whatever
//! their shape.

use super::plan::{FieldFeed, ImportPlan, SegmentPlan};
use super::{ImportMapping, VirtualTable};
use crate::config::IoConfig;
use crate::error::FlatError;
use crate::io::record::{RecordFormat, RecordWriter};
use crate::schema::{EncodedRecord, FileSchema, LinkId, TableSchema};
use crate::stats::TransferStats;
use crate::store::{RelationalStore, Row};
use crate::types::Value;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Current row of each table, keyed by table name.
type Scope = HashMap<String, Row>;

struct Emitter<'a, S: RelationalStore + ?Sized> {
    file: &'a FileSchema,
    tables: &'a TableSchema,
    plan: &'a ImportPlan,
    store: &'a S,
    format: RecordFormat,
    writer: RecordWriter,
    source: String,
    rows_read: u64,
    memo_lines: u64,
}

impl<S: RelationalStore + ?Sized> Emitter<'_, S> {
    /// Emit the records of `links` (siblings) under one parent record.
    fn emit_level(&mut self, links: &[LinkId], scope: &Scope, parent: Option<&str>) -> Result<()> {
        let file = self.file;
        let plan = self.plan;
        let forest = file.links();
        let mut done = vec![false; links.len()];
        let mut counts: HashMap<LinkId, usize> = HashMap::new();

        for i in 0..links.len() {
            if done[i] {
                continue;
            }
            done[i] = true;
            let id = links[i];
            let node = forest.get(id);
            let Some(segment_plan) = plan.segment(&node.target) else {
                debug!("segment {} has no import mapping and is not written", node.target);
                continue;
            };

            match &segment_plan.driver {
                None => {
                    self.emit_record(id, segment_plan, scope)?;
                    *counts.entry(id).or_default() += 1;
                }
                Some(driver) if scope.contains_key(&driver.table) => {
                    let row = &scope[&driver.table];
                    let absent = node.flags.optional && all_columns_null(segment_plan, scope);
                    if plan.accepts(driver, row) && !absent {
                        self.emit_record(id, segment_plan, scope)?;
                        *counts.entry(id).or_default() += 1;
                    }
                }
                Some(driver) => {
                    let mut group = vec![i];
                    for j in i + 1..links.len() {
                        let shares_table = plan
                            .segment(&forest.get(links[j]).target)
                            .and_then(|p| p.driver.as_ref())
                            .is_some_and(|d| d.table == driver.table);
                        if !done[j] && shares_table {
                            done[j] = true;
                            group.push(j);
                        }
                    }

                    let contexts = self.enumerate(&driver.table, scope)?;
                    self.rows_read += contexts.len() as u64;
                    for ctx in &contexts {
                        let row = &ctx[&driver.table];
                        for j in &group {
                            let sibling = links[*j];
                            let Some(sibling_plan) = plan.segment(&forest.get(sibling).target) else {
                                continue;
                            };
                            let accepted = sibling_plan
                                .driver
                                .as_ref()
                                .is_some_and(|d| plan.accepts(d, row));
                            if accepted {
                                self.emit_record(sibling, sibling_plan, ctx)?;
                                *counts.entry(sibling).or_default() += 1;
                            }
                        }
                    }
                }
            }
        }

        for id in links {
            let node = forest.get(*id);
            let n = counts.get(id).copied().unwrap_or(0);
            let under = parent.map(|p| format!(" under {p}")).unwrap_or_default();
            if node.flags.unique && n > 1 {
                crate::flat_bail!(
                    mapping,
                    self.source.clone(),
                    "unique segment {} would be written {n} times{under}",
                    node.target
                );
            }
            if parent.is_some() && !node.flags.optional && n == 0 && plan.segment(&node.target).is_some() {
                crate::flat_bail!(
                    mapping,
                    self.source.clone(),
                    "mandatory segment {} has no data{under}",
                    node.target
                );
            }
        }
        Ok(())
    }

    /// Rows of `table` reachable from `scope`, each with the rows of every table
    /// on the way down.
    fn enumerate(&self, table: &str, scope: &Scope) -> Result<Vec<Scope>> {
        let lineage = self.tables.lineage(table);
        let Some(root) = lineage.first() else {
            crate::flat_bail!(schema, self.source.clone(), "unknown table {table}");
        };

        let (mut contexts, from) = match lineage.iter().rposition(|t| scope.contains_key(*t)) {
            Some(k) => (vec![scope.clone()], k + 1),
            None => {
                let rows = self.store.rows(root).with_context(|| format!("read {root}"))?;
                let contexts = rows
                    .into_iter()
                    .map(|row| {
                        let mut ctx = scope.clone();
                        ctx.insert(root.to_string(), row);
                        ctx
                    })
                    .collect();
                (contexts, 1)
            }
        };

        for level in from..lineage.len() {
            let (parent, child) = (lineage[level - 1], lineage[level]);
            let Some((_, join)) = self.tables.parent_of(child) else {
                crate::flat_bail!(schema, self.source.clone(), "table {child} has no parent link");
            };
            let child_def = self.tables.require_table(child)?;
            let unique = self
                .tables
                .link_of(child)
                .is_some_and(|id| self.tables.links().get(id).flags.unique);

            let mut next = Vec::new();
            for ctx in contexts {
                let predicate = join
                    .pairs()
                    .map(|(p, c)| {
                        let value = ctx[parent].get(p).cloned().unwrap_or(Value::Null);
                        Ok((c.to_string(), child_def.require_column(c)?.ty.coerce(value)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let rows = self
                    .store
                    .select(child, &predicate)
                    .with_context(|| format!("read {child}"))?;
                if unique && rows.len() > 1 {
                    crate::flat_bail!(
                        mapping,
                        format!("table {child}"),
                        "linked uniquely to {parent} but has {} rows for one {parent} row",
                        rows.len()
                    );
                }
                for row in rows {
                    let mut deeper = ctx.clone();
                    deeper.insert(child.to_string(), row);
                    next.push(deeper);
                }
            }
            contexts = next;
        }
        Ok(contexts)
    }

    /// Write one record of `plan.segment`, its memo continuation lines, then its
    /// child records.
    fn emit_record(&mut self, id: LinkId, plan: &SegmentPlan, ctx: &Scope) -> Result<()> {
        let file = self.file;
        let segment = file.require_segment(&plan.segment)?;
        let mut values: IndexMap<String, Value> = IndexMap::with_capacity(plan.fields.len());
        for (field, feed) in &plan.fields {
            let value = match feed {
                FieldFeed::Constant(v) => v.clone(),
                FieldFeed::Column { source, column } => {
                    let Some(row) = ctx.get(&source.table) else {
                        crate::flat_bail!(
                            mapping,
                            self.source.clone(),
                            "no {} row in scope for {}.{field}",
                            source.table,
                            plan.segment
                        );
                    };
                    row.get(column).cloned().unwrap_or(Value::Null)
                }
            };
            let Some(def) = segment.field(field) else {
                crate::flat_bail!(schema, self.source.clone(), "segment {} has no field {field}", plan.segment);
            };
            let value = def
                .ty
                .coerce(value)
                .with_context(|| format!("{}.{field} in {}", plan.segment, self.source))?;
            values.insert(field.clone(), value);
        }

        let mut continuation: Vec<String> = Vec::new();
        if let Some(memo) = segment.memo_field()
            && let Some(Value::Text(text)) = values.get(memo)
            && text.contains('\n')
        {
            let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l).to_string());
            let first = lines.next().unwrap_or_default();
            continuation = lines.collect();
            values.insert(memo.to_string(), Value::Text(first));
        }

        let encoded = segment
            .encode(&values)
            .with_context(|| format!("{} record in {}", plan.segment, self.source))?;
        self.write(encoded)?;

        for line in continuation {
            if file.looks_like_header(&self.format, &line)? {
                crate::flat_bail!(
                    codec,
                    self.source.clone(),
                    "memo line {line:?} of segment {} would read back as a record header",
                    plan.segment
                );
            }
            let bytes = file.text().encode(&line)?;
            if let Some(q) = self.format.field_quote()
                && bytes.starts_with(q)
            {
                crate::flat_bail!(
                    codec,
                    self.source.clone(),
                    "memo line {line:?} of segment {} starts with the field quote",
                    plan.segment
                );
            }
            self.writer.write_raw(&[bytes])?;
            self.memo_lines += 1;
        }

        let children = file.links().get(id).children.clone();
        if !children.is_empty() {
            self.emit_level(&children, ctx, Some(&plan.segment))?;
        }
        Ok(())
    }

    fn write(&mut self, record: EncodedRecord) -> Result<()> {
        let text = self.file.text();
        match record {
            EncodedRecord::Fixed(line) => self.writer.write_raw(&[text.encode(&line)?]),
            EncodedRecord::Delimited(fields) => {
                let fields = fields.iter().map(|f| text.encode(f)).collect::<Result<Vec<_>>>()?;
                self.writer.write_records(&[fields])
            }
        }
    }
}

/// An optional segment reading an in-scope row is absent when every column it
/// maps is null.
fn all_columns_null(plan: &SegmentPlan, scope: &Scope) -> bool {
    let mut columns = plan.fields.iter().filter_map(|(_, feed)| match feed {
        FieldFeed::Column { source, column } => Some(
            scope
                .get(&source.table)
                .and_then(|row| row.get(column))
                .is_none_or(Value::is_null),
        ),
        FieldFeed::Constant(_) => None,
    });
    let mut any = false;
    let all = columns.all(|null| {
        any = true;
        null
    });
    any && all
}

/// Writes a [`RelationalStore`] out as a flat file.
///
/// ```no_run
/// use flatbridge::schema::RuleSet;
/// use flatbridge::store::MemoryStore;
///
/// let rules = RuleSet::from_xml_file("orders.rules.xml")?.build()?;
/// let store = MemoryStore::new();
/// // ... fill the store ...
/// let stats = rules.importer()?.import_to("out/orders.txt", &store)?;
/// println!("{} records", stats.records_written);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Importer {
    file: Arc<FileSchema>,
    tables: Arc<TableSchema>,
    plan: ImportPlan,
    config: IoConfig,
}

impl Importer {
    /// # Errors
    /// Mappings that do not fit the schemas are schema errors.
    pub fn new(
        file: impl Into<Arc<FileSchema>>,
        tables: impl Into<Arc<TableSchema>>,
        mappings: &[ImportMapping],
        virtuals: &[VirtualTable],
    ) -> Result<Self> {
        let file = file.into();
        let tables = tables.into();
        let plan = ImportPlan::new(&file, &tables, mappings, virtuals)?;
        Ok(Self {
            file,
            tables,
            plan,
            config: IoConfig::default(),
        })
    }

    #[must_use]
    pub fn with_config(mut self, config: IoConfig) -> Self {
        self.config = config;
        self
    }

    pub fn plan(&self) -> &ImportPlan {
        &self.plan
    }

    /// Write the file named by the file schema.
    ///
    /// # Errors
    /// See [`import_to`](Self::import_to).
    pub fn import<S: RelationalStore + ?Sized>(&self, store: &S) -> Result<TransferStats> {
        self.import_to(self.file.path(), store)
    }

    /// Create (or truncate) `path` and write the store's rows into it.
    ///
    /// # Errors
    /// I/O, codec, conversion and mapping errors.
    pub fn import_to<S: RelationalStore + ?Sized>(&self, path: impl AsRef<Path>, store: &S) -> Result<TransferStats> {
        let path = path.as_ref();
        let started = Instant::now();
        let source = format!("file {}", path.display());
        let format = self.file.write_format()?;
        let config = self.file.io_config(&self.config);
        let writer = RecordWriter::create(path, format.clone(), config)
            .with_context(|| FlatError::io(source.clone(), "cannot create output file"))?;

        let mut emitter = Emitter {
            file: &self.file,
            tables: &self.tables,
            plan: &self.plan,
            store,
            format,
            writer,
            source: source.clone(),
            rows_read: 0,
            memo_lines: 0,
        };
        let roots: Vec<LinkId> = self.file.links().roots().collect();
        emitter.emit_level(&roots, &Scope::new(), None)?;

        let stats = TransferStats {
            files: 1,
            rows_read: emitter.rows_read,
            memo_continuations: emitter.memo_lines,
            records_written: emitter.writer.finish()?,
            elapsed: started.elapsed(),
            ..Default::default()
        };
        info!(
            "{source}: {} records written from {} rows",
            stats.records_written, stats.rows_read
        );
        Ok(stats)
    }
}
