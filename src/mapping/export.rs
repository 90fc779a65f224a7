//! File -> tables.
//!
//! Records are identified one by one and assembled into object graphs: a root
//! record with every record nested under it, following the file's link forest.
//! When the next root record arrives (or the file ends) the finished graph is
//! checked for missing mandatory segments and written to the store depth-first,
//! so that each dependent row can copy its foreign key from the parent row
//! created just before it.
//!
//! Placement of a record walks up from the most recent record: a record whose
//! link is a child of the current record's link nests under it, otherwise the
//! walk moves to the current record's parent and tries again. Running off the
//! top without a match means the record is out of sequence.
//!
//! Segments with a memo field keep their record open: lines that match no
//! segment are appended to the memo, separated by `\n`, until the next
//! recognized record.

use super::ExportMapping;
use super::plan::{ExportPlan, Feed, TableFeed};
use crate::config::IoConfig;
use crate::io::glob::expand_glob_required;
use crate::io::record::RecordReader;
use crate::schema::{FileSchema, LinkId, TableSchema};
use crate::stats::TransferStats;
use crate::store::{RelationalStore, Row};
use crate::types::Value;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
struct Instance {
    segment: String,
    link: LinkId,
    record: u64,
    values: IndexMap<String, Value>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// A root record and every record nested under it, in file order.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    nodes: Vec<Instance>,
}

impl ObjectGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Segment names in file order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.segment.as_str())
    }
}

/// Checks record order against the link forest and groups records into graphs.
struct Conformance<'a> {
    file: &'a FileSchema,
    source: String,
    graph: Option<ObjectGraph>,
    current: usize,
    unique_roots: HashSet<LinkId>,
}

impl<'a> Conformance<'a> {
    fn new(file: &'a FileSchema, source: String) -> Self {
        Self {
            file,
            source,
            graph: None,
            current: 0,
            unique_roots: HashSet::new(),
        }
    }

    /// Place one record; returns the previous graph when this record starts a
    /// new one.
    fn push(&mut self, segment: &str, record: u64, values: IndexMap<String, Value>) -> Result<Option<ObjectGraph>> {
        let file = self.file;
        let links = file.links();
        let Some(link) = file.link_of(segment) else {
            crate::flat_bail!(schema, self.source.clone(), "segment {segment} is not linked");
        };
        let node = links.get(link);
        let instance = Instance {
            segment: segment.to_string(),
            link,
            record,
            values,
            parent: None,
            children: Vec::new(),
        };

        if node.is_root() {
            if node.flags.unique && !self.unique_roots.insert(link) {
                crate::flat_bail!(
                    mapping,
                    self.source.clone(),
                    "record #{record}: unique root segment {segment} appears a second time"
                );
            }
            let finished = self.close()?;
            self.graph = Some(ObjectGraph { nodes: vec![instance] });
            self.current = 0;
            return Ok(finished);
        }

        let Some(graph) = self.graph.as_mut() else {
            crate::flat_bail!(
                mapping,
                self.source.clone(),
                "record #{record}: segment {segment} appears before any {} record",
                links.get(links.root_of(link)).target
            );
        };
        let mut cursor = Some(self.current);
        while let Some(idx) = cursor {
            if node.parent == Some(graph.nodes[idx].link) {
                if node.flags.unique
                    && let Some(first) = graph.nodes[idx]
                        .children
                        .iter()
                        .find(|c| graph.nodes[**c].link == link)
                {
                    crate::flat_bail!(
                        mapping,
                        self.source.clone(),
                        "record #{record}: unique segment {segment} already appeared at record #{} under {} (record #{})",
                        graph.nodes[*first].record,
                        graph.nodes[idx].segment,
                        graph.nodes[idx].record
                    );
                }
                let id = graph.nodes.len();
                graph.nodes.push(Instance {
                    parent: Some(idx),
                    ..instance
                });
                graph.nodes[idx].children.push(id);
                self.current = id;
                return Ok(None);
            }
            cursor = graph.nodes[idx].parent;
        }
        let after = &graph.nodes[self.current];
        crate::flat_bail!(
            mapping,
            self.source.clone(),
            "record #{record}: segment {segment} cannot follow {} (record #{})",
            after.segment,
            after.record
        )
    }

    fn finish(&mut self) -> Result<Option<ObjectGraph>> {
        self.close()
    }

    /// Take the open graph after checking that no mandatory segment is missing.
    fn close(&mut self) -> Result<Option<ObjectGraph>> {
        let Some(graph) = self.graph.take() else {
            return Ok(None);
        };
        let file = self.file;
        let links = file.links();
        for instance in &graph.nodes {
            for child in &links.get(instance.link).children {
                let child_node = links.get(*child);
                if child_node.flags.optional {
                    continue;
                }
                if !instance.children.iter().any(|c| graph.nodes[*c].link == *child) {
                    crate::flat_bail!(
                        mapping,
                        self.source.clone(),
                        "mandatory segment {} is missing under {} (record #{})",
                        child_node.target,
                        instance.segment,
                        instance.record
                    );
                }
            }
        }
        Ok(Some(graph))
    }
}

/// Writes object graphs into the store.
struct Materializer<'a, S: RelationalStore + ?Sized> {
    plan: &'a ExportPlan,
    tables: &'a TableSchema,
    store: &'a mut S,
    source: &'a str,
    unique_children: HashSet<(String, Vec<Value>)>,
    inserted: u64,
    reused: u64,
}

impl<S: RelationalStore + ?Sized> Materializer<'_, S> {
    fn materialize(&mut self, graph: &ObjectGraph) -> Result<()> {
        if graph.is_empty() {
            return Ok(());
        }
        self.visit(graph, 0, &HashMap::new())
    }

    fn visit(&mut self, graph: &ObjectGraph, idx: usize, scope: &HashMap<String, Row>) -> Result<()> {
        let plan = self.plan;
        let instance = &graph.nodes[idx];
        let mut scope = scope.clone();
        for feed in plan.feeds(&instance.segment) {
            let row = self.build_row(instance, feed, &scope)?;
            let row = if feed.check_first {
                self.find_or_insert(&feed.table, row)?
            } else {
                self.insert(&feed.table, row)?
            };
            scope.insert(feed.table.clone(), row);
        }
        for child in &instance.children {
            self.visit(graph, *child, &scope)?;
        }
        Ok(())
    }

    fn build_row(&mut self, instance: &Instance, feed: &TableFeed, scope: &HashMap<String, Row>) -> Result<Row> {
        let tables = self.tables;
        let source = self.source;
        let at = || format!("{source} record #{}", instance.record);
        let table = tables.require_table(&feed.table)?;
        let mut row = Row::with_capacity(table.columns.len());
        for cf in &feed.columns {
            let column = table.require_column(&cf.column)?;
            let value = match &cf.feed {
                Feed::Field(f) => instance.values.get(f).cloned().unwrap_or(Value::Null),
                Feed::Constant(v) => v.clone(),
            };
            let value = column
                .ty
                .coerce(value)
                .with_context(|| format!("{}.{} from {} at {}", table.name, column.name, instance.segment, at()))?;
            row.insert(cf.column.clone(), value);
        }

        let Some((parent, join)) = tables.parent_of(&feed.table) else {
            return Ok(row);
        };
        if !self.plan.updated_tables().contains(&parent.name) {
            return Ok(row);
        }
        let Some(parent_row) = scope.get(&parent.name) else {
            crate::flat_bail!(
                mapping,
                at(),
                "no {} row is in scope for the {} row of segment {}",
                parent.name,
                table.name,
                instance.segment
            );
        };
        let mut foreign_key = Vec::with_capacity(join.child_keys.len());
        for (p, c) in join.pairs() {
            let column = table.require_column(c)?;
            let inherited = column
                .ty
                .coerce(parent_row.get(p).cloned().unwrap_or(Value::Null))
                .with_context(|| format!("{}.{c} from {}.{p} at {}", table.name, parent.name, at()))?;
            if let Some(own) = row.get(c)
                && !own.is_null()
                && *own != inherited
            {
                crate::flat_bail!(
                    mapping,
                    at(),
                    "{}.{c} = {own} disagrees with its parent {}.{p} = {inherited}",
                    table.name,
                    parent.name
                );
            }
            foreign_key.push(inherited.clone());
            row.insert(c.to_string(), inherited);
        }

        let unique = tables
            .link_of(&feed.table)
            .is_some_and(|id| tables.links().get(id).flags.unique);
        if unique && !self.unique_children.insert((table.name.clone(), foreign_key)) {
            crate::flat_bail!(
                mapping,
                at(),
                "{} is linked uniquely to {} and already has a row for this parent",
                table.name,
                parent.name
            );
        }
        Ok(row)
    }

    fn insert(&mut self, table: &str, row: Row) -> Result<Row> {
        self.store
            .insert(table, row.clone())
            .with_context(|| format!("insert into {table} from {}", self.source))?;
        self.inserted += 1;
        Ok(row)
    }

    fn find_or_insert(&mut self, table: &str, row: Row) -> Result<Row> {
        let tables = self.tables;
        let def = tables.require_table(table)?;
        let keyed = def.has_primary_key()
            && def
                .primary_key
                .iter()
                .all(|k| row.get(k).is_some_and(|v| !v.is_null()));
        let predicate: Vec<(String, Value)> = if keyed {
            def.primary_key
                .iter()
                .map(|k| (k.clone(), row.get(k).cloned().unwrap_or(Value::Null)))
                .collect()
        } else {
            row.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        if let Some(found) = self.store.select(table, &predicate)?.into_iter().next() {
            self.reused += 1;
            return Ok(found);
        }
        self.insert(table, row)
    }
}

/// A record waiting for possible memo continuation lines.
struct Held {
    segment: String,
    record: u64,
    values: IndexMap<String, Value>,
    memo: Option<String>,
    continuations: u64,
}

/// Loads flat files into a [`RelationalStore`].
///
/// ```no_run
/// use flatbridge::mapping::{ExportMapping, Exporter};
/// use flatbridge::schema::RuleSet;
/// use flatbridge::store::MemoryStore;
///
/// let rules = RuleSet::from_xml_file("orders.rules.xml")?.build()?;
/// let mut store = MemoryStore::new();
/// rules.tables.create_tables(&mut store)?;
/// let stats = rules.exporter()?.export(&mut store)?;
/// stats.print();
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Exporter {
    file: Arc<FileSchema>,
    tables: Arc<TableSchema>,
    plan: ExportPlan,
    config: IoConfig,
}

impl Exporter {
    /// # Errors
    /// Mappings that do not fit the schemas are schema errors.
    pub fn new(
        file: impl Into<Arc<FileSchema>>,
        tables: impl Into<Arc<TableSchema>>,
        mappings: &[ExportMapping],
    ) -> Result<Self> {
        let file = file.into();
        let tables = tables.into();
        let plan = ExportPlan::new(&file, &tables, mappings)?;
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

    pub fn plan(&self) -> &ExportPlan {
        &self.plan
    }

    /// Export the file named by the file schema.
    ///
    /// # Errors
    /// See [`export_file`](Self::export_file).
    pub fn export<S: RelationalStore + ?Sized>(&self, store: &mut S) -> Result<TransferStats> {
        self.export_file(self.file.path(), store)
    }

    /// Export every file matching `pattern`, in sorted order, into the same store.
    ///
    /// # Errors
    /// No matching file is an I/O error; the first failing file stops the run.
    pub fn export_glob<S: RelationalStore + ?Sized>(&self, pattern: &str, store: &mut S) -> Result<TransferStats> {
        let mut total = TransferStats::default();
        for path in expand_glob_required(pattern)? {
            total.merge(&self.export_file(&path, store)?);
        }
        Ok(total)
    }

    /// Read `path` with this exporter's layout and insert its rows into `store`.
    ///
    /// Tables the plan writes to are created in the store when missing.
    ///
    /// # Errors
    /// I/O, codec, conversion and mapping errors, each naming the record that
    /// caused it.
    pub fn export_file<S: RelationalStore + ?Sized>(&self, path: impl AsRef<Path>, store: &mut S) -> Result<TransferStats> {
        let path = path.as_ref();
        let started = Instant::now();
        let source = format!("file {}", path.display());
        for name in self.plan.updated_tables() {
            if !store.has_table(name) {
                debug!("creating missing table {name}");
                store.create_table(self.tables.require_table(name)?)?;
            }
        }

        let config = self.file.io_config(&self.config);
        let format = self.file.record_format(path, &config)?;
        let mut reader = RecordReader::open(path, format.clone(), config)?;
        let mut stats = TransferStats {
            files: 1,
            ..Default::default()
        };
        let mut tracker = Conformance::new(&self.file, source.clone());
        let mut materializer = Materializer {
            plan: &self.plan,
            tables: &self.tables,
            store,
            source: &source,
            unique_children: HashSet::new(),
            inserted: 0,
            reused: 0,
        };

        let mut held: Option<Held> = None;
        let mut record_no = 0u64;
        while let Some(batch) = reader.next_batch()? {
            for bytes in batch {
                record_no += 1;
                let raw = self
                    .file
                    .read_record(&format, bytes)
                    .with_context(|| format!("{source}, record #{record_no}"))?;

                let blank = raw.text.trim().is_empty();
                let continues_memo = held.as_ref().is_some_and(|h| h.memo.is_some());
                if blank && !continues_memo {
                    warn!("{source}: skipping blank record #{record_no}");
                    continue;
                }
                let segment = if blank { None } else { self.file.identify(&raw) };
                let Some(segment) = segment else {
                    let rs = format.record_separator();
                    if raw.bytes.windows(rs.len()).any(|w| w == rs) {
                        crate::flat_bail!(
                            codec,
                            source.clone(),
                            "record #{record_no} runs over several lines through a quoted field: {:?}",
                            raw.text
                        );
                    }
                    if let Some(h) = held.as_mut()
                        && let Some(memo) = &h.memo
                    {
                        let appended = match h.values.get(memo) {
                            Some(Value::Text(prev)) if !prev.is_empty() || h.continuations > 0 => {
                                format!("{prev}\n{}", raw.text)
                            }
                            _ => raw.text.clone(),
                        };
                        h.values.insert(memo.clone(), Value::Text(appended));
                        h.continuations += 1;
                        stats.memo_continuations += 1;
                        continue;
                    }
                    if let Some(Err(err)) = &raw.fields {
                        return Err(anyhow::Error::from(err.clone()).context(format!("{source}, record #{record_no}")));
                    }
                    crate::flat_bail!(
                        mapping,
                        source.clone(),
                        "record #{record_no} matches no segment: {:?}",
                        raw.text
                    );
                };

                let values = segment
                    .decode(&raw, &format, self.file.text())
                    .with_context(|| format!("{source}, record #{record_no}"))?;
                stats.records_read += 1;
                if let Some(h) = held.take() {
                    release(h, &mut tracker, &mut materializer, &mut stats)?;
                }
                held = Some(Held {
                    segment: segment.name().to_string(),
                    record: record_no,
                    values,
                    memo: segment.memo_field().map(str::to_string),
                    continuations: 0,
                });
            }
        }
        if let Some(h) = held.take() {
            release(h, &mut tracker, &mut materializer, &mut stats)?;
        }
        if let Some(graph) = tracker.finish()? {
            materializer.materialize(&graph)?;
            stats.object_graphs += 1;
        }

        stats.rows_inserted = materializer.inserted;
        stats.rows_reused = materializer.reused;
        stats.elapsed = started.elapsed();
        info!(
            "{source}: {} records in {} object graphs, {} rows inserted, {} reused",
            stats.records_read, stats.object_graphs, stats.rows_inserted, stats.rows_reused
        );
        Ok(stats)
    }
}

fn release<S: RelationalStore + ?Sized>(
    held: Held,
    tracker: &mut Conformance<'_>,
    materializer: &mut Materializer<'_, S>,
    stats: &mut TransferStats,
) -> Result<()> {
    if let Some(graph) = tracker.push(&held.segment, held.record, held.values)? {
        materializer.materialize(&graph)?;
        stats.object_graphs += 1;
    }
    Ok(())
}
