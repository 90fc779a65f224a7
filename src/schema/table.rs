//! Relational side of a mapping: tables, columns and key joins.

use super::link::{LinkId, LinkSpec, LinkTree};
use crate::error::FlatError;
use crate::store::RelationalStore;
use crate::types::FieldType;
use anyhow::{Context, Result};
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: IndexMap<String, ColumnDef>,
    /// Primary key column names, in key order. Empty when the table has none.
    pub primary_key: Vec<String>,
}

impl TableDef {
    /// # Errors
    /// Duplicate columns and key columns that are not declared are schema errors.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>, primary_key: Vec<String>) -> Result<Self> {
        let name = name.into();
        let source = format!("table {name}");
        let mut by_name = IndexMap::with_capacity(columns.len());
        for mut column in columns {
            if by_name.contains_key(&column.name) {
                crate::flat_bail!(schema, source, "column {} declared twice", column.name);
            }
            if primary_key.contains(&column.name) {
                column.nullable = false;
            }
            by_name.insert(column.name.clone(), column);
        }
        if by_name.is_empty() {
            crate::flat_bail!(schema, source, "a table needs at least one column");
        }
        if let Some(missing) = primary_key.iter().find(|k| !by_name.contains_key(*k)) {
            crate::flat_bail!(schema, source, "primary key column {missing} is not declared");
        }
        Ok(Self {
            name,
            columns: by_name,
            primary_key,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.get(name)
    }

    /// # Errors
    /// Unknown columns are schema errors.
    pub fn require_column(&self, name: &str) -> Result<&ColumnDef> {
        self.columns
            .get(name)
            .ok_or_else(|| FlatError::schema(format!("table {}", self.name), format!("unknown column {name}")).into())
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }
}

/// Column correspondence between a parent table and a dependent table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyJoin {
    pub parent_keys: Vec<String>,
    pub child_keys: Vec<String>,
}

impl KeyJoin {
    pub fn new(parent_keys: Vec<String>, child_keys: Vec<String>) -> Self {
        Self {
            parent_keys,
            child_keys,
        }
    }

    /// Parse comma-separated key lists.
    pub fn parse(parent_keys: &str, child_keys: &str) -> Self {
        let split = |s: &str| {
            s.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        Self::new(split(parent_keys), split(child_keys))
    }

    /// `(parent column, child column)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parent_keys
            .iter()
            .zip(&self.child_keys)
            .map(|(p, c)| (p.as_str(), c.as_str()))
    }
}

/// Tables and the key joins between them.
#[derive(Debug, Clone)]
pub struct TableSchema {
    tables: IndexMap<String, TableDef>,
    links: LinkTree<KeyJoin>,
}

impl TableSchema {
    pub fn builder() -> TableSchemaBuilder {
        TableSchemaBuilder::default()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// # Errors
    /// Unknown tables are schema errors.
    pub fn require_table(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .ok_or_else(|| FlatError::schema("table schema", format!("unknown table {name}")).into())
    }

    pub fn links(&self) -> &LinkTree<KeyJoin> {
        &self.links
    }

    pub fn link_of(&self, table: &str) -> Option<LinkId> {
        self.links.find(table)
    }

    /// Parent table and join for a dependent table.
    pub fn parent_of(&self, table: &str) -> Option<(&TableDef, &KeyJoin)> {
        let id = self.links.find(table)?;
        let node = self.links.get(id);
        let parent = self.links.get(node.parent?);
        Some((self.tables.get(&parent.target)?, &node.payload))
    }

    /// Depth of `table` in the link forest (0 for roots and unlinked tables).
    pub fn depth_of(&self, table: &str) -> usize {
        self.links.find(table).map_or(0, |id| self.links.get(id).depth)
    }

    /// Table names from the root of `table`'s tree down to `table`.
    pub fn lineage(&self, table: &str) -> Vec<&str> {
        match self.links.find(table) {
            Some(id) => self
                .links
                .path_from_root(id)
                .into_iter()
                .map(|n| self.links.get(n).target.as_str())
                .collect(),
            None => self.tables.get_key_value(table).map(|(k, _)| vec![k.as_str()]).unwrap_or_default(),
        }
    }

    pub fn is_ancestor(&self, ancestor: &str, of: &str) -> bool {
        match (self.links.find(ancestor), self.links.find(of)) {
            (Some(a), Some(b)) => self.links.is_ancestor(a, b),
            _ => false,
        }
    }

    /// Create every table in `store`, parents first.
    ///
    /// # Errors
    /// Store failures, such as a table that already exists.
    pub fn create_tables<S: RelationalStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        let mut order: Vec<&TableDef> = self.tables.values().collect();
        order.sort_by_key(|t| self.depth_of(&t.name));
        for table in order {
            store
                .create_table(table)
                .with_context(|| format!("create table {}", table.name))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableSchemaBuilder {
    tables: Vec<TableDef>,
    links: Vec<(String, KeyJoin)>,
}

impl TableSchemaBuilder {
    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// A root link such as `orders`.
    pub fn root(mut self, line: impl Into<String>) -> Self {
        self.links.push((line.into(), KeyJoin::default()));
        self
    }

    /// A dependent link such as `.order_lines`, joined on `parent_keys = child_keys`.
    pub fn link(mut self, line: impl Into<String>, parent_keys: &[&str], child_keys: &[&str]) -> Self {
        let keys = |k: &[&str]| k.iter().map(|s| s.to_string()).collect();
        self.links
            .push((line.into(), KeyJoin::new(keys(parent_keys), keys(child_keys))));
        self
    }

    pub fn link_with(mut self, line: impl Into<String>, join: KeyJoin) -> Self {
        self.links.push((line.into(), join));
        self
    }

    /// # Errors
    /// Unknown tables or columns in links, mismatched key lists, missing primary
    /// keys and malformed link forests are schema errors.
    pub fn build(self) -> Result<TableSchema> {
        let source = "table schema";
        let mut tables: IndexMap<String, TableDef> = IndexMap::new();
        for table in self.tables {
            if tables.contains_key(&table.name) {
                crate::flat_bail!(schema, source, "table {} declared twice", table.name);
            }
            tables.insert(table.name.clone(), table);
        }
        if tables.is_empty() {
            crate::flat_bail!(schema, source, "at least one table is required");
        }

        let mut links: LinkTree<KeyJoin> = LinkTree::new(source);
        for (line, join) in self.links {
            let spec = LinkSpec::parse(&line)?;
            let Some(child) = tables.get(&spec.target) else {
                crate::flat_bail!(schema, source, "link {spec} names an unknown table");
            };
            let id = links.push(&spec, join)?;
            let node = links.get(id);
            let Some(parent_id) = node.parent else {
                if !node.payload.parent_keys.is_empty() || !node.payload.child_keys.is_empty() {
                    crate::flat_bail!(schema, source, "root link {spec} cannot carry join keys");
                }
                continue;
            };
            let parent = &tables[&links.get(parent_id).target];
            let join = &node.payload;
            if join.parent_keys.is_empty() || join.parent_keys.len() != join.child_keys.len() {
                crate::flat_bail!(
                    schema,
                    source,
                    "link {spec} needs matching parent and child key lists, got {} and {}",
                    join.parent_keys.len(),
                    join.child_keys.len()
                );
            }
            for (p, c) in join.pairs() {
                if parent.column(p).is_none() {
                    crate::flat_bail!(schema, source, "link {spec}: {}.{p} does not exist", parent.name);
                }
                if child.column(c).is_none() {
                    crate::flat_bail!(schema, source, "link {spec}: {}.{c} does not exist", child.name);
                }
            }
            if !parent.has_primary_key() {
                crate::flat_bail!(
                    schema,
                    source,
                    "table {} has dependents and needs a primary key",
                    parent.name
                );
            }
        }

        if links.is_empty()
            && tables.len() == 1
            && let Some(only) = tables.keys().next()
        {
            links.push(&LinkSpec::parse(only)?, KeyJoin::default())?;
        }
        if tables.len() > 1 {
            for table in tables.values() {
                if !table.has_primary_key() {
                    crate::flat_bail!(schema, source, "table {} needs a primary key", table.name);
                }
                if !links.contains(&table.name) {
                    crate::flat_bail!(schema, source, "table {} is not linked", table.name);
                }
            }
        }
        links.check_roots()?;

        Ok(TableSchema { tables, links })
    }
}
