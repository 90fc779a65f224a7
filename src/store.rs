//! The relational store the mapping engine reads from and writes to.
//!
//! [`RelationalStore`] is the seam to a real database. It only needs what the
//! mapping engine does with tables: create them, insert rows with primary key
//! enforcement, and select rows by column equality. [`MemoryStore`] keeps
//! everything in insertion order and is what the tests run against.

use crate::error::FlatError;
use crate::schema::TableDef;
use crate::types::Value;
use anyhow::Result;
use indexmap::IndexMap;
use log::trace;
use std::collections::HashSet;

/// Column values keyed by column name, in column order.
pub type Row = IndexMap<String, Value>;

/// Conjunction of `column = value` terms.
pub type Predicate = [(String, Value)];

pub trait RelationalStore {
    /// # Errors
    /// Creating a table twice is an error.
    fn create_table(&mut self, table: &TableDef) -> Result<()>;

    fn has_table(&self, table: &str) -> bool;

    /// Insert one row. Columns missing from `row` are null.
    ///
    /// # Errors
    /// Unknown columns, nulls in non-nullable columns and duplicate primary keys
    /// are mapping errors.
    fn insert(&mut self, table: &str, row: Row) -> Result<()>;

    /// Every row, in insertion order.
    fn rows(&self, table: &str) -> Result<Vec<Row>>;

    /// Rows whose columns equal every term of `predicate`, in insertion order.
    fn select(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>>;

    /// Remove every row of `table`.
    fn clear(&mut self, table: &str) -> Result<()>;

    fn count(&self, table: &str) -> Result<usize> {
        Ok(self.rows(table)?.len())
    }
}

/// Whether `row` satisfies every term of `predicate`.
pub fn row_matches(row: &Row, predicate: &Predicate) -> bool {
    predicate
        .iter()
        .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
}

#[derive(Debug, Clone)]
struct MemoryTable {
    def: TableDef,
    rows: Vec<Row>,
    keys: HashSet<Vec<Value>>,
}

/// An in-memory [`RelationalStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: IndexMap<String, MemoryTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| FlatError::mapping(format!("table {name}"), "no such table in the store").into())
    }
}

impl RelationalStore for MemoryStore {
    fn create_table(&mut self, table: &TableDef) -> Result<()> {
        if self.tables.contains_key(&table.name) {
            crate::flat_bail!(mapping, format!("table {}", table.name), "table already exists");
        }
        self.tables.insert(
            table.name.clone(),
            MemoryTable {
                def: table.clone(),
                rows: Vec::new(),
                keys: HashSet::new(),
            },
        );
        Ok(())
    }

    fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn insert(&mut self, table: &str, mut row: Row) -> Result<()> {
        let source = format!("table {table}");
        let Some(t) = self.tables.get_mut(table) else {
            crate::flat_bail!(mapping, source, "no such table in the store");
        };
        if let Some(unknown) = row.keys().find(|c| !t.def.columns.contains_key(*c)) {
            crate::flat_bail!(mapping, source, "unknown column {unknown}");
        }

        let mut full = Row::with_capacity(t.def.columns.len());
        for column in t.def.columns.values() {
            let value = row.shift_remove(&column.name).unwrap_or(Value::Null);
            if value.is_null() && !column.nullable {
                crate::flat_bail!(mapping, source, "column {} cannot be null", column.name);
            }
            full.insert(column.name.clone(), value);
        }

        if !t.def.primary_key.is_empty() {
            let key: Vec<Value> = t.def.primary_key.iter().map(|k| full[k].clone()).collect();
            if t.keys.contains(&key) {
                let shown: Vec<String> = key.iter().map(ToString::to_string).collect();
                crate::flat_bail!(mapping, source, "duplicate primary key ({})", shown.join(", "));
            }
            t.keys.insert(key);
        }
        trace!("insert into {table}: {full:?}");
        t.rows.push(full);
        Ok(())
    }

    fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.table(table)?.rows.clone())
    }

    fn select(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>> {
        Ok(self
            .table(table)?
            .rows
            .iter()
            .filter(|row| row_matches(row, predicate))
            .cloned()
            .collect())
    }

    fn clear(&mut self, table: &str) -> Result<()> {
        let source = format!("table {table}");
        let Some(t) = self.tables.get_mut(table) else {
            crate::flat_bail!(mapping, source, "no such table in the store");
        };
        t.rows.clear();
        t.keys.clear();
        Ok(())
    }

    fn count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, error_kind};
    use crate::schema::ColumnDef;
    use crate::types::FieldType;

    fn orders() -> TableDef {
        TableDef::new(
            "orders",
            vec![
                ColumnDef::new("id", FieldType::integer()),
                ColumnDef::new("customer", FieldType::alpha()),
            ],
            vec!["id".to_string()],
        )
        .unwrap()
    }

    fn row(id: i64, customer: &str) -> Row {
        Row::from_iter([("id".to_string(), Value::from(id)), ("customer".to_string(), Value::from(customer))])
    }

    #[test]
    fn insert_fills_missing_columns_in_column_order() {
        let mut store = MemoryStore::new();
        store.create_table(&orders()).unwrap();
        store
            .insert("orders", Row::from_iter([("id".to_string(), Value::from(7))]))
            .unwrap();
        let rows = store.rows("orders").unwrap();
        let columns: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["id", "customer"]);
        assert_eq!(rows[0]["customer"], Value::Null);
    }

    #[test]
    fn key_and_null_violations() {
        let mut store = MemoryStore::new();
        store.create_table(&orders()).unwrap();
        store.insert("orders", row(1, "ACME")).unwrap();

        let err = store.insert("orders", row(1, "GLOBEX")).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Mapping));
        let err = store
            .insert("orders", Row::from_iter([("customer".to_string(), Value::from("X"))]))
            .unwrap_err();
        assert!(err.to_string().contains("cannot be null"), "{err}");
        assert!(store.insert("nope", row(2, "X")).is_err());
        assert!(store.create_table(&orders()).is_err());
    }

    #[test]
    fn select_and_clear() {
        let mut store = MemoryStore::new();
        store.create_table(&orders()).unwrap();
        for (id, customer) in [(1, "ACME"), (2, "GLOBEX"), (3, "ACME")] {
            store.insert("orders", row(id, customer)).unwrap();
        }
        let acme = store
            .select("orders", &[("customer".to_string(), Value::from("ACME"))])
            .unwrap();
        assert_eq!(acme.len(), 2);
        assert_eq!(acme[1]["id"], Value::from(3));

        store.clear("orders").unwrap();
        assert_eq!(store.count("orders").unwrap(), 0);
        store.insert("orders", row(1, "ACME")).unwrap();
    }
}
