//! Assertions over store contents and written files.

use crate::store::{RelationalStore, Row};
use crate::testing::mock_io::read_records;
use crate::types::Value;
use std::fmt::Debug;
use std::path::Path;

/// Assert that `table` holds exactly `expected` rows.
///
/// # Panics
///
/// Panics if the table is missing or has a different row count.
pub fn assert_table_len<S: RelationalStore + ?Sized>(store: &S, table: &str, expected: usize) {
    let rows = store
        .rows(table)
        .unwrap_or_else(|e| panic!("Cannot read table {table}: {e:#}"));
    assert_eq!(
        rows.len(),
        expected,
        "Row count mismatch in {table}:\n  Expected: {expected}\n  Actual: {}\n  Rows: {rows:?}",
        rows.len()
    );
}

/// Assert the values of one column, in insertion order.
///
/// # Panics
///
/// Panics if the table is missing or the column values differ.
///
/// # Example
///
/// ```
/// use flatbridge::schema::{ColumnDef, TableDef};
/// use flatbridge::store::{MemoryStore, RelationalStore, Row};
/// use flatbridge::testing::assert_column_values;
/// use flatbridge::types::{FieldType, Value};
///
/// let mut store = MemoryStore::new();
/// let def = TableDef::new("t", vec![ColumnDef::new("id", FieldType::integer())], vec!["id".into()]).unwrap();
/// store.create_table(&def).unwrap();
/// store.insert("t", Row::from([("id".to_string(), Value::Integer(7))])).unwrap();
/// assert_column_values(&store, "t", "id", &[7]);
/// ```
pub fn assert_column_values<S, V>(store: &S, table: &str, column: &str, expected: &[V])
where
    S: RelationalStore + ?Sized,
    V: Clone + Into<Value> + Debug,
{
    let rows = store
        .rows(table)
        .unwrap_or_else(|e| panic!("Cannot read table {table}: {e:#}"));
    let actual: Vec<Value> = rows
        .iter()
        .map(|r| r.get(column).cloned().unwrap_or(Value::Null))
        .collect();
    let expected: Vec<Value> = expected.iter().cloned().map(Into::into).collect();
    assert_eq!(
        actual, expected,
        "Column mismatch for {table}.{column}:\n  Expected: {expected:?}\n  Actual: {actual:?}"
    );
}

/// Assert that some row of `table` has every `(column, value)` pair.
///
/// # Panics
///
/// Panics if no row matches.
pub fn assert_row_exists<S: RelationalStore + ?Sized>(store: &S, table: &str, expected: &[(&str, Value)]) {
    let rows: Vec<Row> = store
        .rows(table)
        .unwrap_or_else(|e| panic!("Cannot read table {table}: {e:#}"));
    let found = rows.iter().any(|row| {
        expected
            .iter()
            .all(|(c, v)| row.get(*c).unwrap_or(&Value::Null) == v)
    });
    assert!(found, "No row of {table} matches {expected:?}\n  Rows: {rows:?}");
}

/// Assert the records of a written file, split on `separator`.
///
/// # Panics
///
/// Panics if the file cannot be read or the records differ.
pub fn assert_file_records(path: impl AsRef<Path>, separator: &str, expected: &[&str]) {
    let path = path.as_ref();
    let actual = read_records(path, separator).unwrap_or_else(|e| panic!("Cannot read {}: {e:#}", path.display()));
    assert_eq!(
        actual,
        expected,
        "Record mismatch in {}:\n  Expected: {expected:#?}\n  Actual: {actual:#?}",
        path.display()
    );
}
