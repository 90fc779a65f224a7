//! Integration tests for writing tables out as flat files.

use flatbridge::error::{ErrorKind, error_kind};
use flatbridge::schema::{RuleSet, Rules};
use flatbridge::store::{MemoryStore, RelationalStore, Row};
use flatbridge::testing::*;
use flatbridge::types::Value;
use rust_decimal::Decimal;
use serde_json::json;
use std::fs;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn build(doc: &serde_json::Value) -> anyhow::Result<Rules> {
    RuleSet::from_json_str(&doc.to_string())?.build()
}

fn orders_doc(path: impl AsRef<std::path::Path>) -> serde_json::Value {
    serde_json::from_str(&orders_rules_json(path)).unwrap()
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn order(id: i64, customer: Option<&str>) -> Row {
    row(&[("id", Value::Integer(id)), ("customer", customer.map_or(Value::Null, Value::text))])
}

fn line(order_id: i64, sku: &str, qty: i64) -> Row {
    row(&[
        ("order_id", Value::Integer(order_id)),
        ("sku", Value::text(sku)),
        ("qty", Value::Integer(qty)),
    ])
}

/// A store holding the tables of `rules`, filled with `rows`.
fn store_with(rules: &Rules, rows: Vec<(&str, Row)>) -> anyhow::Result<MemoryStore> {
    let mut store = MemoryStore::new();
    rules.tables.create_tables(&mut store)?;
    for (table, r) in rows {
        store.insert(table, r)?;
    }
    Ok(store)
}

fn assert_kind(err: &anyhow::Error, kind: ErrorKind, needle: &str) {
    assert_eq!(error_kind(err), Some(kind), "{err:#}");
    assert!(format!("{err:#}").contains(needle), "expected {needle:?} in: {err:#}");
}

#[test]
fn test_orders_round_trip() -> anyhow::Result<()> {
    init_logs();
    let ws = TestWorkspace::new()?;
    let input = ws.write("orders.txt", ORDERS_FILE)?;
    let rules = orders_rules(&input)?;

    let mut store = ws.store();
    rules.exporter()?.export(&mut store)?;
    let output = ws.path("copy.txt");
    let stats = rules.importer()?.import_to(&output, &store)?;

    assert_eq!(stats.records_written, 5);
    assert_eq!(stats.rows_read, 5);
    assert_eq!(fs::read_to_string(&output)?, ORDERS_FILE);
    Ok(())
}

#[test]
fn test_records_follow_row_order() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let rules = orders_rules(ws.path("out.txt"))?;
    let store = store_with(
        &rules,
        vec![
            ("orders", order(7, Some("INITECH"))),
            ("orders", order(3, Some("ACME"))),
            ("order_lines", line(3, "B", 1)),
            ("order_lines", line(7, "Z", 2)),
            ("order_lines", line(3, "A", 4)),
        ],
    )?;

    rules.importer()?.import(&store)?;
    assert_file_records(
        ws.path("out.txt"),
        "\n",
        &["H;7;INITECH", "L;Z;2", "H;3;ACME", "L;B;1", "L;A;4"],
    );
    Ok(())
}

#[test]
fn test_empty_store_writes_an_empty_file() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let rules = orders_rules(ws.path("out.txt"))?;
    let store = store_with(&rules, Vec::new())?;

    let stats = rules.importer()?.import(&store)?;
    assert_eq!(stats.records_written, 0);
    assert_eq!(fs::read_to_string(ws.path("out.txt"))?, "");
    Ok(())
}

/// Orders rules plus a customer echo record read from the in-scope order row
/// and a constant trailer after every order's lines.
fn decorated_doc(path: impl AsRef<std::path::Path>) -> serde_json::Value {
    let mut doc = orders_doc(path);
    let segments = doc["file"]["segment"].as_array_mut().unwrap();
    segments.push(json!({ "name": "CUST", "discriminator": "C", "field": [ { "name": "name", "type": "alpha" } ] }));
    segments.push(json!({ "name": "TRL", "discriminator": "T", "field": [ { "name": "marker", "type": "alpha" } ] }));
    doc["file"]["links"]["link"] = json!([
        { "line": "HDR" },
        { "line": ".CUST.FU" },
        { "line": ".LINE" },
        { "line": ".TRL.U" }
    ]);
    let maps = doc["import"]["map"].as_array_mut().unwrap();
    maps.push(json!("CUST.name.orders.customer"));
    maps.push(json!("TRL.marker.=END"));
    doc
}

#[test]
fn test_segment_driving_rules() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let rules = build(&decorated_doc(ws.path("out.txt")))?;
    let store = store_with(
        &rules,
        vec![
            ("orders", order(1, Some("ACME"))),
            ("orders", order(2, None)),
            ("order_lines", line(1, "W-1", 3)),
            ("order_lines", line(1, "W-2", 5)),
            ("order_lines", line(2, "W-9", 1)),
        ],
    )?;

    let stats = rules.importer()?.import(&store)?;
    assert_file_records(
        ws.path("out.txt"),
        "\n",
        &[
            "H;1;ACME",
            "C;ACME",
            "L;W-1;3",
            "L;W-2;5",
            "T;END",
            "H;2;",
            "L;W-9;1",
            "T;END",
        ],
    );
    assert_eq!(stats.records_written, 8);
    Ok(())
}

#[test]
fn test_unique_root_with_two_rows() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let mut doc = orders_doc(ws.path("out.txt"));
    doc["file"]["links"]["link"][0]["line"] = json!("HDR.U");
    let rules = build(&doc)?;
    let store = store_with(
        &rules,
        vec![
            ("orders", order(1, Some("ACME"))),
            ("orders", order(2, Some("GLOBEX"))),
            ("order_lines", line(1, "W-1", 3)),
            ("order_lines", line(2, "W-1", 1)),
        ],
    )?;

    let err = rules.importer()?.import(&store).unwrap_err();
    assert_kind(&err, ErrorKind::Mapping, "unique segment HDR would be written 2 times");
    Ok(())
}

#[test]
fn test_mandatory_child_without_rows() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let rules = orders_rules(ws.path("out.txt"))?;
    let store = store_with(
        &rules,
        vec![
            ("orders", order(1, Some("ACME"))),
            ("orders", order(2, Some("GLOBEX"))),
            ("order_lines", line(1, "W-1", 3)),
        ],
    )?;

    let err = rules.importer()?.import(&store).unwrap_err();
    assert_kind(&err, ErrorKind::Mapping, "mandatory segment LINE has no data under HDR");
    Ok(())
}

#[test]
fn test_unique_table_link_with_two_children() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let mut doc = orders_doc(ws.path("out.txt"));
    doc["tables"]["links"]["link"][1]["line"] = json!(".order_lines.U");
    let rules = build(&doc)?;
    let store = store_with(
        &rules,
        vec![
            ("orders", order(1, Some("ACME"))),
            ("order_lines", line(1, "W-1", 3)),
            ("order_lines", line(1, "W-2", 5)),
        ],
    )?;

    let err = rules.importer()?.import(&store).unwrap_err();
    assert_kind(&err, ErrorKind::Mapping, "linked uniquely");
    Ok(())
}

fn payments_doc(path: impl AsRef<std::path::Path>) -> serde_json::Value {
    json!({
        "file": {
            "path": path.as_ref().display().to_string(),
            "field-separator": ";",
            "segment": [
                { "name": "CREDIT", "discriminator": "C", "field": [
                    { "name": "id", "type": "integer" },
                    { "name": "amount", "type": "decimal", "format": "9.0[2]" }
                ] },
                { "name": "DEBIT", "discriminator": "D", "field": [
                    { "name": "id", "type": "integer" },
                    { "name": "amount", "type": "decimal", "format": "9.0[2]" }
                ] }
            ],
            "links": { "link": [ { "line": "CREDIT.F" }, { "line": "DEBIT.F" } ] }
        },
        "tables": {
            "table": [
                { "name": "payments", "column": [
                    { "name": "id", "type": "integer", "key": true },
                    { "name": "kind", "type": "alpha", "nullable": false },
                    { "name": "amount", "type": "decimal" }
                ] }
            ]
        },
        "import": {
            "virtual": [
                { "name": "credits", "table": "payments", "where": "kind=C" },
                { "name": "debits", "table": "payments", "where": "kind=D" }
            ],
            "map": [
                "CREDIT.id.credits",
                "CREDIT.amount.credits",
                "DEBIT.id.debits",
                "DEBIT.amount.debits"
            ]
        }
    })
}

fn payment(id: i64, kind: &str, cents: i64) -> Row {
    row(&[
        ("id", Value::Integer(id)),
        ("kind", Value::text(kind)),
        ("amount", Value::Decimal(Decimal::new(cents, 2))),
    ])
}

#[test]
fn test_virtual_tables_keep_row_order() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let rules = build(&payments_doc(ws.path("payments.txt")))?;
    let store = store_with(
        &rules,
        vec![
            ("payments", payment(1, "C", 1000)),
            ("payments", payment(2, "D", 500)),
            ("payments", payment(3, "X", 100)),
            ("payments", payment(4, "C", 725)),
        ],
    )?;

    let stats = rules.importer()?.import(&store)?;
    assert_file_records(ws.path("payments.txt"), "\n", &["C;1;10.00", "D;2;5.00", "C;4;7.25"]);
    assert_eq!(stats.rows_read, 4, "both segments share one pass over payments");
    Ok(())
}

fn notes_doc(path: impl AsRef<std::path::Path>) -> serde_json::Value {
    json!({
        "file": {
            "path": path.as_ref().display().to_string(),
            "field-separator": ";",
            "segment": [
                { "name": "HDR", "discriminator": "H", "field": [
                    { "name": "order_no", "type": "integer" },
                    { "name": "customer", "type": "alpha" }
                ] },
                { "name": "NOTE", "discriminator": "N", "field": [ { "name": "text", "type": "memo" } ] }
            ],
            "links": { "link": [ { "line": "HDR" }, { "line": ".NOTE.FU" } ] }
        },
        "tables": {
            "table": [
                { "name": "orders", "column": [
                    { "name": "id", "type": "integer", "key": true },
                    { "name": "customer", "type": "alpha" }
                ] },
                { "name": "notes", "column": [
                    { "name": "order_id", "type": "integer", "key": true },
                    { "name": "text", "type": "alpha" }
                ] }
            ],
            "links": { "link": [
                { "line": "orders" },
                { "line": ".notes.U", "parent-keys": "id", "child-keys": "order_id" }
            ] }
        },
        "export": { "map": [ "HDR.order_no.orders.id", "HDR.customer.orders", "NOTE.text.notes" ] },
        "import": { "map": [ "HDR.order_no.orders.id", "HDR.customer.orders", "NOTE.text.notes" ] }
    })
}

#[test]
fn test_memo_lines_are_written_after_their_record() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let rules = build(&notes_doc(ws.path("notes.txt")))?;
    let store = store_with(
        &rules,
        vec![
            ("orders", order(1, Some("ACME"))),
            ("orders", order(2, Some("GLOBEX"))),
            ("notes", row(&[("order_id", Value::Integer(1)), ("text", Value::text("handle with care\nfragile"))])),
        ],
    )?;

    let stats = rules.importer()?.import(&store)?;
    assert_eq!(stats.memo_continuations, 1);
    assert_eq!(stats.records_written, 4);
    let written = fs::read_to_string(ws.path("notes.txt"))?;
    assert_eq!(written, "H;1;ACME\nN;handle with care\nfragile\nH;2;GLOBEX\n");

    // and the file reads back into the same rows
    let mut copy = MemoryStore::new();
    rules.exporter()?.export(&mut copy)?;
    assert_eq!(copy.rows("notes")?, store.rows("notes")?);
    Ok(())
}

#[test]
fn test_memo_line_that_reads_as_a_header() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let rules = build(&notes_doc(ws.path("notes.txt")))?;
    let store = store_with(
        &rules,
        vec![
            ("orders", order(1, Some("ACME"))),
            ("notes", row(&[("order_id", Value::Integer(1)), ("text", Value::text("see below\nH;9;FAKE"))])),
        ],
    )?;

    let err = rules.importer()?.import(&store).unwrap_err();
    assert_kind(&err, ErrorKind::Codec, "read back as a record header");
    Ok(())
}

#[test]
fn test_memo_line_that_opens_a_quote() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let mut doc = notes_doc(ws.path("notes.txt"));
    doc["file"]["field-quote"] = json!("\"");
    let rules = build(&doc)?;
    let store = store_with(
        &rules,
        vec![
            ("orders", order(1, Some("ACME"))),
            ("notes", row(&[("order_id", Value::Integer(1)), ("text", Value::text("note\n\"Fragile\" handle with care"))])),
        ],
    )?;

    let err = rules.importer()?.import(&store).unwrap_err();
    assert_kind(&err, ErrorKind::Codec, "starts with the field quote");
    Ok(())
}
