//! Integration tests for exporting flat files into tables.

use flatbridge::error::{ErrorKind, error_kind};
use flatbridge::schema::{RuleSet, Rules};
use flatbridge::store::{MemoryStore, RelationalStore};
use flatbridge::testing::*;
use flatbridge::types::Value;
use serde_json::json;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn orders_doc(path: impl AsRef<std::path::Path>) -> serde_json::Value {
    serde_json::from_str(&orders_rules_json(path)).unwrap()
}

fn build(doc: &serde_json::Value) -> anyhow::Result<Rules> {
    RuleSet::from_json_str(&doc.to_string())?.build()
}

/// Export `content` with `doc` and return the error it fails with.
fn export_err(ws: &TestWorkspace, doc: &serde_json::Value, content: &str) -> anyhow::Error {
    let input = ws.write("orders.txt", content).unwrap();
    let rules = build(doc).unwrap();
    let mut store = MemoryStore::new();
    rules.exporter().unwrap().export_file(&input, &mut store).unwrap_err()
}

fn assert_kind(err: &anyhow::Error, kind: ErrorKind, needle: &str) {
    assert_eq!(error_kind(err), Some(kind), "{err:#}");
    assert!(format!("{err:#}").contains(needle), "expected {needle:?} in: {err:#}");
}

#[test]
fn test_orders_export_copies_foreign_keys() -> anyhow::Result<()> {
    init_logs();
    let ws = TestWorkspace::new()?;
    let input = ws.write("orders.txt", ORDERS_FILE)?;
    let rules = orders_rules(&input)?;

    let mut store = ws.store();
    let stats = rules.exporter()?.export(&mut store)?;

    assert_eq!(stats.files, 1);
    assert_eq!(stats.records_read, 5);
    assert_eq!(stats.object_graphs, 2);
    assert_eq!(stats.rows_inserted, 5);
    assert_eq!(stats.rows_reused, 0);

    assert_column_values(&store, "orders", "id", &[1, 2]);
    assert_column_values(&store, "orders", "customer", &["ACME", "GLOBEX"]);
    assert_column_values(&store, "order_lines", "order_id", &[1, 1, 2]);
    assert_column_values(&store, "order_lines", "sku", &["W-1", "W-2", "W-1"]);
    assert_row_exists(
        &store,
        "order_lines",
        &[("order_id", Value::Integer(1)), ("sku", Value::text("W-2")), ("qty", Value::Integer(5))],
    );
    Ok(())
}

#[test]
fn test_export_into_existing_tables() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let input = ws.write("orders.txt", ORDERS_FILE)?;
    let rules = orders_rules(&input)?;

    let mut store = MemoryStore::new();
    rules.tables.create_tables(&mut store)?;
    rules.exporter()?.export(&mut store)?;
    assert_table_len(&store, "order_lines", 3);

    // a second load of the same orders collides on the primary key
    let err = rules.exporter()?.export(&mut store).unwrap_err();
    assert_kind(&err, ErrorKind::Mapping, "duplicate primary key");
    Ok(())
}

#[test]
fn test_blank_records_are_skipped() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let input = ws.write("orders.txt", "H;1;ACME\n\n   \nL;W-1;3\n")?;
    let mut store = MemoryStore::new();
    let stats = orders_rules(&input)?.exporter()?.export(&mut store)?;
    assert_eq!(stats.records_read, 2);
    assert_table_len(&store, "order_lines", 1);
    Ok(())
}

#[test]
fn test_unique_root_may_appear_once() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let mut doc = orders_doc(ws.path("orders.txt"));
    doc["file"]["links"]["link"][0]["line"] = json!("HDR.U");

    let err = export_err(&ws, &doc, "H;1;ACME\nL;W-1;3\nH;2;GLOBEX\nL;W-1;1\n");
    assert_kind(&err, ErrorKind::Mapping, "record #3");
    Ok(())
}

#[test]
fn test_record_before_its_root() {
    let ws = TestWorkspace::new().unwrap();
    let doc = orders_doc(ws.path("orders.txt"));
    let err = export_err(&ws, &doc, "L;W-1;3\nH;1;ACME\nL;W-2;5\n");
    assert_kind(&err, ErrorKind::Mapping, "before any HDR record");
}

fn with_notes(doc: &mut serde_json::Value) {
    doc["file"]["segment"]
        .as_array_mut()
        .unwrap()
        .push(json!({ "name": "NOTE", "discriminator": "N", "field": [ { "name": "text", "type": "alpha" } ] }));
    doc["file"]["links"]["link"]
        .as_array_mut()
        .unwrap()
        .push(json!({ "line": "..NOTE.F" }));
}

#[test]
fn test_placement_walks_up_the_open_records() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let mut doc = orders_doc(ws.path("orders.txt"));
    with_notes(&mut doc);
    let rules = build(&doc)?;

    let input = ws.write("orders.txt", "H;1;ACME\nL;W-1;3\nN;fragile\nL;W-2;5\nH;2;GLOBEX\nL;W-1;1\nN;x\n")?;
    let mut store = MemoryStore::new();
    let stats = rules.exporter()?.export_file(&input, &mut store)?;
    assert_eq!(stats.records_read, 7);
    assert_eq!(stats.object_graphs, 2);
    assert_column_values(&store, "order_lines", "order_id", &[1, 1, 2]);

    let err = export_err(&ws, &doc, "H;1;ACME\nN;misplaced\nL;W-1;3\n");
    assert_kind(&err, ErrorKind::Mapping, "cannot follow HDR");
    Ok(())
}

#[test]
fn test_mandatory_segment_missing() {
    let ws = TestWorkspace::new().unwrap();
    let doc = orders_doc(ws.path("orders.txt"));
    let err = export_err(&ws, &doc, "H;1;ACME\nL;W-1;3\nH;2;GLOBEX\n");
    assert_kind(&err, ErrorKind::Mapping, "mandatory segment LINE");
}

#[test]
fn test_unknown_record_without_open_memo() {
    let ws = TestWorkspace::new().unwrap();
    let doc = orders_doc(ws.path("orders.txt"));
    let err = export_err(&ws, &doc, "H;1;ACME\nX;what\nL;W-1;3\n");
    assert_kind(&err, ErrorKind::Mapping, "record #2 matches no segment");
}

#[test]
fn test_conversion_error_names_the_record() {
    let ws = TestWorkspace::new().unwrap();
    let doc = orders_doc(ws.path("orders.txt"));
    let err = export_err(&ws, &doc, "H;1;ACME\nL;W-1;three\n");
    assert_kind(&err, ErrorKind::Conversion, "record #2");
    assert!(format!("{err:#}").contains("LINE.qty"), "{err:#}");
}

#[test]
fn test_duplicate_primary_key_in_one_file() {
    let ws = TestWorkspace::new().unwrap();
    let doc = orders_doc(ws.path("orders.txt"));
    let err = export_err(&ws, &doc, "H;1;ACME\nL;W-1;3\nL;W-1;4\n");
    assert_kind(&err, ErrorKind::Mapping, "order_lines");
}

#[test]
fn test_mapped_foreign_key_must_match_its_parent() {
    let ws = TestWorkspace::new().unwrap();
    let mut doc = orders_doc(ws.path("orders.txt"));
    doc["export"]["map"]
        .as_array_mut()
        .unwrap()
        .push(json!("LINE.=9.order_lines.order_id"));
    let err = export_err(&ws, &doc, "H;1;ACME\nL;W-1;3\n");
    assert_kind(&err, ErrorKind::Mapping, "disagrees");
}

#[test]
fn test_unique_table_link_allows_one_child_per_parent() {
    let ws = TestWorkspace::new().unwrap();
    let mut doc = orders_doc(ws.path("orders.txt"));
    doc["tables"]["links"]["link"][1]["line"] = json!(".order_lines.U");
    let err = export_err(&ws, &doc, "H;1;ACME\nL;W-1;3\nL;W-2;5\n");
    assert_kind(&err, ErrorKind::Mapping, "linked uniquely");
}

#[test]
fn test_shallow_feed_reuses_existing_rows() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let mut doc = orders_doc(ws.path("orders.txt"));
    doc["tables"] = json!({
        "table": [ { "name": "codes", "column": [ { "name": "code", "type": "alpha", "key": true } ] } ]
    });
    doc["export"] = json!({ "map": [ "HDR.customer.codes.code", "LINE.sku.codes.code" ] });
    doc["import"] = serde_json::Value::Null;
    let rules = build(&doc)?;

    let input = ws.write("orders.txt", "H;1;W-2\nL;W-1;3\nH;2;W-1\nL;W-3;1\n")?;
    let mut store = MemoryStore::new();
    let stats = rules.exporter()?.export_file(&input, &mut store)?;
    assert_column_values(&store, "codes", "code", &["W-2", "W-1", "W-3"]);
    assert_eq!(stats.rows_inserted, 3);
    assert_eq!(stats.rows_reused, 1);
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
fn test_memo_collects_continuation_lines() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let input = ws.write("notes.txt", "H;1;ACME\nN;first line\nsecond line\nthird\nH;2;GLOBEX\n")?;
    let rules = build(&notes_doc(&input))?;

    let mut store = MemoryStore::new();
    let stats = rules.exporter()?.export(&mut store)?;
    assert_eq!(stats.records_read, 3);
    assert_eq!(stats.memo_continuations, 2);
    assert_table_len(&store, "orders", 2);
    assert_row_exists(
        &store,
        "notes",
        &[("order_id", Value::Integer(1)), ("text", Value::text("first line\nsecond line\nthird"))],
    );
    Ok(())
}

#[test]
fn test_empty_memo_takes_its_first_continuation_as_is() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let input = ws.write("notes.txt", "H;1;ACME\nN;\nhandle with care\nfragile\nH;2;GLOBEX\nN;\n\nlast\n")?;
    let rules = build(&notes_doc(&input))?;

    let mut store = MemoryStore::new();
    rules.exporter()?.export(&mut store)?;
    assert_column_values(&store, "notes", "text", &["handle with care\nfragile", "\nlast"]);
    Ok(())
}

#[test]
fn test_quote_opened_in_a_memo_line_fails_the_export() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let mut doc = notes_doc(ws.path("notes.txt"));
    doc["file"]["field-quote"] = json!("\"");
    let rules = build(&doc)?;

    let input = ws.write(
        "notes.txt",
        "H;1;ACME\nN;note\n\"Fragile\" handle with care\nH;2;GLOBEX\nH;3;INITECH\n",
    )?;
    let err = rules.exporter()?.export(&mut MemoryStore::new()).unwrap_err();
    assert_kind(&err, ErrorKind::Codec, "unterminated quoted field");
    assert!(format!("{err:#}").contains("notes.txt"), "{err:#}");

    // closed again on a later line: the record spans lines and cannot be a memo line
    ws.write("notes.txt", "H;1;ACME\nN;note\n\"Fragile\nhandle\"\nH;2;GLOBEX\n")?;
    let err = rules.exporter()?.export_file(&input, &mut MemoryStore::new()).unwrap_err();
    assert_kind(&err, ErrorKind::Codec, "record #3 runs over several lines");
    Ok(())
}

#[test]
fn test_unterminated_quote_in_a_header() {
    let ws = TestWorkspace::new().unwrap();
    let mut doc = orders_doc(ws.path("orders.txt"));
    doc["file"]["field-quote"] = json!("\"");
    let err = export_err(&ws, &doc, "H;1;\"ACME\nH;2;GLOBEX\nL;W-1;1\n");
    assert_kind(&err, ErrorKind::Codec, "unterminated quoted field");
}

#[test]
fn test_unique_segment_once_per_parent() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let mut doc = orders_doc(ws.path("orders.txt"));
    doc["file"]["links"]["link"][1]["line"] = json!(".LINE.U");

    let err = export_err(&ws, &doc, "H;1;ACME\nL;W-1;3\nL;W-2;5\n");
    assert_kind(&err, ErrorKind::Mapping, "already appeared");
    assert!(format!("{err:#}").contains("record #3"), "{err:#}");

    // one line under each header is fine
    let input = ws.write("orders.txt", "H;1;ACME\nL;W-1;3\nH;2;GLOBEX\nL;W-2;5\n")?;
    let mut store = MemoryStore::new();
    build(&doc)?.exporter()?.export_file(&input, &mut store)?;
    assert_table_len(&store, "order_lines", 2);
    Ok(())
}

#[cfg(feature = "xml-rules")]
#[test]
fn test_fixed_width_export() -> anyhow::Result<()> {
    use rust_decimal::Decimal;

    let ws = TestWorkspace::new()?;
    let input = ws.write("customers.dat", CUSTOMERS_FILE)?;
    let rules = RuleSet::from_xml_str(&customers_rules_xml(&input))?.build()?;

    let mut store = MemoryStore::new();
    let stats = rules.exporter()?.export(&mut store)?;
    assert_eq!(stats.object_graphs, 2);
    assert_eq!(store.count("customers")?, 2);
    assert_row_exists(
        &store,
        "customers",
        &[
            ("id", Value::Integer(1)),
            ("name", Value::text("Alice")),
            ("balance", Value::Decimal(Decimal::new(12550, 2))),
        ],
    );
    assert_column_values(&store, "customers", "name", &["Alice", "Bob"]);
    Ok(())
}
