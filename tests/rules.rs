//! Integration tests for loading rule documents.

use flatbridge::error::{ErrorKind, error_kind};
use flatbridge::schema::{Layout, RuleSet};
use flatbridge::testing::*;
use serde_json::json;

fn payments_rules(path: &str) -> serde_json::Value {
    json!({
        "file": {
            "path": path,
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

#[test]
fn test_json_rules_build_both_schemas() -> anyhow::Result<()> {
    let rules = orders_rules("orders.txt")?;

    let hdr = rules.file.require_segment("HDR")?;
    assert_eq!(hdr.layout(), Layout::Delimited);
    assert_eq!(hdr.discriminator(), Some("H"));
    assert_eq!(rules.file.field_separator(), Some(";"));
    let line = rules.file.links().get(rules.file.link_of("LINE").unwrap());
    assert_eq!(line.depth, 1);
    assert!(!line.flags.optional && !line.flags.unique);

    let lines = rules.tables.require_table("order_lines")?;
    assert_eq!(lines.primary_key, vec!["order_id", "sku"]);
    assert_eq!(rules.tables.lineage("order_lines"), vec!["orders", "order_lines"]);
    assert_eq!(rules.export.len(), 4);
    Ok(())
}

#[test]
fn test_virtual_tables_and_missing_sections() -> anyhow::Result<()> {
    let rules = RuleSet::from_json_str(&payments_rules("payments.txt").to_string())?.build()?;
    assert_eq!(rules.virtuals.len(), 2);
    assert_eq!(rules.virtuals[0].terms, vec![("kind".to_string(), "C".to_string())]);

    let importer = rules.importer()?;
    let credits = importer.plan().view("credits").unwrap();
    assert_eq!(credits.table, "payments");

    let err = rules.exporter().unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema), "no export section");
    Ok(())
}

#[test]
fn test_virtual_table_errors() -> anyhow::Result<()> {
    let mut doc = payments_rules("payments.txt");
    doc["import"]["virtual"][0]["name"] = json!("payments");
    let rules = RuleSet::from_json_str(&doc.to_string())?.build()?;
    let err = rules.importer().unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema), "{err:#}");

    let mut doc = payments_rules("payments.txt");
    doc["import"]["virtual"][0]["where"] = json!("status=open");
    let rules = RuleSet::from_json_str(&doc.to_string())?.build()?;
    let err = rules.importer().unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema), "{err:#}");

    let mut doc = payments_rules("payments.txt");
    doc["import"]["virtual"][0]["where"] = json!("kind");
    let err = RuleSet::from_json_str(&doc.to_string())?.build().unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema), "{err:#}");
    Ok(())
}

#[test]
fn test_bad_mappings_fail_before_any_data_moves() -> anyhow::Result<()> {
    for bad in ["HDR.nope.orders.id", "HDR.order_no.nope.id", "HDR.order_no.orders.nope", "HDR.=x.orders.id"] {
        let mut rules = orders_rules("orders.txt")?;
        rules.export[0] = flatbridge::mapping::ExportMapping::parse(bad)?;
        let err = rules.exporter().unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Schema), "{bad}: {err:#}");
    }

    let mut rules = orders_rules("orders.txt")?;
    rules.import[1] = flatbridge::mapping::ImportMapping::parse("HDR.order_no.orders.customer")?;
    let err = rules.importer().unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema), "field fed twice: {err:#}");
    Ok(())
}

#[test]
fn test_malformed_documents() {
    let err = RuleSet::from_json_str("{ not json").unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema));

    let err = RuleSet::from_json_str(r#"{ "file": { "path": "x" } }"#).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema), "missing tables section");

    let mut doc = payments_rules("payments.txt");
    doc["file"]["segment"][0]["field"][1]["format"] = json!("0.9");
    let err = RuleSet::from_json_str(&doc.to_string()).unwrap().build().unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema));
    assert!(format!("{err:#}").contains("CREDIT"), "{err:#}");
}

#[test]
fn test_rules_file_errors() -> anyhow::Result<()> {
    let ws = TestWorkspace::new()?;
    let err = RuleSet::from_json_file(ws.path("missing.json")).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Io));

    let path = ws.write("rules.json", orders_rules_json(ws.path("orders.txt")))?;
    let rules = RuleSet::from_json_file(&path)?.build()?;
    assert_eq!(rules.file.path(), ws.path("orders.txt"));
    Ok(())
}

#[cfg(feature = "xml-rules")]
#[test]
fn test_xml_rules() -> anyhow::Result<()> {
    use flatbridge::types::FieldType;

    let ws = TestWorkspace::new()?;
    let path = ws.write("customers.xml", customers_rules_xml(ws.path("customers.dat")))?;
    let rules = RuleSet::from_xml_file(&path)?.build()?;

    let cust = rules.file.require_segment("CUST")?;
    assert_eq!(cust.layout(), Layout::Fixed);
    assert_eq!(cust.discriminator(), None);
    assert_eq!(cust.record_width(), Some(22));
    let balance = rules.tables.require_table("customers")?.require_column("balance")?;
    assert!(matches!(balance.ty, FieldType::Decimal(_)));
    assert_eq!(rules.tables.require_table("customers")?.primary_key, vec!["id"]);

    let err = RuleSet::from_xml_str("<rules><file>").unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema));
    Ok(())
}
