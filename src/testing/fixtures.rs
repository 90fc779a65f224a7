//! Sample rule documents and flat files.
//!
//! The order fixtures describe a delimited file of order headers (`H`) each
//! followed by its lines (`L`), mapped onto an `orders` / `order_lines` pair of
//! tables joined on the order number.

use crate::schema::{RuleSet, Rules};
use anyhow::Result;
use std::path::Path;

/// Two orders, three lines, `;`-delimited, LF-terminated.
pub const ORDERS_FILE: &str = "H;1;ACME\nL;W-1;3\nL;W-2;5\nH;2;GLOBEX\nL;W-1;1\n";

/// A fixed-width customer file with no discriminator.
pub const CUSTOMERS_FILE: &str = "00001Alice     0012550\n00002Bob       0000000\n";

/// JSON rules for [`ORDERS_FILE`] stored at `path`.
#[must_use]
pub fn orders_rules_json(path: impl AsRef<Path>) -> String {
    let path = serde_json::Value::String(path.as_ref().display().to_string());
    format!(
        r#"{{
  "file": {{
    "path": {path},
    "record-separator": "\\n",
    "field-separator": ";",
    "segment": [
      {{ "name": "HDR", "discriminator": "H", "field": [
        {{ "name": "order_no", "type": "integer" }},
        {{ "name": "customer", "type": "alpha" }}
      ] }},
      {{ "name": "LINE", "discriminator": "L", "field": [
        {{ "name": "sku", "type": "alpha" }},
        {{ "name": "qty", "type": "integer" }}
      ] }}
    ],
    "links": {{ "link": [ {{ "line": "HDR" }}, {{ "line": ".LINE" }} ] }}
  }},
  "tables": {{
    "table": [
      {{ "name": "orders", "column": [
        {{ "name": "id", "type": "integer", "key": true }},
        {{ "name": "customer", "type": "alpha" }}
      ] }},
      {{ "name": "order_lines", "column": [
        {{ "name": "order_id", "type": "integer", "key": true }},
        {{ "name": "sku", "type": "alpha", "key": true }},
        {{ "name": "qty", "type": "integer" }}
      ] }}
    ],
    "links": {{ "link": [
      {{ "line": "orders" }},
      {{ "line": ".order_lines", "parent-keys": "id", "child-keys": "order_id" }}
    ] }}
  }},
  "export": {{ "map": [
    "HDR.order_no.orders.id",
    "HDR.customer.orders",
    "LINE.sku.order_lines",
    "LINE.qty.order_lines"
  ] }},
  "import": {{ "map": [
    "HDR.order_no.orders.id",
    "HDR.customer.orders",
    "LINE.sku.order_lines",
    "LINE.qty.order_lines"
  ] }}
}}"#
    )
}

/// Built rules for [`ORDERS_FILE`] stored at `path`.
///
/// # Errors
///
/// Never fails for a valid path; the signature matches the other loaders.
///
/// # Example
///
/// ```
/// use flatbridge::testing::orders_rules;
///
/// let rules = orders_rules("orders.txt").unwrap();
/// assert!(rules.file.is_multi_segment());
/// assert_eq!(rules.export.len(), 4);
/// ```
pub fn orders_rules(path: impl AsRef<Path>) -> Result<Rules> {
    RuleSet::from_json_str(&orders_rules_json(path))?.build()
}

/// XML rules for [`CUSTOMERS_FILE`] stored at `path`: a single fixed-width
/// segment mapped onto one `customers` table.
#[must_use]
pub fn customers_rules_xml(path: impl AsRef<Path>) -> String {
    format!(
        r#"<rules>
  <file path="{}" record-separator="\n">
    <segment name="CUST">
      <field name="id" type="integer" format="9[5]"/>
      <field name="name" type="alpha" format="X[10]"/>
      <field name="balance" type="decimal" format="9[5]0[2]"/>
    </segment>
  </file>
  <tables>
    <table name="customers">
      <column name="id" type="integer" key="true"/>
      <column name="name" type="alpha"/>
      <column name="balance" type="decimal" format="9.0"/>
    </table>
  </tables>
  <export>
    <map>CUST.id.customers</map>
    <map>CUST.name.customers</map>
    <map>CUST.balance.customers</map>
  </export>
  <import>
    <map>CUST.id.customers</map>
    <map>CUST.name.customers</map>
    <map>CUST.balance.customers</map>
  </import>
</rules>"#,
        path.as_ref().display()
    )
}
