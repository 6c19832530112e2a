// src/normalize.rs
//
// Pure mappings from the loosely-typed parser JSON onto strict internal
// shapes, and from a parsed snapshot onto an accounting "create bill" body.

use crate::model::{InvoiceMeta, LineItem, Totals, Unit};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const UNKNOWN_VENDOR: &str = "UNKNOWN";
pub const UNKNOWN_INVOICE_NO: &str = "INV-UNKNOWN";
pub const BILL_VENDOR_FALLBACK: &str = "Unknown Vendor";
pub const BILL_LINE_FALLBACK: &str = "Item";
pub const BILL_NOTES: &str = "Draft bill created automatically from an ingested vendor invoice.";

/// Numeric field: numbers and numeric strings are accepted, anything else is 0.
fn num(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Text field: strings as-is, numbers stringified, empty strings and
/// everything else absent.
fn text(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-null value among several keys.
fn first_value<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(k).filter(|v| !v.is_null()))
}

/// First present text among several keys.
fn first_text(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| text(obj.get(k)))
}

/// Map one parser item onto a line item. Missing numbers are 0, a missing
/// description is empty and unknown units become pieces.
pub fn normalize_item(item: &Value) -> LineItem {
    LineItem {
        description: first_text(item, &["desc", "description"]).unwrap_or_default(),
        sku: text(item.get("sku")).unwrap_or_default(),
        quantity: num(first_value(item, &["qty", "quantity"])),
        unit: item
            .get("unit")
            .and_then(Value::as_str)
            .map(Unit::parse_lenient)
            .unwrap_or_default(),
        rate: num(item.get("rate")),
        discount_percent: num(first_value(item, &["disc", "discountPercent"])),
        tax_percent: num(first_value(item, &["tax", "taxPercent"])),
    }
}

pub fn normalize_items(parsed: &Value) -> Vec<LineItem> {
    parsed
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(normalize_item).collect())
        .unwrap_or_default()
}

/// Invoice metadata from the parser header. Vendor and invoice number always
/// come back set; the rest stay empty when absent.
pub fn normalize_header(parsed: &Value) -> InvoiceMeta {
    let header = parsed.get("header").unwrap_or(&Value::Null);
    InvoiceMeta {
        invoice_no: Some(
            first_text(header, &["invoiceNo", "bill_number"])
                .unwrap_or_else(|| UNKNOWN_INVOICE_NO.to_string()),
        ),
        vendor: Some(text(header.get("vendor")).unwrap_or_else(|| UNKNOWN_VENDOR.to_string())),
        bill_to: text(header.get("billTo")),
        ship_to: text(header.get("shipTo")),
        date: text(header.get("date")),
        terms: text(header.get("terms")),
        agent: text(header.get("agent")),
    }
}

/// Totals exactly as the parser reported them.
pub fn parsed_totals(parsed: &Value) -> Totals {
    let t = parsed.get("totals").unwrap_or(&Value::Null);
    Totals {
        subtotal: num(t.get("subtotal")),
        tax: num(t.get("tax")),
        discount: num(t.get("discount")),
        rounding: num(t.get("rounding")),
        total: num(t.get("total")),
    }
}

pub fn anomalies(parsed: &Value) -> Vec<String> {
    parsed
        .get("anomalies")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| text(Some(v))).collect())
        .unwrap_or_default()
}

/// Body of an accounting-system "create bill" call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillRequest {
    pub vendor_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
    pub line_items: Vec<BillLine>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillLine {
    pub name: String,
    pub rate: f64,
    pub quantity: f64,
}

impl BillRequest {
    /// Sum of rate x quantity over the lines.
    pub fn line_total(&self) -> f64 {
        self.line_items.iter().map(|l| l.rate * l.quantity).sum()
    }
}

/// Build a bill request from a stored parsed snapshot.
pub fn build_bill_request(parsed: &Value) -> BillRequest {
    let header = parsed.get("header").unwrap_or(&Value::Null);

    let line_items = parsed
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| BillLine {
                    name: first_text(item, &["name", "description", "desc"])
                        .unwrap_or_else(|| BILL_LINE_FALLBACK.to_string()),
                    rate: num(item.get("rate")),
                    quantity: first_value(item, &["qty", "quantity"])
                        .map(|v| num(Some(v)))
                        .unwrap_or(1.0),
                })
                .collect()
        })
        .unwrap_or_default();

    BillRequest {
        vendor_name: text(header.get("vendor"))
            .unwrap_or_else(|| BILL_VENDOR_FALLBACK.to_string()),
        date: text(header.get("date")),
        bill_number: first_text(header, &["bill_number", "invoiceNo"]),
        reference_number: text(header.get("reference_number")),
        line_items,
        notes: BILL_NOTES.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_item_defaults() {
        let item = normalize_item(&json!({ "sku": "D0054", "unit": "set" }));
        assert_eq!(item.description, "");
        assert_eq!(item.sku, "D0054");
        assert_eq!(item.quantity, 0.0);
        assert_eq!(item.rate, 0.0);
        assert_eq!(item.discount_percent, 0.0);
        assert_eq!(item.tax_percent, 0.0);
        assert_eq!(item.unit, Unit::Set);

        let item = normalize_item(&json!({
            "description": "CLIP PANEL", "qty": "10", "unit": "crate",
            "rate": 1.8, "disc": 5, "tax": 6
        }));
        assert_eq!(item.description, "CLIP PANEL");
        assert_eq!(item.quantity, 10.0);
        assert_eq!(item.unit, Unit::Pc);
        assert_eq!(item.discount_percent, 5.0);
        assert_eq!(item.tax_percent, 6.0);
    }

    #[test]
    fn test_header_defaults_and_fallbacks() {
        let meta = normalize_header(&json!({}));
        assert_eq!(meta.vendor.as_deref(), Some(UNKNOWN_VENDOR));
        assert_eq!(meta.invoice_no.as_deref(), Some(UNKNOWN_INVOICE_NO));
        assert!(meta.bill_to.is_none() && meta.date.is_none() && meta.agent.is_none());

        let meta = normalize_header(&json!({
            "header": { "bill_number": "B-9", "vendor": "SUPPLIER SDN BHD", "terms": 30 }
        }));
        assert_eq!(meta.invoice_no.as_deref(), Some("B-9"));
        assert_eq!(meta.terms.as_deref(), Some("30"));

        let meta = normalize_header(&json!({
            "header": { "invoiceNo": "I-1", "bill_number": "B-9" }
        }));
        assert_eq!(meta.invoice_no.as_deref(), Some("I-1"));
    }

    #[test]
    fn test_parsed_totals_are_taken_verbatim() {
        let t = parsed_totals(&json!({
            "totals": { "subtotal": 10.004, "tax": 1, "total": 99 }
        }));
        assert_eq!(t.subtotal, 10.004);
        assert_eq!(t.total, 99.0);
        assert_eq!(t.discount, 0.0);
    }

    #[test]
    fn test_build_bill_request() {
        let parsed = json!({
            "header": { "invoiceNo": "I-DEMO-0001", "date": "2026-10-19", "reference_number": "PO-7" },
            "items": [
                { "desc": "BLOCK SCREW", "qty": 20, "rate": 4.5 },
                { "sku": "X1" },
                { "name": "Freight", "description": "ignored", "rate": 12 }
            ]
        });
        let req = build_bill_request(&parsed);
        assert_eq!(req.vendor_name, BILL_VENDOR_FALLBACK);
        assert_eq!(req.bill_number.as_deref(), Some("I-DEMO-0001"));
        assert_eq!(req.reference_number.as_deref(), Some("PO-7"));
        assert_eq!(req.line_items[0].name, "BLOCK SCREW");
        assert_eq!(
            req.line_items[1],
            BillLine {
                name: "Item".into(),
                rate: 0.0,
                quantity: 1.0
            }
        );
        assert_eq!(req.line_items[2].name, "Freight");
        assert_eq!(req.line_items[2].quantity, 1.0);
        assert_eq!(req.line_total(), 102.0);
        assert_eq!(req.notes, BILL_NOTES);
    }

    #[test]
    fn test_bill_number_prefers_explicit_field() {
        let req = build_bill_request(&json!({
            "header": { "invoiceNo": "I-1", "bill_number": "B-2", "vendor": "ACME" }
        }));
        assert_eq!(req.bill_number.as_deref(), Some("B-2"));
        assert_eq!(req.vendor_name, "ACME");
        assert!(req.line_items.is_empty());

        let body = serde_json::to_value(&req).unwrap();
        assert!(body.get("date").is_none());
    }

    #[test]
    fn test_null_quantity_counts_as_absent() {
        let req = build_bill_request(&json!({
            "items": [
                { "name": "X", "rate": 5, "qty": null },
                { "name": "Y", "rate": 2, "qty": null, "quantity": 4 }
            ]
        }));
        assert_eq!(req.line_items[0].quantity, 1.0);
        assert_eq!(req.line_items[1].quantity, 4.0);

        let item = normalize_item(&json!({ "qty": null, "quantity": 3, "tax": null, "taxPercent": 6 }));
        assert_eq!(item.quantity, 3.0);
        assert_eq!(item.tax_percent, 6.0);
    }
}
