// src/model.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Unit of measure on an invoice line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Unit {
    #[default]
    #[serde(rename = "PC")]
    Pc,
    #[serde(rename = "SET")]
    Set,
    #[serde(rename = "Unit")]
    Unit,
}

impl Unit {
    /// Case-insensitive mapping; anything unrecognised is a piece.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "set" => Unit::Set,
            "unit" => Unit::Unit,
            _ => Unit::Pc,
        }
    }
}

/// A single invoice line item. Immutable once attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub sku: String,
    pub quantity: f64,
    pub unit: Unit,
    pub rate: f64,
    pub discount_percent: f64,
    pub tax_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Totals {
    pub subtotal: f64,
    pub tax: f64,
    pub discount: f64,
    pub rounding: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Success,
    Warning,
    Error,
}

/// Header data pulled off an invoice. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceMeta {
    pub invoice_no: Option<String>,
    pub vendor: Option<String>,
    pub bill_to: Option<String>,
    pub ship_to: Option<String>,
    pub date: Option<String>,
    pub terms: Option<String>,
    pub agent: Option<String>,
}

/// One processed invoice upload.
///
/// The content hash and stored-file reference live in the store next to the
/// run; they are not part of its exposed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(flatten)]
    pub meta: InvoiceMeta,
    pub items: Vec<LineItem>,
    pub totals: Totals,
    pub bill_link: Option<String>,
    /// Processing time in seconds, informational only.
    pub duration: f64,
    pub file_name: String,
    pub notes: Vec<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// A page of runs, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPage {
    pub runs: Vec<Run>,
    pub next_cursor: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Parsed,
    IntegrationRequest,
    IntegrationResponse,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Parsed => "parsed",
            PayloadKind::IntegrationRequest => "integration_request",
            PayloadKind::IntegrationResponse => "integration_response",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parsed" => Ok(PayloadKind::Parsed),
            "integration_request" => Ok(PayloadKind::IntegrationRequest),
            "integration_response" => Ok(PayloadKind::IntegrationResponse),
            other => Err(format!("unknown payload kind '{other}'")),
        }
    }
}

/// Raw JSON snapshot kept for audit. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAudit {
    pub id: i64,
    pub run_id: String,
    pub kind: PayloadKind,
    pub body: Value,
    pub created_at: i64,
}

/// Latest OAuth token set for a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub provider: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry, epoch milliseconds.
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillMode {
    Mock,
    Live,
}

/// Result of a draft-bill call: which path ran and what the accounting
/// system (or its mock) answered.
#[derive(Debug, Clone, Serialize)]
pub struct DraftBill {
    pub mode: BillMode,
    pub data: Value,
}
