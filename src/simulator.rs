// src/simulator.rs

use crate::ids::{generate_run_id, now_millis};
use crate::model::{InvoiceMeta, LineItem, Run, RunStatus, Unit};
use crate::totals::compute_totals;
use rand::Rng;
use time::OffsetDateTime;
use tracing::info;

struct CatalogEntry {
    description: &'static str,
    sku: &'static str,
    quantity: f64,
    unit: Unit,
    rate: f64,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        description: "BLOCK SCREW A - EX5CLASS",
        sku: "D0054",
        quantity: 20.0,
        unit: Unit::Pc,
        rate: 4.5,
    },
    CatalogEntry {
        description: "METER ASSY TCB - Y15ZR V2 (2PV)",
        sku: "3F0236",
        quantity: 2.0,
        unit: Unit::Set,
        rate: 175.0,
    },
    CatalogEntry {
        description: "CLIP PANEL - WAVE",
        sku: "W0088",
        quantity: 10.0,
        unit: Unit::Pc,
        rate: 1.8,
    },
    CatalogEntry {
        description: "HOSE BREATHER - EX5",
        sku: "H0136",
        quantity: 12.0,
        unit: Unit::Pc,
        rate: 3.2,
    },
];

pub const SIM_VENDOR: &str = "SUPPLIER SDN BHD";
pub const SIM_BILL_TO: &str = "UCON MOTORSPORT";
pub const SIM_TERMS: &str = "30";
pub const SIM_AGENT: &str = "AUTO";
pub const MISSING_FIELDS_NOTE: &str = "Required fields missing: invoice number, vendor, line items";
pub const WARNING_NOTES: [&str; 2] = [
    "Rate for METER ASSY TCB differs from last purchase by more than 10%",
    "Vendor tax registration number not found on document",
];

/// Quantity scaled by a random factor in [0.8, 1.2], rounded, at least 1.
fn jitter(quantity: f64, rng: &mut impl Rng) -> f64 {
    let factor = rng.gen_range(0.8..=1.2);
    (quantity * factor).round().max(1.0)
}

fn synthetic_items(rng: &mut impl Rng) -> Vec<LineItem> {
    CATALOG
        .iter()
        .map(|c| LineItem {
            description: c.description.to_string(),
            sku: c.sku.to_string(),
            quantity: jitter(c.quantity, rng),
            unit: c.unit,
            rate: c.rate,
            discount_percent: 0.0,
            tax_percent: 0.0,
        })
        .collect()
}

fn synthetic_meta(now: OffsetDateTime, rng: &mut impl Rng) -> InvoiceMeta {
    let date = now.date();
    let (year, month, day) = (date.year(), u8::from(date.month()), date.day());
    InvoiceMeta {
        invoice_no: Some(format!(
            "I-{year:04}{month:02}-{:04}",
            rng.gen_range(0..10_000)
        )),
        vendor: Some(SIM_VENDOR.to_string()),
        bill_to: Some(SIM_BILL_TO.to_string()),
        ship_to: Some(SIM_BILL_TO.to_string()),
        date: Some(format!("{year:04}-{month:02}-{day:02}")),
        terms: Some(SIM_TERMS.to_string()),
        agent: Some(SIM_AGENT.to_string()),
    }
}

/// Produce a plausible run without a parser.
///
/// Totals always come from `compute_totals` over the generated items.
pub fn simulate_run(file_name: &str, rng: &mut impl Rng) -> Run {
    let status = match rng.gen_range(0..3) {
        0 => RunStatus::Success,
        1 => RunStatus::Warning,
        _ => RunStatus::Error,
    };

    let (meta, items, notes) = match status {
        RunStatus::Error => (
            InvoiceMeta::default(),
            Vec::new(),
            vec![MISSING_FIELDS_NOTE.to_string()],
        ),
        _ => {
            let items = synthetic_items(rng);
            let meta = synthetic_meta(OffsetDateTime::now_utc(), rng);
            let notes = if status == RunStatus::Warning {
                WARNING_NOTES.iter().map(|n| n.to_string()).collect()
            } else {
                Vec::new()
            };
            (meta, items, notes)
        }
    };

    let totals = compute_totals(&items);
    let duration = (rng.gen_range(0.8..3.5_f64) * 10.0).round() / 10.0;

    let run = Run {
        id: generate_run_id(),
        status,
        meta,
        items,
        totals,
        bill_link: None,
        duration,
        file_name: file_name.to_string(),
        notes,
        created_at: now_millis(),
    };
    info!(run_id = %run.id, status = ?run.status, total = run.totals.total, "Simulated run");
    run
}
