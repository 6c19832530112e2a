// src/totals.rs

use crate::model::{LineItem, Totals};

/// Round to cents, half away from zero.
pub fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

/// Net amount of one line after its line discount.
pub fn line_net(item: &LineItem) -> f64 {
    item.quantity * item.rate * (1.0 - item.discount_percent / 100.0)
}

/// Tax on one line; zero when no tax rate is set.
pub fn line_tax(item: &LineItem) -> f64 {
    if item.tax_percent == 0.0 {
        return 0.0;
    }
    line_net(item) * item.tax_percent / 100.0
}

/// Compute invoice totals from line items.
///
/// Sums are accumulated at full precision and each output field is rounded
/// once. Document-level discount and rounding adjustment are not modelled and
/// stay at zero. Negative inputs are not rejected.
pub fn compute_totals(items: &[LineItem]) -> Totals {
    let subtotal: f64 = items.iter().map(line_net).sum();
    let tax: f64 = items.iter().map(line_tax).sum();
    let discount = 0.0;
    let rounding = 0.0;
    let total = subtotal + tax - discount + rounding;

    Totals {
        subtotal: round2(subtotal),
        tax: round2(tax),
        discount: round2(discount),
        rounding: round2(rounding),
        total: round2(total),
    }
}
