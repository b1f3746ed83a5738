//! Trigger predicates. All comparisons are strict: a price sitting exactly on
//! the threshold does not fire.

use rust_decimal::Decimal;

use crate::persist::{Alert, AlertKind, Asset};

/// Percent move from `purchase_price` to `current_price`, or `None` when the
/// purchase price is not positive.
pub fn percent_change(purchase_price: Decimal, current_price: Decimal) -> Option<Decimal> {
    if purchase_price <= Decimal::ZERO {
        return None;
    }
    (current_price - purchase_price)
        .checked_div(purchase_price)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

pub fn should_trigger(kind: &AlertKind, threshold: Decimal, purchase_price: Decimal, current_price: Decimal) -> bool {
    match kind {
        AlertKind::PriceAbove => current_price > threshold,
        AlertKind::PriceBelow => current_price < threshold,
        AlertKind::PriceChangePercent => percent_change(purchase_price, current_price)
            .is_some_and(|change| change.abs() > threshold),
        AlertKind::Other(_) => false,
    }
}

/// Whether `alert` on `asset` fires at `current_price`. Inactive alerts never do.
pub fn is_triggered(alert: &Alert, asset: &Asset, current_price: Decimal) -> bool {
    alert.is_active
        && should_trigger(&alert.alert_type, alert.threshold_value, asset.purchase_price, current_price)
}
