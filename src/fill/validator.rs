//! Validates and sanitises externally-supplied fill records (§4.7/C9).
//!
//! Grounded on `signals/quality.rs`'s classify-then-filter shape (here: classify, then
//! numerically coerce rather than drop).

use crate::models::{Action, Fill, FillStatus, InstrumentType};

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub critical: bool,
    pub errors: Vec<String>,
}

/// Critical errors mean the fill must be dropped; non-critical errors are repaired by
/// [`sanitise`].
pub fn validate(fill: &Fill) -> ValidationReport {
    let mut errors = Vec::new();
    let mut critical = false;

    if fill.symbol.trim().is_empty() {
        errors.push("missing symbol".to_string());
        critical = true;
    }

    if fill.action == Action::Unknown {
        errors.push("missing or unrecognised action".to_string());
        critical = true;
    }

    if fill.filled_quantity > fill.total_quantity && fill.total_quantity > 0 {
        errors.push("filledQuantity exceeds totalQuantity".to_string());
    }
    if !fill.fill_price.is_finite() || fill.fill_price < 0.0 {
        errors.push("invalid fillPrice".to_string());
    }
    if !fill.fees.is_finite() || fill.fees < 0.0 {
        errors.push("invalid fees".to_string());
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        critical,
        errors,
    }
}

/// Total function: always produces a fill whose numeric fields are finite and
/// non-negative, symbol upper-cased and trimmed, action normalised, and `filledAt`
/// a valid instant. Idempotent — sanitising an already-sanitised fill is a no-op.
pub fn sanitise(mut fill: Fill) -> Fill {
    fill.symbol = fill.symbol.trim().to_ascii_uppercase();

    if fill.total_quantity == 0 {
        fill.total_quantity = fill.filled_quantity;
    }

    if !fill.fill_price.is_finite() || fill.fill_price < 0.0 {
        fill.fill_price = 0.0;
    }
    if !fill.fees.is_finite() || fill.fees < 0.0 {
        fill.fees = 0.0;
    }

    if fill.strike.is_some() && (!fill.strike.unwrap().is_finite() || fill.strike.unwrap() < 0.0) {
        fill.strike = None;
    }

    if fill.instrument_type == InstrumentType::EquityOption
        && (fill.strike.is_none() || fill.expiration.is_none() || fill.option_type.is_none())
    {
        fill.instrument_type = InstrumentType::Equity;
    }

    if fill.account_number.trim().is_empty() {
        fill.account_number = "unknown".to_string();
    }

    fill
}

/// Normalises the fill's action label through the same table [`Action::normalize`]
/// uses, plus the `BOUGHT`/`SOLD` aliases fills carry that signals never do.
pub fn normalise_action_label(raw: &str) -> Option<Action> {
    Action::normalize(raw)
}
