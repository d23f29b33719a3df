//! Normalises the three account-stream record shapes into a canonical [`Fill`] (§4.6/C8).
//!
//! Grounded on `signals/detector.rs`'s multi-shape, synchronous, `Option<T>`-returning
//! detection functions — here generalised from market events to account-stream records.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Action, Fill, FillStatus, InstrumentType, OptionType, OrderType};

pub struct FillDecoder;

impl FillDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Dispatches on the record shape. Any shape that doesn't match one of the three
    /// recognised forms is dropped silently — this function never raises.
    pub fn decode(&self, record: &Value) -> Option<Fill> {
        let record = unwrap_data(record);

        // Shape 1: `data.order` / `order`, collapsed by `unwrap_data` to `record.order`.
        if let Some(order) = record.get("order") {
            if let Some(status) = order.get("status").and_then(Value::as_str) {
                if status.eq_ignore_ascii_case("filled") || status.eq_ignore_ascii_case("partiallyfilled")
                {
                    return decode_order_shape(order);
                }
            }
        }

        if let Some(kind) = record.get("type").and_then(Value::as_str) {
            if kind.eq_ignore_ascii_case("fill") {
                return decode_order_shape(record);
            }
            if kind.eq_ignore_ascii_case("trade") {
                return decode_trade_shape(record);
            }
        }

        None
    }
}

impl Default for FillDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn unwrap_data(value: &Value) -> &Value {
    value.get("data").unwrap_or(value)
}

fn str_field(record: &Value, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

fn num_field(record: &Value, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}

fn sum_fees(record: &Value) -> f64 {
    ["fees", "commission", "regulatoryFees", "clearingFees"]
        .iter()
        .filter_map(|k| num_field(record, k))
        .sum()
}

fn infer_instrument(record: &Value, symbol: &str) -> InstrumentType {
    let has_option_fields = record.get("strike").is_some()
        || record.get("expiration").is_some()
        || record.get("optionType").is_some();
    if has_option_fields {
        InstrumentType::EquityOption
    } else if symbol.contains('/') {
        // Futures-like tag: reported but not specially handled downstream.
        InstrumentType::Equity
    } else {
        InstrumentType::Equity
    }
}

fn parse_option_type(record: &Value) -> Option<OptionType> {
    str_field(record, "optionType").and_then(|v| match v.to_ascii_uppercase().as_str() {
        "CALL" | "C" => Some(OptionType::Call),
        "PUT" | "P" => Some(OptionType::Put),
        _ => None,
    })
}

fn parse_status(record: &Value) -> FillStatus {
    match str_field(record, "status").as_deref() {
        Some(s) if s.eq_ignore_ascii_case("partiallyfilled") => FillStatus::PartiallyFilled,
        Some(s) if s.eq_ignore_ascii_case("pending") => FillStatus::Pending,
        Some(s) if s.eq_ignore_ascii_case("cancelled") || s.eq_ignore_ascii_case("canceled") => {
            FillStatus::Cancelled
        }
        _ => FillStatus::Filled,
    }
}

fn decode_order_shape(record: &Value) -> Option<Fill> {
    let symbol = str_field(record, "symbol")?;
    let action = str_field(record, "action")
        .and_then(|a| Action::normalize(&a))
        .unwrap_or(Action::Unknown);
    let total_quantity = num_field(record, "totalQuantity")
        .or_else(|| num_field(record, "quantity"))
        .unwrap_or(0.0) as u64;
    let filled_quantity = num_field(record, "filledQuantity")
        .unwrap_or(total_quantity as f64)
        .max(0.0) as u64;

    Some(Fill {
        id: str_field(record, "id").unwrap_or_else(synth_fill_id),
        symbol: symbol.trim().to_ascii_uppercase(),
        action,
        total_quantity: total_quantity.max(filled_quantity),
        order_type: str_field(record, "orderType")
            .map(|v| {
                if v.eq_ignore_ascii_case("limit") {
                    OrderType::Limit
                } else {
                    OrderType::Market
                }
            })
            .unwrap_or(OrderType::Market),
        price: num_field(record, "price"),
        instrument_type: infer_instrument(record, &symbol),
        strike: num_field(record, "strike"),
        expiration: str_field(record, "expiration"),
        option_type: parse_option_type(record),
        timestamp: Utc::now(),
        source: "account_stream".to_string(),

        status: parse_status(record),
        filled_quantity,
        fill_price: num_field(record, "fillPrice").unwrap_or(0.0).max(0.0),
        fees: sum_fees(record),
        account_number: str_field(record, "accountNumber").unwrap_or_default(),
        filled_at: str_field(record, "filledAt")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

/// `type == "Trade"` records are always treated as filled; action derives from `side`.
fn decode_trade_shape(record: &Value) -> Option<Fill> {
    let symbol = str_field(record, "symbol")?;
    let side = str_field(record, "side").unwrap_or_default();
    let action = if side.eq_ignore_ascii_case("buy") {
        Action::BuyToOpen
    } else if side.eq_ignore_ascii_case("sell") {
        Action::SellToClose
    } else {
        Action::Unknown
    };
    let quantity = num_field(record, "quantity").unwrap_or(0.0) as u64;

    Some(Fill {
        id: str_field(record, "id").unwrap_or_else(synth_fill_id),
        symbol: symbol.trim().to_ascii_uppercase(),
        action,
        total_quantity: quantity,
        order_type: OrderType::Market,
        price: num_field(record, "price"),
        instrument_type: infer_instrument(record, &symbol),
        strike: num_field(record, "strike"),
        expiration: str_field(record, "expiration"),
        option_type: parse_option_type(record),
        timestamp: Utc::now(),
        source: "account_stream".to_string(),

        status: FillStatus::Filled,
        filled_quantity: quantity,
        fill_price: num_field(record, "price").unwrap_or(0.0).max(0.0),
        fees: sum_fees(record),
        account_number: str_field(record, "accountNumber").unwrap_or_default(),
        filled_at: Utc::now(),
    })
}

fn synth_fill_id() -> String {
    format!("fill_{}_{}", Utc::now().timestamp_millis(), uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_nested_order_shape() {
        let decoder = FillDecoder::new();
        let record = json!({
            "data": {
                "order": {
                    "symbol": "aapl",
                    "action": "BUY",
                    "status": "Filled",
                    "totalQuantity": 10,
                    "filledQuantity": 10,
                    "fillPrice": 150.25,
                    "fees": 1.0,
                    "commission": 0.5,
                }
            }
        });
        let fill = decoder.decode(&record).unwrap();
        assert_eq!(fill.symbol, "AAPL");
        assert_eq!(fill.action, Action::BuyToOpen);
        assert_eq!(fill.fees, 1.5);
    }

    #[test]
    fn decodes_fill_type_shape() {
        let decoder = FillDecoder::new();
        let record = json!({
            "type": "Fill",
            "symbol": "MSFT",
            "action": "SELL",
            "status": "Filled",
            "totalQuantity": 5,
            "filledQuantity": 5,
            "fillPrice": 300.0,
        });
        let fill = decoder.decode(&record).unwrap();
        assert_eq!(fill.symbol, "MSFT");
        assert_eq!(fill.action, Action::SellToOpen);
    }

    #[test]
    fn decodes_trade_type_shape_and_derives_action_from_side() {
        let decoder = FillDecoder::new();
        let record = json!({
            "type": "Trade",
            "symbol": "TSLA",
            "side": "sell",
            "quantity": 3,
            "price": 200.0,
        });
        let fill = decoder.decode(&record).unwrap();
        assert_eq!(fill.status, FillStatus::Filled);
        assert_eq!(fill.action, Action::SellToClose);
    }

    #[test]
    fn missing_action_decodes_to_unknown_sentinel_instead_of_being_dropped() {
        let decoder = FillDecoder::new();
        let record = json!({
            "type": "Fill",
            "symbol": "MSFT",
            "status": "Filled",
            "totalQuantity": 5,
            "filledQuantity": 5,
            "fillPrice": 300.0,
        });
        let fill = decoder.decode(&record).unwrap();
        assert_eq!(fill.action, Action::Unknown);
    }

    #[test]
    fn trade_shape_with_unrecognised_side_decodes_to_unknown_action() {
        let decoder = FillDecoder::new();
        let record = json!({
            "type": "Trade",
            "symbol": "TSLA",
            "side": "short",
            "quantity": 3,
            "price": 200.0,
        });
        let fill = decoder.decode(&record).unwrap();
        assert_eq!(fill.action, Action::Unknown);
    }

    #[test]
    fn unrecognised_shape_is_dropped_silently() {
        let decoder = FillDecoder::new();
        let record = json!({"type": "Heartbeat"});
        assert!(decoder.decode(&record).is_none());
    }
}
