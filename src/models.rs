//! Core data model: `Signal`, `Fill`, and the small value types they share.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

static SIGNAL_SEQ: AtomicU64 = AtomicU64::new(1);

pub fn next_signal_id() -> String {
    format!("signal_{}", SIGNAL_SEQ.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Action {
    BuyToOpen,
    SellToOpen,
    BuyToClose,
    SellToClose,
    /// Sentinel for a fill whose action is missing or unrecognised; never produced by
    /// signal parsing, only by fill decoding (§4.7's critical-drop path reads this back).
    Unknown,
}

impl Action {
    /// Normalisation table shared by the signal parser and the fill sanitiser:
    /// `BUY|BTO -> BuyToOpen; SELL|STO -> SellToOpen; BTC -> BuyToClose; STC -> SellToClose`,
    /// plus `BOUGHT/SOLD` aliases used only by fill sanitisation. Unknown input is left
    /// unmatched (total function: caller decides the fallback).
    pub fn normalize(raw: &str) -> Option<Action> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" | "BTO" | "BUY_TO_OPEN" | "BUYTOOPEN" => Some(Action::BuyToOpen),
            "SELL" | "STO" | "SELL_TO_OPEN" | "SELLTOOPEN" => Some(Action::SellToOpen),
            "BTC" | "BUY_TO_CLOSE" | "BUYTOCLOSE" | "BOUGHT" => Some(Action::BuyToClose),
            "STC" | "SELL_TO_CLOSE" | "SELLTOCLOSE" | "SOLD" => Some(Action::SellToClose),
            _ => None,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Action::BuyToOpen | Action::BuyToClose)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::BuyToOpen => "BuyToOpen",
            Action::SellToOpen => "SellToOpen",
            Action::BuyToClose => "BuyToClose",
            Action::SellToClose => "SellToClose",
            Action::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum InstrumentType {
    Equity,
    EquityOption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OptionType {
    Call,
    Put,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub action: Action,
    pub quantity: u64,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub instrument_type: InstrumentType,
    pub strike: Option<f64>,
    pub expiration: Option<String>,
    pub option_type: Option<OptionType>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    /// Bracket exit prices (§4.5); `Some` on either field makes this signal a bracket
    /// entry that `CopyEngine` routes through `BracketExpander` rather than a plain
    /// single-leg order.
    pub take_profit_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SignalError {
    #[error("equity option signal missing strike/expiration/optionType")]
    IncompleteOption,
    #[error("quantity must be positive")]
    NonPositiveQuantity,
}

impl Signal {
    /// Validates the option-leg invariant: an `EquityOption` signal must carry
    /// `strike`, `expiration` and `optionType` together.
    pub fn validate(&self) -> Result<(), SignalError> {
        if self.quantity == 0 {
            return Err(SignalError::NonPositiveQuantity);
        }
        if self.instrument_type == InstrumentType::EquityOption
            && (self.strike.is_none() || self.expiration.is_none() || self.option_type.is_none())
        {
            return Err(SignalError::IncompleteOption);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FillStatus {
    Filled,
    PartiallyFilled,
    Pending,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: String,
    pub symbol: String,
    pub action: Action,
    pub total_quantity: u64,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub instrument_type: InstrumentType,
    pub strike: Option<f64>,
    pub expiration: Option<String>,
    pub option_type: Option<OptionType>,
    pub timestamp: DateTime<Utc>,
    pub source: String,

    pub status: FillStatus,
    pub filled_quantity: u64,
    pub fill_price: f64,
    pub fees: f64,
    pub account_number: String,
    pub filled_at: DateTime<Utc>,
}
