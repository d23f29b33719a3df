//! The structured broker order payload (§6). Not a byte format — a typed record the
//! `BrokerGateway` adapter would serialize however the real broker RPC requires.

use serde::{Deserialize, Serialize};

use crate::models::{Action, InstrumentType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[serde(rename = "Day")]
    Day,
    #[serde(rename = "GTC")]
    Gtc,
    #[serde(rename = "IOC")]
    Ioc,
    #[serde(rename = "FOK")]
    Fok,
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::Day
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
    Otoco,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceEffect {
    Debit,
    Credit,
}

impl PriceEffect {
    /// `Buy*` actions are a debit (paying out), everything else a credit.
    pub fn from_action(action: Action) -> Self {
        if action.is_buy() {
            PriceEffect::Debit
        } else {
            PriceEffect::Credit
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLeg {
    pub instrument_type: InstrumentType,
    pub symbol: String,
    pub quantity: u64,
    pub action: Action,
    /// Two-decimal string of the limit price; only set for limit legs.
    pub price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub time_in_force: TimeInForce,
    pub order_type: OrderKind,
    pub price_effect: Option<PriceEffect>,
    pub legs: Vec<OrderLeg>,
    /// OTOCO entry order; `Some` only when `order_type == Otoco`.
    pub trigger_order: Option<Box<OrderPayload>>,
    /// OTOCO exit orders (take-profit / stop-loss); `Some` only when `order_type == Otoco`.
    pub orders: Option<Vec<OrderPayload>>,
    pub estimated_fees: Option<f64>,
    /// Fields the broker accepts but the core ignores, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OrderPayload {
    pub fn single_leg(order_type: OrderKind, leg: OrderLeg, time_in_force: TimeInForce) -> Self {
        Self {
            time_in_force,
            order_type,
            price_effect: None,
            legs: vec![leg],
            trigger_order: None,
            orders: None,
            estimated_fees: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        self.legs
            .first()
            .map(|l| l.symbol.as_str())
            .or_else(|| self.trigger_order.as_deref().and_then(|t| t.symbol()))
    }

    pub fn size(&self) -> u64 {
        self.legs.iter().map(|l| l.quantity).sum()
    }
}

/// Unexpanded bracket input: `{entry, takeProfit?, stopLoss?}` (§4.5).
#[derive(Debug, Clone)]
pub struct BracketRequest {
    pub entry: OrderPayload,
    pub take_profit: Option<OrderPayload>,
    pub stop_loss: Option<OrderPayload>,
}

impl BracketRequest {
    pub fn is_bracket(&self) -> bool {
        self.take_profit.is_some() || self.stop_loss.is_some()
    }
}
