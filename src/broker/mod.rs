//! Broker integration seam (§4.1). The real broker's REST/streaming client lives outside
//! this crate; `BrokerGateway` is the trait boundary the copy engine and order queue code
//! against, with [`MockBrokerGateway`] as the scriptable test double shipped here.

pub mod occ;
pub mod payload;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{BridgeError, BridgeResult};
pub use payload::{BracketRequest, OrderKind, OrderLeg, OrderPayload, PriceEffect, TimeInForce};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_number: String,
    pub nickname: Option<String>,
    pub is_margin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalancesSnapshot {
    pub net_liquidating_value: f64,
    pub cash_balance: f64,
    pub buying_power: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub average_open_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunResult {
    pub accepted: bool,
    pub estimated_fees: f64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAckStatus {
    Received,
    Live,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderAckStatus,
    pub received_at: DateTime<Utc>,
}

/// Pushed over the account event channel a streamer role owns (§5, role "streamer bridge").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccountEvent {
    OrderFilled(OrderAck),
    OrderCancelled { order_id: String },
    OrderRejected { order_id: String, reason: String },
    BalancesUpdated(BalancesSnapshot),
}

/// The broker adapter boundary. Methods take `&str` account numbers rather than a bound
/// `Account` so a single gateway instance can serve every configured sub-account.
///
/// `stream_account_events` takes a sender rather than returning a `Stream` so the trait
/// stays object-safe (`Box<dyn BrokerGateway>` / `Arc<dyn BrokerGateway>`); the caller
/// owns the reconnect loop around it (see `supervisor::Supervisor`).
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn authenticate(&self) -> BridgeResult<()>;
    async fn get_accounts(&self) -> BridgeResult<Vec<Account>>;
    async fn get_balances(&self, account: &str) -> BridgeResult<BalancesSnapshot>;
    async fn get_positions(&self, account: &str) -> BridgeResult<Vec<Position>>;
    async fn dry_run(&self, account: &str, payload: &OrderPayload) -> BridgeResult<DryRunResult>;
    async fn create_order(&self, account: &str, payload: &OrderPayload) -> BridgeResult<OrderAck>;
    async fn create_complex_order(
        &self,
        account: &str,
        payload: &OrderPayload,
    ) -> BridgeResult<OrderAck>;
    async fn cancel_order(&self, account: &str, order_id: &str) -> BridgeResult<()>;
    async fn get_live_orders(&self, account: &str) -> BridgeResult<Vec<OrderAck>>;
    async fn stream_account_events(
        &self,
        account: &str,
        tx: mpsc::Sender<AccountEvent>,
    ) -> BridgeResult<()>;
}

/// Scripted responses for one call kind, consumed in FIFO order; the last entry repeats
/// once the queue is drained so tests don't need to script every call.
#[derive(Default)]
struct ScriptedCalls {
    create_order: Vec<BridgeResult<OrderAck>>,
    dry_run: Vec<BridgeResult<DryRunResult>>,
    balances: Vec<BridgeResult<BalancesSnapshot>>,
}

/// A scriptable, in-memory [`BrokerGateway`] for unit and integration tests (§4.1
/// "Ambient addition"). Records every order it was asked to place so assertions can
/// inspect call order and payload shape.
pub struct MockBrokerGateway {
    next_order_seq: AtomicU64,
    scripted: Mutex<ScriptedCalls>,
    placed: Mutex<Vec<(String, OrderPayload)>>,
    default_balances: BalancesSnapshot,
}

impl MockBrokerGateway {
    pub fn new() -> Self {
        Self {
            next_order_seq: AtomicU64::new(1),
            scripted: Mutex::new(ScriptedCalls::default()),
            placed: Mutex::new(Vec::new()),
            default_balances: BalancesSnapshot {
                net_liquidating_value: 100_000.0,
                cash_balance: 100_000.0,
                buying_power: 100_000.0,
                as_of: Utc::now(),
            },
        }
    }

    pub fn with_balances(balances: BalancesSnapshot) -> Self {
        Self {
            default_balances: balances,
            ..Self::new()
        }
    }

    /// Queues a response that `create_order` returns on its next call.
    pub fn push_create_order_result(&self, result: BridgeResult<OrderAck>) {
        self.scripted.lock().create_order.push(result);
    }

    pub fn push_dry_run_result(&self, result: BridgeResult<DryRunResult>) {
        self.scripted.lock().dry_run.push(result);
    }

    pub fn push_balances_result(&self, result: BridgeResult<BalancesSnapshot>) {
        self.scripted.lock().balances.push(result);
    }

    pub fn placed_orders(&self) -> Vec<(String, OrderPayload)> {
        self.placed.lock().clone()
    }

    fn next_order_id(&self) -> String {
        format!(
            "mock-order-{}",
            self.next_order_seq.fetch_add(1, Ordering::Relaxed)
        )
    }
}

impl Default for MockBrokerGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn take_scripted<T: Clone>(queue: &mut Vec<BridgeResult<T>>) -> Option<BridgeResult<T>> {
    if queue.len() > 1 {
        Some(queue.remove(0))
    } else {
        queue.first().cloned()
    }
}

#[async_trait]
impl BrokerGateway for MockBrokerGateway {
    async fn authenticate(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn get_accounts(&self) -> BridgeResult<Vec<Account>> {
        Ok(vec![Account {
            account_number: "MOCK-ACCOUNT".to_string(),
            nickname: Some("mock".to_string()),
            is_margin: true,
        }])
    }

    async fn get_balances(&self, _account: &str) -> BridgeResult<BalancesSnapshot> {
        let mut scripted = self.scripted.lock();
        if let Some(result) = take_scripted(&mut scripted.balances) {
            return result;
        }
        Ok(self.default_balances)
    }

    async fn get_positions(&self, _account: &str) -> BridgeResult<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn dry_run(&self, _account: &str, payload: &OrderPayload) -> BridgeResult<DryRunResult> {
        let mut scripted = self.scripted.lock();
        if let Some(result) = take_scripted(&mut scripted.dry_run) {
            return result;
        }
        Ok(DryRunResult {
            accepted: true,
            estimated_fees: payload.estimated_fees.unwrap_or(0.0),
            warnings: Vec::new(),
        })
    }

    async fn create_order(&self, account: &str, payload: &OrderPayload) -> BridgeResult<OrderAck> {
        self.placed
            .lock()
            .push((account.to_string(), payload.clone()));

        let mut scripted = self.scripted.lock();
        if let Some(result) = take_scripted(&mut scripted.create_order) {
            return result;
        }
        Ok(OrderAck {
            order_id: self.next_order_id(),
            status: OrderAckStatus::Received,
            received_at: Utc::now(),
        })
    }

    async fn create_complex_order(
        &self,
        account: &str,
        payload: &OrderPayload,
    ) -> BridgeResult<OrderAck> {
        self.create_order(account, payload).await
    }

    async fn cancel_order(&self, _account: &str, _order_id: &str) -> BridgeResult<()> {
        Ok(())
    }

    async fn get_live_orders(&self, _account: &str) -> BridgeResult<Vec<OrderAck>> {
        Ok(Vec::new())
    }

    async fn stream_account_events(
        &self,
        _account: &str,
        _tx: mpsc::Sender<AccountEvent>,
    ) -> BridgeResult<()> {
        Err(BridgeError::StreamDropped(
            "MockBrokerGateway does not stream".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg() -> OrderLeg {
        OrderLeg {
            instrument_type: crate::models::InstrumentType::Equity,
            symbol: "AAPL".to_string(),
            quantity: 10,
            action: crate::models::Action::BuyToOpen,
            price: None,
        }
    }

    #[tokio::test]
    async fn records_placed_orders() {
        let gw = MockBrokerGateway::new();
        let payload = OrderPayload::single_leg(OrderKind::Market, leg(), TimeInForce::Day);
        let ack = gw.create_order("ACC1", &payload).await.unwrap();
        assert_eq!(ack.status, OrderAckStatus::Received);
        assert_eq!(gw.placed_orders().len(), 1);
        assert_eq!(gw.placed_orders()[0].0, "ACC1");
    }

    #[tokio::test]
    async fn scripted_rejection_is_returned_once_then_falls_back() {
        let gw = MockBrokerGateway::new();
        gw.push_create_order_result(Err(BridgeError::BrokerRejection {
            code: "insufficient_funds".to_string(),
            message: "nope".to_string(),
        }));
        let payload = OrderPayload::single_leg(OrderKind::Market, leg(), TimeInForce::Day);

        let first = gw.create_order("ACC1", &payload).await;
        assert!(first.is_err());

        let second = gw.create_order("ACC1", &payload).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn default_balances_reported_when_unscripted() {
        let gw = MockBrokerGateway::new();
        let balances = gw.get_balances("ACC1").await.unwrap();
        assert_eq!(balances.net_liquidating_value, 100_000.0);
    }
}
