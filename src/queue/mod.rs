//! Priority order queue: concurrency/rate limits, dry-run validation, retries (§4.4).
//!
//! Grounded on the teacher's `middleware::rate_limit::RateLimitLayer`: a single
//! `parking_lot::Mutex` guarding one collection, reset-on-expiry window arithmetic, short
//! critical sections. Generalised here from a per-IP request counter to a priority list
//! with a dispatcher task.

pub mod bracket;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::broker::{BracketRequest, BrokerGateway, OrderAck, OrderPayload};
use crate::clock::RollingWindow;
use crate::config::QueueConfig;
use crate::error::BridgeError;
use crate::latency::{LatencyKind, LatencyMonitor, LatencySample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub ack: Option<OrderAck>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
    pub estimated_fees: Option<f64>,
}

pub struct EnqueueOptions {
    pub priority: u8,
    pub dry_run: bool,
    pub skip_validation: bool,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            dry_run: false,
            skip_validation: false,
            scheduled_for: None,
        }
    }
}

/// What [`OrderQueue::enqueue`] accepts: a plain payload, or an unexpanded bracket
/// request that gets turned into an OTOCO payload before insertion (§4.5).
pub enum QueueInput {
    Order(OrderPayload),
    Bracket(BracketRequest),
}

impl From<OrderPayload> for QueueInput {
    fn from(payload: OrderPayload) -> Self {
        QueueInput::Order(payload)
    }
}

impl From<BracketRequest> for QueueInput {
    fn from(request: BracketRequest) -> Self {
        QueueInput::Bracket(request)
    }
}

struct QueueItem {
    id: String,
    payload: OrderPayload,
    priority: u8,
    scheduled_for: Option<DateTime<Utc>>,
    dry_run: bool,
    created_at: Instant,
    completion: oneshot::Sender<Result<OrderResult, BridgeError>>,
}

struct QueueState {
    items: VecDeque<QueueItem>,
    active_orders: usize,
    dry_runs_window: u32,
}

/// Priority-ordered, rate- and concurrency-limited execution engine for broker orders.
pub struct OrderQueue {
    state: Mutex<QueueState>,
    window: Mutex<RollingWindow>,
    dispatching: AtomicBool,
    config: QueueConfig,
    broker: Arc<dyn BrokerGateway>,
    account: String,
    next_id: AtomicU64,
    latency: LatencyMonitor,
}

impl OrderQueue {
    pub fn new(config: QueueConfig, broker: Arc<dyn BrokerGateway>, account: String) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                active_orders: 0,
                dry_runs_window: 0,
            }),
            window: Mutex::new(RollingWindow::new(Duration::from_secs(60))),
            dispatching: AtomicBool::new(false),
            config,
            broker,
            account,
            next_id: AtomicU64::new(1),
            latency: LatencyMonitor::new(),
        })
    }

    /// Per-order dispatch latency recorded since this queue started running.
    pub fn latency_monitor(&self) -> &LatencyMonitor {
        &self.latency
    }

    fn next_item_id(&self) -> String {
        format!("order-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Validates structural requirements and runs a dry-run against the broker.
    /// Network errors are recorded as validation errors, never surfaced as fatal.
    pub async fn validate_order(&self, payload: &OrderPayload) -> ValidationOutcome {
        let mut errors = Vec::new();
        if payload.symbol().map(str::is_empty).unwrap_or(true) {
            errors.push("missing symbol".to_string());
        }
        if payload.legs.is_empty() && payload.trigger_order.is_none() {
            errors.push("no legs".to_string());
        }
        if payload.size() == 0 && payload.trigger_order.is_none() {
            errors.push("size must be > 0".to_string());
        }
        if !errors.is_empty() {
            return ValidationOutcome {
                valid: false,
                errors,
                estimated_fees: None,
            };
        }

        match self.broker.dry_run(&self.account, payload).await {
            Ok(result) => {
                self.state.lock().dry_runs_window += 1;
                if !result.accepted {
                    errors.push("Insufficient buying power".to_string());
                }
                ValidationOutcome {
                    valid: errors.is_empty(),
                    errors,
                    estimated_fees: Some(result.estimated_fees),
                }
            }
            Err(err) => {
                errors.push(format!("dry-run failed: {err}"));
                ValidationOutcome {
                    valid: false,
                    errors,
                    estimated_fees: None,
                }
            }
        }
    }

    /// Runs dry-runs for every payload concurrently (bounded by `maxConcurrentOrders`)
    /// and returns only the payloads that passed validation.
    pub async fn validate_many(&self, payloads: Vec<OrderPayload>) -> Vec<OrderPayload> {
        use futures_util::stream::{self, StreamExt};

        stream::iter(payloads)
            .map(|payload| async move {
                let outcome = self.validate_order(&payload).await;
                (payload, outcome.valid)
            })
            .buffer_unordered(self.config.max_concurrent_orders.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .filter_map(|(payload, valid)| valid.then_some(payload))
            .collect()
    }

    /// Enqueues a payload for execution, returning a receiver that resolves once the
    /// order reaches a terminal state. Bracket payloads are expanded before insertion.
    pub async fn enqueue(
        self: &Arc<Self>,
        input: impl Into<QueueInput>,
        opts: EnqueueOptions,
    ) -> oneshot::Receiver<Result<OrderResult, BridgeError>> {
        let (tx, rx) = oneshot::channel();

        let mut payload = match input.into() {
            QueueInput::Order(payload) => payload,
            QueueInput::Bracket(request) => {
                if request.is_bracket() {
                    bracket::expand_bracket(request)
                } else {
                    request.entry
                }
            }
        };

        if self.config.enable_dry_run_validation && !opts.dry_run && !opts.skip_validation {
            let outcome = self.validate_order(&payload).await;
            if !outcome.valid {
                let _ = tx.send(Err(BridgeError::Validation(outcome.errors)));
                return rx;
            }
            if let Some(fees) = outcome.estimated_fees {
                payload.estimated_fees = Some(fees);
            }
        }

        let item = QueueItem {
            id: self.next_item_id(),
            payload,
            priority: opts.priority,
            scheduled_for: opts.scheduled_for,
            dry_run: opts.dry_run,
            created_at: Instant::now(),
            completion: tx,
        };

        {
            let mut state = self.state.lock();
            insert_by_priority(&mut state.items, item, self.config.priority_threshold);
        }

        self.wake_dispatcher();
        rx
    }

    /// Rejects every pending item with a "queue cleared" error; in-flight items are
    /// unaffected.
    pub fn clear_queue(&self) {
        let mut state = self.state.lock();
        for item in state.items.drain(..) {
            let _ = item.completion.send(Err(BridgeError::QueueCleared));
        }
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn active_orders(&self) -> usize {
        self.state.lock().active_orders
    }

    pub fn dry_runs_this_window(&self) -> u32 {
        self.state.lock().dry_runs_window
    }

    fn wake_dispatcher(self: &Arc<Self>) {
        if self
            .dispatching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run_dispatcher().await;
                this.dispatching.store(false, Ordering::SeqCst);
            });
        }
    }

    async fn run_dispatcher(self: &Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.items.is_empty() || state.active_orders >= self.config.max_concurrent_orders
                {
                    None
                } else {
                    let mut window = self.window.lock();
                    if window.count() >= self.config.max_orders_per_minute {
                        let remaining = window.remaining();
                        drop(window);
                        drop(state);
                        tokio::time::sleep(remaining.min(Duration::from_secs(60))).await;
                        continue;
                    }
                    drop(window);

                    match pop_highest(&mut state.items) {
                        Some(item) => {
                            if let Some(scheduled) = item.scheduled_for {
                                if scheduled > Utc::now() {
                                    let remaining = (scheduled - Utc::now())
                                        .to_std()
                                        .unwrap_or(Duration::from_secs(0));
                                    insert_by_priority(
                                        &mut state.items,
                                        item,
                                        self.config.priority_threshold,
                                    );
                                    drop(state);
                                    tokio::time::sleep(remaining.min(Duration::from_secs(60)))
                                        .await;
                                    continue;
                                }
                            }
                            state.active_orders += 1;
                            self.window.lock().increment();
                            Some(item)
                        }
                        None => None,
                    }
                }
            };

            match next {
                Some(item) => {
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.execute_order(item).await;
                    });
                }
                None => break,
            }
        }
    }

    async fn execute_order(self: &Arc<Self>, mut item: QueueItem) {
        let started_at = Instant::now();
        let queue_latency_ms = started_at.duration_since(item.created_at).as_secs_f64() * 1_000.0;
        info!(order_id = %item.id, priority = item.priority, "executing order");

        let result = self.submit(&item).await;

        let result = match result {
            Err(BridgeError::BrokerRejection { code, message }) if code == "tif_day_invalid_intersession" => {
                warn!(order_id = %item.id, "retrying with GTC after intersession TIF rejection");
                item.payload.time_in_force = crate::broker::TimeInForce::Gtc;
                self.submit(&item).await.map_err(|_| {
                    BridgeError::BrokerRejection { code, message }
                })
            }
            other => other,
        };

        {
            let mut state = self.state.lock();
            state.active_orders = state.active_orders.saturating_sub(1);
        }

        let elapsed = started_at.elapsed();
        let processing_latency_ms = elapsed.as_secs_f64() * 1_000.0;
        match &result {
            Ok(_) => info!(order_id = %item.id, elapsed_ms = elapsed.as_millis() as u64, "order completed"),
            Err(err) => warn!(order_id = %item.id, error = %err, "order failed"),
        }

        self.latency.record(LatencySample {
            kind: LatencyKind::OrderDispatch,
            source: item.payload.symbol().unwrap_or("unknown").to_string(),
            total_latency_ms: queue_latency_ms + processing_latency_ms,
            queue_latency_ms: Some(queue_latency_ms),
            processing_latency_ms: Some(processing_latency_ms),
            at: Utc::now(),
        });

        let _ = item.completion.send(result);

        if self.config.delay_between_orders_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_between_orders_ms)).await;
        }

        self.wake_dispatcher();
    }

    async fn submit(&self, item: &QueueItem) -> Result<OrderResult, BridgeError> {
        if item.dry_run {
            self.broker.dry_run(&self.account, &item.payload).await?;
            return Ok(OrderResult {
                order_id: item.id.clone(),
                ack: None,
                dry_run: true,
            });
        }

        let ack = if item.payload.legs.len() > 1 || item.payload.trigger_order.is_some() {
            self.broker
                .create_complex_order(&self.account, &item.payload)
                .await?
        } else {
            self.broker.create_order(&self.account, &item.payload).await?
        };

        Ok(OrderResult {
            order_id: item.id.clone(),
            ack: Some(ack),
            dry_run: false,
        })
    }
}

/// Items with `priority >= threshold` jump to the front; otherwise insertion is at the
/// first index whose incumbent priority is strictly lower (stable for equal priorities,
/// i.e. FIFO within a priority level).
fn insert_by_priority(items: &mut VecDeque<QueueItem>, item: QueueItem, threshold: u8) {
    if item.priority >= threshold {
        items.push_front(item);
        return;
    }
    let pos = items
        .iter()
        .position(|incumbent| incumbent.priority < item.priority)
        .unwrap_or(items.len());
    items.insert(pos, item);
}

fn pop_highest(items: &mut VecDeque<QueueItem>) -> Option<QueueItem> {
    items.pop_front()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::payload::{OrderKind, OrderLeg, TimeInForce};
    use crate::broker::MockBrokerGateway;
    use crate::models::{Action, InstrumentType};

    fn queue_config() -> QueueConfig {
        QueueConfig {
            profile: crate::config::QueueProfile::Balanced,
            max_concurrent_orders: 5,
            delay_between_orders_ms: 0,
            max_orders_per_minute: 60,
            priority_threshold: 8,
            enable_dry_run_validation: false,
        }
    }

    fn payload(symbol: &str, quantity: u64) -> OrderPayload {
        OrderPayload::single_leg(
            OrderKind::Market,
            OrderLeg {
                instrument_type: InstrumentType::Equity,
                symbol: symbol.to_string(),
                quantity,
                action: Action::BuyToOpen,
                price: None,
            },
            TimeInForce::Day,
        )
    }

    #[tokio::test]
    async fn enqueue_and_dispatch_resolves_future() {
        let broker = Arc::new(MockBrokerGateway::new());
        let queue = OrderQueue::new(queue_config(), broker, "ACC1".to_string());

        let rx = queue
            .enqueue(payload("AAPL", 10), EnqueueOptions::default())
            .await;
        let result = rx.await.unwrap().unwrap();
        assert!(!result.dry_run);
        assert!(result.ack.is_some());
    }

    #[tokio::test]
    async fn high_priority_item_jumps_the_queue() {
        let broker = Arc::new(MockBrokerGateway::new());
        let queue = OrderQueue::new(queue_config(), broker, "ACC1".to_string());

        // Freeze the dispatcher by holding the lock isn't straightforward; instead
        // assert on insertion order directly via the internal structure.
        let mut items: VecDeque<QueueItem> = VecDeque::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let (tx3, _rx3) = oneshot::channel();
        insert_by_priority(
            &mut items,
            QueueItem {
                id: "a".to_string(),
                payload: payload("AAPL", 1),
                priority: 2,
                scheduled_for: None,
                dry_run: false,
                created_at: Instant::now(),
                completion: tx1,
            },
            8,
        );
        insert_by_priority(
            &mut items,
            QueueItem {
                id: "b".to_string(),
                payload: payload("MSFT", 1),
                priority: 2,
                scheduled_for: None,
                dry_run: false,
                created_at: Instant::now(),
                completion: tx2,
            },
            8,
        );
        insert_by_priority(
            &mut items,
            QueueItem {
                id: "c".to_string(),
                payload: payload("TSLA", 1),
                priority: 9,
                scheduled_for: None,
                dry_run: false,
                created_at: Instant::now(),
                completion: tx3,
            },
            8,
        );

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        let _ = queue;
    }

    #[tokio::test]
    async fn clear_queue_rejects_pending_items() {
        let broker = Arc::new(MockBrokerGateway::new());
        let queue = OrderQueue::new(queue_config(), broker, "ACC1".to_string());
        {
            let mut state = queue.state.lock();
            let (tx, _rx) = oneshot::channel();
            state.items.push_back(QueueItem {
                id: "x".to_string(),
                payload: payload("AAPL", 1),
                priority: 0,
                scheduled_for: None,
                dry_run: false,
                created_at: Instant::now(),
                completion: tx,
            });
        }
        queue.clear_queue();
        assert_eq!(queue.queue_len(), 0);
    }

    #[tokio::test]
    async fn rate_limit_window_caps_dispatch_per_minute() {
        let broker = Arc::new(MockBrokerGateway::new());
        let mut cfg = queue_config();
        cfg.max_orders_per_minute = 1;
        let queue = OrderQueue::new(cfg, broker, "ACC1".to_string());

        let rx1 = queue
            .enqueue(payload("AAPL", 1), EnqueueOptions::default())
            .await;
        rx1.await.unwrap().unwrap();

        assert_eq!(queue.window.lock().count(), 1);
    }

    #[tokio::test]
    async fn dispatched_order_records_a_latency_sample() {
        let broker = Arc::new(MockBrokerGateway::new());
        let queue = OrderQueue::new(queue_config(), broker, "ACC1".to_string());

        let rx = queue
            .enqueue(payload("AAPL", 10), EnqueueOptions::default())
            .await;
        rx.await.unwrap().unwrap();

        assert_eq!(queue.latency_monitor().sample_count(), 1);
    }

    #[tokio::test]
    async fn bracket_request_is_expanded_before_dispatch() {
        let broker = Arc::new(MockBrokerGateway::new());
        let queue = OrderQueue::new(queue_config(), broker, "ACC1".to_string());

        let entry = payload("AAPL", 10);
        let take_profit = OrderPayload::single_leg(
            OrderKind::Limit,
            OrderLeg {
                instrument_type: InstrumentType::Equity,
                symbol: "AAPL".to_string(),
                quantity: 10,
                action: Action::BuyToOpen,
                price: Some("200.00".to_string()),
            },
            TimeInForce::Day,
        );
        let request = BracketRequest {
            entry,
            take_profit: Some(take_profit),
            stop_loss: None,
        };

        let rx = queue.enqueue(request, EnqueueOptions::default()).await;
        let result = rx.await.unwrap().unwrap();
        assert!(result.ack.is_some());
    }

    #[tokio::test]
    async fn validation_rejects_empty_symbol() {
        let broker = Arc::new(MockBrokerGateway::new());
        let queue = OrderQueue::new(queue_config(), broker, "ACC1".to_string());
        let mut bad = payload("AAPL", 1);
        bad.legs[0].symbol = String::new();
        let outcome = queue.validate_order(&bad).await;
        assert!(!outcome.valid);
        assert!(outcome.errors.iter().any(|e| e.contains("symbol")));
    }
}
