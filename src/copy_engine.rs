//! Binds signal parsing through sizing, order construction and the queue, enforcing the
//! per-trade policy order (§4.11/C14).

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::info;

use crate::broker::occ::render_occ_symbol;
use crate::broker::{BracketRequest, BrokerGateway, OrderKind, OrderLeg, OrderPayload, PriceEffect, TimeInForce};
use crate::config::SafetyConfig;
use crate::error::{BridgeError, BridgeResult, PolicyBlockReason};
use crate::models::{Action, InstrumentType, OrderType, Signal};
use crate::policy::PolicyClient;
use crate::queue::{EnqueueOptions, OrderQueue, OrderResult, QueueInput};
use crate::sizer::PositionSizer;

struct DailyCounters {
    date: NaiveDate,
    trades_today: u32,
    loss_today: f64,
}

impl DailyCounters {
    fn roll_over_if_new_day(&mut self, today: NaiveDate) {
        if self.date != today {
            self.date = today;
            self.trades_today = 0;
            self.loss_today = 0.0;
        }
    }
}

/// Binds `SignalParser`/`FillDecoder` output through `PositionSizer`, `OrderQueue` and
/// `FillBroadcaster`. Only the trade-admission policy lives here; queue-level
/// rate/concurrency limits live in [`OrderQueue`].
pub struct CopyEngine {
    sizer: PositionSizer,
    queue: Arc<OrderQueue>,
    policy: Option<Arc<PolicyClient>>,
    broker: Arc<dyn BrokerGateway>,
    account: String,
    safety: SafetyConfig,
    counters: Mutex<DailyCounters>,
}

impl CopyEngine {
    pub fn new(
        sizer: PositionSizer,
        queue: Arc<OrderQueue>,
        policy: Option<Arc<PolicyClient>>,
        broker: Arc<dyn BrokerGateway>,
        account: String,
        safety: SafetyConfig,
    ) -> Self {
        Self {
            sizer,
            queue,
            policy,
            broker,
            account,
            safety,
            counters: Mutex::new(DailyCounters {
                date: Utc::now().date_naive(),
                trades_today: 0,
                loss_today: 0.0,
            }),
        }
    }

    /// Records a realised loss against today's counter; called by whatever fill-ingest
    /// path resolves a closed position's P&L.
    pub fn record_realized_loss(&self, amount: f64) {
        if amount > 0.0 {
            let today = Utc::now().date_naive();
            let mut counters = self.counters.lock();
            counters.roll_over_if_new_day(today);
            counters.loss_today += amount;
        }
    }

    pub fn trades_today(&self) -> u32 {
        self.counters.lock().trades_today
    }

    pub fn loss_today(&self) -> f64 {
        self.counters.lock().loss_today
    }

    /// Runs one signal through the full per-trade policy order and, if admitted, through
    /// the order queue. `Err(BridgeError::PolicyBlocked)` carries the specific reason a
    /// caller needs to decide whether a retry later in the day makes sense.
    pub async fn process_signal(&self, signal: &Signal) -> BridgeResult<OrderResult> {
        {
            let today = Utc::now().date_naive();
            let mut counters = self.counters.lock();
            counters.roll_over_if_new_day(today);

            if let Some(policy) = &self.policy {
                if !policy.can_trade_today() {
                    return Err(BridgeError::PolicyBlocked {
                        reason: PolicyBlockReason::TierBlocked,
                    });
                }
            }
            if counters.trades_today >= self.safety.max_daily_trades {
                return Err(BridgeError::PolicyBlocked {
                    reason: PolicyBlockReason::DailyLimit,
                });
            }
            if counters.loss_today >= self.safety.max_daily_loss {
                return Err(BridgeError::PolicyBlocked {
                    reason: PolicyBlockReason::LossLimit,
                });
            }
        }

        let quantity = self.sizer.calculate(signal);
        if quantity == 0 {
            return Err(BridgeError::PolicyBlocked {
                reason: PolicyBlockReason::InvalidQuantity,
            });
        }

        let input = build_payload(signal, quantity)?;

        let receiver = self.queue.enqueue(input, EnqueueOptions::default()).await;

        let result = receiver
            .await
            .map_err(|_| BridgeError::Internal("order queue dropped without a result".to_string()))??;

        {
            let mut counters = self.counters.lock();
            counters.trades_today += 1;
        }
        if let Some(policy) = &self.policy {
            policy.report_trade(signal.symbol.clone(), quantity, signal.price.unwrap_or(0.0), 0.0);
        }
        info!(symbol = %signal.symbol, quantity, order_id = %result.order_id, "signal copied");

        Ok(result)
    }

    /// Reports the follower's current net liquidating balance so `PositionSizer`'s
    /// proportional mode has a fresh ratio to work from.
    pub async fn refresh_follower_balance(&self) {
        self.sizer.refresh_follower_balance(self.broker.as_ref(), &self.account).await;
    }
}

fn build_payload(signal: &Signal, quantity: u64) -> BridgeResult<QueueInput> {
    let order_type = match signal.order_type {
        OrderType::Limit => crate::broker::OrderKind::Limit,
        OrderType::Market => crate::broker::OrderKind::Market,
    };
    let price = signal.price.map(|p| format!("{:.2}", p));

    let symbol = if signal.instrument_type == InstrumentType::EquityOption {
        let (strike, expiration, option_type) = match (signal.strike, signal.expiration.as_deref(), signal.option_type)
        {
            (Some(strike), Some(expiration), Some(option_type)) => (strike, expiration, option_type),
            _ => {
                return Err(BridgeError::Validation(vec![
                    "equity option signal missing strike/expiration/optionType".to_string(),
                ]))
            }
        };
        render_occ_symbol(&signal.symbol, expiration, option_type, strike)
            .map_err(|err| BridgeError::Validation(vec![err.to_string()]))?
    } else {
        signal.symbol.clone()
    };

    let leg = OrderLeg {
        instrument_type: signal.instrument_type,
        symbol,
        quantity,
        action: signal.action,
        price,
    };

    let mut entry = OrderPayload::single_leg(order_type, leg, TimeInForce::Day);
    entry.price_effect = Some(PriceEffect::from_action(signal.action));

    if signal.take_profit_price.is_none() && signal.stop_loss_price.is_none() {
        return Ok(QueueInput::Order(entry));
    }

    let exit_leg = |price: f64| OrderLeg {
        instrument_type: entry.legs[0].instrument_type,
        symbol: entry.legs[0].symbol.clone(),
        quantity,
        action: Action::SellToClose,
        price: Some(format!("{:.2}", price)),
    };
    let take_profit = signal
        .take_profit_price
        .map(|price| OrderPayload::single_leg(OrderKind::Limit, exit_leg(price), TimeInForce::Day));
    let stop_loss = signal
        .stop_loss_price
        .map(|price| OrderPayload::single_leg(OrderKind::Limit, exit_leg(price), TimeInForce::Day));

    Ok(QueueInput::Bracket(BracketRequest {
        entry,
        take_profit,
        stop_loss,
    }))
}
