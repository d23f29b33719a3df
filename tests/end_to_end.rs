//! End-to-end scenarios across module boundaries: signal in, broker order out; fill in,
//! tiered broadcast out. Single-module behaviour (OCC rendering, sanitise idempotence,
//! queue priority ordering, ...) is covered by each module's own `#[cfg(test)]`; these
//! exercise the seams between them.

use std::sync::Arc;
use std::time::Duration;

use copybridge_backend::broadcaster::FillBroadcaster;
use copybridge_backend::broker::payload::{OrderKind, OrderLeg, TimeInForce};
use copybridge_backend::broker::{MockBrokerGateway, OrderPayload};
use copybridge_backend::config::{QueueConfig, QueueProfile, SafetyConfig, SizingConfig, TierChannels};
use copybridge_backend::copy_engine::CopyEngine;
use copybridge_backend::error::{BridgeError, PolicyBlockReason};
use copybridge_backend::fill::validate;
use copybridge_backend::models::{Action, Fill, FillStatus, InstrumentType, OptionType, OrderType, Signal};
use copybridge_backend::queue::{EnqueueOptions, OrderQueue};
use copybridge_backend::signal_parser::SignalParser;
use copybridge_backend::sizer::{PositionSizer, SizingMethod};
use copybridge_backend::tier::{SignalTierMemory, Tier};
use copybridge_backend::transport::RecordingTransport;

fn safety(max_daily_trades: u32, max_daily_loss: f64) -> SafetyConfig {
    SafetyConfig {
        max_daily_trades,
        max_daily_loss,
    }
}

fn fixed_sizing(quantity: u64) -> SizingConfig {
    SizingConfig {
        method: SizingMethod::Fixed,
        fixed_quantity: quantity,
        multiplier: 1.0,
        percentage: 1.0,
        coach_account_balance: None,
        balance_cache_ttl_secs: 60,
        min_quantity: None,
        max_quantity: None,
    }
}

fn queue_config(max_orders_per_minute: u32) -> QueueConfig {
    QueueConfig {
        profile: QueueProfile::Balanced,
        max_concurrent_orders: 5,
        delay_between_orders_ms: 0,
        max_orders_per_minute,
        priority_threshold: 8,
        enable_dry_run_validation: false,
    }
}

/// S1 — text signal through fixed sizing to a placed order.
#[tokio::test]
async fn text_signal_flows_to_a_placed_order() {
    let parser = SignalParser::new();
    let signal = parser.parse_free_text("SIGNAL BUY 10 SPY").expect("parses");
    assert_eq!(signal.symbol, "SPY");
    assert_eq!(signal.quantity, 10);

    let broker = Arc::new(MockBrokerGateway::new());
    let queue = OrderQueue::new(queue_config(60), broker.clone(), "ACC1".to_string());
    let engine = CopyEngine::new(
        PositionSizer::new(fixed_sizing(2)),
        queue.clone(),
        None,
        broker.clone(),
        "ACC1".to_string(),
        safety(5, 1_000.0),
    );

    let result = engine.process_signal(&signal).await.unwrap();
    assert!(result.ack.is_some());
    assert_eq!(engine.trades_today(), 1);
    assert_eq!(queue.queue_len(), 0);
    assert_eq!(queue.active_orders(), 0);

    let placed = broker.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].1.legs[0].symbol, "SPY");
    assert_eq!(placed[0].1.legs[0].quantity, 2);
}

/// S2 — an option signal renders to its exact OCC symbol and debit price effect on the
/// way into the order queue.
#[tokio::test]
async fn option_signal_renders_occ_symbol_and_debit_effect() {
    let broker = Arc::new(MockBrokerGateway::new());
    let queue = OrderQueue::new(queue_config(60), broker.clone(), "ACC1".to_string());
    let engine = CopyEngine::new(
        PositionSizer::new(fixed_sizing(1)),
        queue,
        None,
        broker.clone(),
        "ACC1".to_string(),
        safety(5, 1_000.0),
    );

    let signal = Signal {
        id: "sig-opt".to_string(),
        symbol: "SPY".to_string(),
        action: Action::BuyToOpen,
        quantity: 1,
        order_type: OrderType::Market,
        price: None,
        instrument_type: InstrumentType::EquityOption,
        strike: Some(664.0),
        expiration: Some("2025-11-28".to_string()),
        option_type: Some(OptionType::Put),
        timestamp: chrono::Utc::now(),
        source: "test".to_string(),
        take_profit_price: None,
        stop_loss_price: None,
    };

    engine.process_signal(&signal).await.unwrap();
    let placed = broker.placed_orders();
    assert_eq!(placed[0].1.legs[0].symbol, "SPY   251128P00664000");
    assert_eq!(
        placed[0].1.price_effect,
        Some(copybridge_backend::broker::PriceEffect::Debit)
    );
}

/// S3 — proportional sizing tracks the cached coach/follower ratio and still floors to
/// a minimum quantity of one.
#[tokio::test]
async fn proportional_sizing_scales_with_the_cached_ratio() {
    let mut config = fixed_sizing(0);
    config.method = SizingMethod::Proportional;
    config.min_quantity = Some(1);
    let sizer = PositionSizer::new(config);
    sizer.update_coach_balance(500_000.0);
    sizer.update_follower_balance(50_000.0);

    let mut signal = Signal {
        id: "sig-1".to_string(),
        symbol: "AAPL".to_string(),
        action: Action::BuyToOpen,
        quantity: 10,
        order_type: OrderType::Market,
        price: None,
        instrument_type: InstrumentType::Equity,
        strike: None,
        expiration: None,
        option_type: None,
        timestamp: chrono::Utc::now(),
        source: "test".to_string(),
        take_profit_price: None,
        stop_loss_price: None,
    };
    assert_eq!(sizer.calculate(&signal), 1);

    signal.quantity = 4;
    assert_eq!(sizer.calculate(&signal), 1);
}

/// S4 — a `tif_day_invalid_intersession` rejection is retried once with GTC and
/// succeeds.
#[tokio::test]
async fn tif_rejection_is_retried_with_gtc() {
    let broker = Arc::new(MockBrokerGateway::new());
    broker.push_create_order_result(Err(BridgeError::BrokerRejection {
        code: "tif_day_invalid_intersession".to_string(),
        message: "market is closed for day orders".to_string(),
    }));
    let queue = OrderQueue::new(queue_config(60), broker.clone(), "ACC1".to_string());

    let payload = OrderPayload::single_leg(
        OrderKind::Market,
        OrderLeg {
            instrument_type: InstrumentType::Equity,
            symbol: "AAPL".to_string(),
            quantity: 5,
            action: Action::BuyToOpen,
            price: None,
        },
        TimeInForce::Day,
    );

    let rx = queue.enqueue(payload, EnqueueOptions::default()).await;
    let result = rx.await.unwrap().unwrap();
    assert!(result.ack.is_some());

    let placed = broker.placed_orders();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0].1.time_in_force, TimeInForce::Day);
    assert_eq!(placed[1].1.time_in_force, TimeInForce::Gtc);
}

/// S5 — once the per-minute rate limit is hit, a further enqueue does not resolve
/// immediately; it sits behind the window instead of dispatching right away.
#[tokio::test]
async fn rate_limited_order_does_not_resolve_immediately() {
    let broker = Arc::new(MockBrokerGateway::new());
    let queue = OrderQueue::new(queue_config(1), broker.clone(), "ACC1".to_string());

    let payload = |symbol: &str| {
        OrderPayload::single_leg(
            OrderKind::Market,
            OrderLeg {
                instrument_type: InstrumentType::Equity,
                symbol: symbol.to_string(),
                quantity: 1,
                action: Action::BuyToOpen,
                price: None,
            },
            TimeInForce::Day,
        )
    };

    let rx1 = queue.enqueue(payload("AAPL"), EnqueueOptions::default()).await;
    rx1.await.unwrap().unwrap();

    let mut rx2 = queue.enqueue(payload("MSFT"), EnqueueOptions::default()).await;
    let still_pending = tokio::time::timeout(Duration::from_millis(150), &mut rx2).await;
    assert!(still_pending.is_err(), "second order should still be rate-limited");
    assert_eq!(queue.queue_len(), 1);
}

fn tiers_with_vip_and_premium() -> TierChannels {
    TierChannels {
        vip_channel_id: Some("vip-signals".to_string()),
        premium_channel_id: Some("premium-signals".to_string()),
        basic_channel_id: Some("basic-signals".to_string()),
        vip_fills_channel_id: None,
        premium_fills_channel_id: None,
        basic_fills_channel_id: None,
        transport_token: None,
    }
}

fn fill(symbol: &str) -> Fill {
    Fill {
        id: "f1".to_string(),
        symbol: symbol.to_string(),
        action: Action::BuyToOpen,
        total_quantity: 5,
        order_type: OrderType::Market,
        price: Some(600.0),
        instrument_type: InstrumentType::Equity,
        strike: None,
        expiration: None,
        option_type: None,
        timestamp: chrono::Utc::now(),
        source: "tastytrade".to_string(),
        status: FillStatus::Filled,
        filled_quantity: 5,
        fill_price: 601.25,
        fees: 0.50,
        account_number: "ACC-7654321".to_string(),
        filled_at: chrono::Utc::now(),
    }
}

/// S6 — a fill for a signal the router already tracked reuses that signal's exact tier
/// set rather than recomputing one from the fill's own symbol.
#[tokio::test]
async fn fill_fan_out_reuses_tracked_signal_tiers() {
    let memory = SignalTierMemory::new();
    memory.track("sig42", vec![Tier::Vip, Tier::Premium]);

    let transport = Arc::new(RecordingTransport::new());
    let broadcaster = FillBroadcaster::new(tiers_with_vip_and_premium(), transport.clone(), false);

    let report = broadcaster
        .broadcast_fill(fill("NFLX"), Some(&memory), Some("sig42"))
        .await;

    assert!(!report.dropped_critical);
    assert_eq!(report.dispatched.len(), 2);
    let tiers: Vec<Tier> = report.dispatched.iter().map(|o| o.tier).collect();
    assert!(tiers.contains(&Tier::Vip));
    assert!(tiers.contains(&Tier::Premium));
    assert!(!tiers.contains(&Tier::Basic));
    assert!(report.dispatched.iter().all(|o| o.result.is_ok()));
}

/// S7 — a fill missing its symbol is critical-invalid and never reaches the transport.
#[tokio::test]
async fn critical_invalid_fill_never_reaches_the_transport() {
    let mut bad = fill("SPY");
    bad.symbol = String::new();
    assert!(validate(&bad).critical);

    let transport = Arc::new(RecordingTransport::new());
    let broadcaster = FillBroadcaster::new(tiers_with_vip_and_premium(), transport.clone(), false);
    let report = broadcaster.broadcast_fill(bad, None, None).await;

    assert!(report.dropped_critical);
    assert!(report.dispatched.is_empty());
    assert!(transport.sent_messages().is_empty());
}

/// S8 — once today's trade count is at the configured limit, the engine blocks the
/// next signal before it ever reaches the order queue.
#[tokio::test]
async fn daily_trade_limit_blocks_before_the_queue_is_touched() {
    let broker = Arc::new(MockBrokerGateway::new());
    let queue = OrderQueue::new(queue_config(60), broker.clone(), "ACC1".to_string());
    let engine = CopyEngine::new(
        PositionSizer::new(fixed_sizing(1)),
        queue,
        None,
        broker.clone(),
        "ACC1".to_string(),
        safety(1, 1_000.0),
    );

    let signal = Signal {
        id: "sig-1".to_string(),
        symbol: "AAPL".to_string(),
        action: Action::BuyToOpen,
        quantity: 1,
        order_type: OrderType::Market,
        price: None,
        instrument_type: InstrumentType::Equity,
        strike: None,
        expiration: None,
        option_type: None,
        timestamp: chrono::Utc::now(),
        source: "test".to_string(),
        take_profit_price: None,
        stop_loss_price: None,
    };

    engine.process_signal(&signal).await.unwrap();
    assert_eq!(broker.placed_orders().len(), 1);

    let err = engine.process_signal(&signal).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::PolicyBlocked {
            reason: PolicyBlockReason::DailyLimit
        }
    ));
    assert_eq!(broker.placed_orders().len(), 1, "blocked signal must not reach the broker");
}
