//! Copy-trading bridge binary entry point.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use copybridge_backend::broker::{AccountEvent, BrokerGateway, MockBrokerGateway};
use copybridge_backend::config::Config;
use copybridge_backend::copy_engine::CopyEngine;
use copybridge_backend::policy::PolicyClient;
use copybridge_backend::queue::OrderQueue;
use copybridge_backend::sizer::PositionSizer;
use copybridge_backend::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("copybridge starting");

    let config = Config::from_env().context("failed to load configuration")?;

    // The real broker/chat adapters live outside this crate; wire the in-memory test
    // doubles so the service is runnable end to end until a real adapter is plugged in.
    let broker = Arc::new(MockBrokerGateway::new());
    broker.authenticate().await.context("broker authentication failed")?;

    let sizer = PositionSizer::new(config.sizing.clone());
    sizer
        .initialize_sizing(
            broker.as_ref(),
            &config.broker.account_number,
            config.sizing.coach_account_balance,
            None,
        )
        .await;

    let queue = OrderQueue::new(
        config.queue.clone(),
        broker.clone(),
        config.broker.account_number.clone(),
    );

    let policy = if config.policy.bot_token.trim().is_empty() {
        warn!("CENTRAL_BOT_TOKEN not set, running without policy gating");
        None
    } else {
        let client = Arc::new(PolicyClient::new(config.policy.clone()));
        if let Err(err) = client.authenticate().await {
            warn!(error = %err, "initial policy authentication failed, continuing unauthenticated");
        }
        Some(client)
    };

    let copy_engine = Arc::new(CopyEngine::new(
        sizer,
        queue.clone(),
        policy.clone(),
        broker.clone(),
        config.broker.account_number.clone(),
        config.safety.clone(),
    ));

    let supervisor = Supervisor::new();

    let queue_for_heartbeat = queue.clone();
    supervisor.register(
        "queue-dispatcher-heartbeat",
        Arc::new(move || Box::pin(queue_status_loop(queue_for_heartbeat.clone()))),
    );

    if let Some(policy) = policy.clone() {
        supervisor.register(
            "policy-status-refresh",
            Arc::new(move || Box::pin(policy_refresh_loop(policy.clone()))),
        );
    }

    let balance_cache_ttl_secs = config.sizing.balance_cache_ttl_secs;
    let balance_engine = copy_engine.clone();
    supervisor.register(
        "balance-refresh",
        Arc::new(move || {
            Box::pin(balance_refresh_loop(balance_engine.clone(), balance_cache_ttl_secs))
        }),
    );

    let streamer_broker = broker.clone();
    let streamer_account = config.broker.account_number.clone();
    supervisor.register(
        "account-event-streamer",
        Arc::new(move || {
            Box::pin(account_event_stream_loop(
                streamer_broker.clone(),
                streamer_account.clone(),
            ))
        }),
    );

    supervisor.start_all();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    supervisor.shutdown().await;

    Ok(())
}

async fn queue_status_loop(queue: Arc<OrderQueue>) -> anyhow::Result<()> {
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        info!(
            queued = queue.queue_len(),
            active = queue.active_orders(),
            "queue status"
        );
    }
}

async fn policy_refresh_loop(policy: Arc<PolicyClient>) -> anyhow::Result<()> {
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(60 * 60)).await;
        policy.refresh_status().await;
    }
}

async fn balance_refresh_loop(engine: Arc<CopyEngine>, ttl_secs: u64) -> anyhow::Result<()> {
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(ttl_secs)).await;
        engine.refresh_follower_balance().await;
    }
}

/// Drains the broker's account event channel for as long as the stream holds up; a
/// dropped stream returns an error so the supervisor restarts this role under its usual
/// back-off policy rather than the whole process exiting.
async fn account_event_stream_loop(broker: Arc<dyn BrokerGateway>, account: String) -> anyhow::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let stream_broker = broker.clone();
    let stream_account = account.clone();
    let stream_task = tokio::spawn(async move { stream_broker.stream_account_events(&stream_account, tx).await });

    while let Some(event) = rx.recv().await {
        match event {
            AccountEvent::OrderFilled(ack) => {
                info!(order_id = %ack.order_id, status = ?ack.status, "order filled")
            }
            AccountEvent::OrderCancelled { order_id } => info!(order_id = %order_id, "order cancelled"),
            AccountEvent::OrderRejected { order_id, reason } => {
                warn!(order_id = %order_id, reason = %reason, "order rejected")
            }
            AccountEvent::BalancesUpdated(snapshot) => {
                info!(net_liquidating_value = snapshot.net_liquidating_value, "balances updated")
            }
        }
    }

    stream_task
        .await
        .context("account event stream task panicked")?
        .context("account event stream ended")?;
    anyhow::bail!("account event stream closed for account {account}")
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "copybridge_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];
    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}
