//! Fans a validated fill out to the configured tier channels (§4.9/C11).
//!
//! Grounded on `signals/quality.rs`'s classify-then-filter shape (critical fills are
//! dropped up front, same as `fill::validator`) and on `broker::BrokerGateway`'s
//! fan-out-then-collect pattern for concurrent per-destination dispatch.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::warn;

use crate::config::TierChannels;
use crate::fill::{sanitise, validate};
use crate::latency::{LatencyKind, LatencyMonitor, LatencySample};
use crate::models::{Fill, InstrumentType};
use crate::tier::{tiers_for_fill, SignalTierMemory, Tier};
use crate::transport::{ChatTransport, RenderedMessage, TransportError};

const FILL_HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone)]
pub struct TierDispatchOutcome {
    pub tier: Tier,
    pub channel_id: String,
    pub result: Result<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    pub dispatched: Vec<TierDispatchOutcome>,
    pub dropped_critical: bool,
}

pub struct FillBroadcaster {
    tiers: TierChannels,
    transport: std::sync::Arc<dyn ChatTransport>,
    history: Mutex<VecDeque<Fill>>,
    tier_filtering_disabled: bool,
    latency: LatencyMonitor,
}

impl FillBroadcaster {
    pub fn new(
        tiers: TierChannels,
        transport: std::sync::Arc<dyn ChatTransport>,
        tier_filtering_disabled: bool,
    ) -> Self {
        Self {
            tiers,
            transport,
            history: Mutex::new(VecDeque::new()),
            tier_filtering_disabled,
            latency: LatencyMonitor::new(),
        }
    }

    pub fn recent_fills(&self) -> Vec<Fill> {
        self.history.lock().iter().cloned().collect()
    }

    /// Per-fill broadcast latency recorded since this broadcaster started running.
    pub fn latency_monitor(&self) -> &LatencyMonitor {
        &self.latency
    }

    /// Validates, sanitises, records and broadcasts a fill. Critical validation errors
    /// drop the fill with no channel traffic; non-critical errors are repaired by
    /// `sanitise` before dispatch proceeds.
    pub async fn broadcast_fill(
        &self,
        fill: Fill,
        signal_tiers: Option<&SignalTierMemory>,
        signal_id: Option<&str>,
    ) -> BroadcastReport {
        let started_at = Instant::now();

        let report = validate(&fill);
        if report.critical {
            warn!(errors = ?report.errors, "dropping critical fill");
            return BroadcastReport {
                dispatched: Vec::new(),
                dropped_critical: true,
            };
        }

        let fill = sanitise(fill);
        self.remember(fill.clone());

        let tiers = signal_id
            .and_then(|id| signal_tiers.and_then(|mem| mem.lookup(id)))
            .unwrap_or_else(|| tiers_for_fill(&fill.symbol, self.tier_filtering_disabled));

        let message = render_fill_message(&fill);

        let mut dispatches = Vec::new();
        for tier in tiers {
            if let Some(channel_id) = self.channel_for(tier) {
                dispatches.push(self.dispatch_one(tier, channel_id, message.clone()));
            }
        }

        let outcomes = futures_util::future::join_all(dispatches).await;

        self.latency.record(LatencySample {
            kind: LatencyKind::Broadcast,
            source: fill.symbol.clone(),
            total_latency_ms: started_at.elapsed().as_secs_f64() * 1_000.0,
            queue_latency_ms: None,
            processing_latency_ms: None,
            at: Utc::now(),
        });

        BroadcastReport {
            dispatched: outcomes,
            dropped_critical: false,
        }
    }

    fn remember(&self, fill: Fill) {
        let mut history = self.history.lock();
        history.push_back(fill);
        while history.len() > FILL_HISTORY_CAP {
            history.pop_front();
        }
    }

    /// The fills channel for a tier, falling back to the tier's signal channel when no
    /// dedicated fills channel is configured.
    fn channel_for(&self, tier: Tier) -> Option<String> {
        match tier {
            Tier::Vip => self
                .tiers
                .vip_fills_channel_id
                .clone()
                .or_else(|| self.tiers.vip_channel_id.clone()),
            Tier::Premium => self
                .tiers
                .premium_fills_channel_id
                .clone()
                .or_else(|| self.tiers.premium_channel_id.clone()),
            Tier::Basic => self
                .tiers
                .basic_fills_channel_id
                .clone()
                .or_else(|| self.tiers.basic_channel_id.clone()),
        }
    }

    async fn dispatch_one(
        &self,
        tier: Tier,
        channel_id: String,
        mut message: RenderedMessage,
    ) -> TierDispatchOutcome {
        message.footer = Some(tier.as_str().to_string());
        let result = self
            .transport
            .send(&channel_id, &message)
            .await
            .map(|receipt| receipt.message_id)
            .map_err(|err: TransportError| err.to_string());
        TierDispatchOutcome {
            tier,
            channel_id,
            result,
        }
    }
}

fn mask_account(account_number: &str) -> String {
    let account_number = account_number.trim();
    if account_number.len() <= 4 {
        account_number.to_string()
    } else {
        format!("***{}", &account_number[account_number.len() - 4..])
    }
}

fn render_fill_message(fill: &Fill) -> RenderedMessage {
    let contract_multiplier = if fill.instrument_type == InstrumentType::EquityOption {
        100.0
    } else {
        1.0
    };
    let mut fields = vec![
        ("Symbol".to_string(), fill.symbol.clone()),
        ("Action".to_string(), fill.action.as_str().to_string()),
        (
            "Quantity".to_string(),
            format!("{}/{}", fill.filled_quantity, fill.total_quantity),
        ),
        ("Fill price".to_string(), format!("{:.2}", fill.fill_price)),
        (
            "Total value".to_string(),
            format!(
                "{:.2}",
                fill.fill_price * fill.filled_quantity as f64 * contract_multiplier
            ),
        ),
        ("Status".to_string(), format!("{:?}", fill.status)),
        ("Fees".to_string(), format!("{:.2}", fill.fees)),
        ("Account".to_string(), mask_account(&fill.account_number)),
        ("Venue".to_string(), fill.source.clone()),
    ];

    if fill.instrument_type == InstrumentType::EquityOption {
        if let (Some(strike), Some(expiration), Some(option_type)) =
            (fill.strike, fill.expiration.as_ref(), fill.option_type)
        {
            fields.push((
                "Option".to_string(),
                format!("{:?} {} exp {}", option_type, strike, expiration),
            ));
        }
    }

    RenderedMessage {
        title: format!("{} {}", fill.action.as_str(), fill.symbol),
        body: format!(
            "{} {} {} @ {:.2}",
            fill.action.as_str(),
            fill.filled_quantity,
            fill.symbol,
            fill.fill_price
        ),
        fields,
        footer: None,
    }
}
