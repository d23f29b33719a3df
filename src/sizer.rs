//! Position sizing (§4.3). Four modes selected by configuration; the hot-path mode
//! (`proportional`) never touches the network — it reads a cached coach/follower
//! balance ratio that is refreshed out of band, the same "cached bankroll, refreshed
//! off the hot path" shape as the teacher's `KellyCalculator` bankroll.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::warn;

use crate::broker::BrokerGateway;
use crate::config::SizingConfig;
use crate::models::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingMethod {
    Fixed,
    Multiplier,
    Proportional,
    Percentage,
}

impl SizingMethod {
    /// Accepts the config vocabulary the spec lists for `SIZING_METHOD`. `match` is
    /// documented as a user-facing synonym for `proportional` (both compute a
    /// coach/follower ratio), so both are accepted here.
    pub fn parse(raw: &str) -> Option<SizingMethod> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(SizingMethod::Fixed),
            "multiplier" => Some(SizingMethod::Multiplier),
            "proportional" | "match" => Some(SizingMethod::Proportional),
            "percentage" => Some(SizingMethod::Percentage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Balances {
    coach: f64,
    follower: f64,
    ratio: f64,
    updated_at: Instant,
}

impl Balances {
    fn compute(coach: f64, follower: f64) -> Self {
        let ratio = if coach > 0.0 { follower / coach } else { 0.0 };
        Self {
            coach,
            follower,
            ratio,
            updated_at: Instant::now(),
        }
    }
}

/// Computes order quantities from signal quantities, per the configured [`SizingMethod`].
pub struct PositionSizer {
    config: SizingConfig,
    balances: RwLock<Option<Balances>>,
    follower_balance: AtomicU64,
    ttl: Duration,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        let ttl = Duration::from_secs(config.balance_cache_ttl_secs);
        Self {
            config,
            balances: RwLock::new(None),
            follower_balance: AtomicU64::new(0),
            ttl,
        }
    }

    /// Resolves the follower balance via the broker when not supplied, and
    /// pre-computes the coach/follower ratio used by `proportional` sizing.
    pub async fn initialize_sizing(
        &self,
        broker: &dyn BrokerGateway,
        account: &str,
        coach_balance: Option<f64>,
        follower_balance: Option<f64>,
    ) {
        let coach = coach_balance.or(self.config.coach_account_balance).unwrap_or(0.0);
        let follower = match follower_balance {
            Some(b) => b,
            None => match broker.get_balances(account).await {
                Ok(snapshot) => snapshot.net_liquidating_value,
                Err(err) => {
                    warn!(error = %err, "failed to resolve follower balance, ratio left uninitialised");
                    *self.balances.write() = None;
                    return;
                }
            },
        };
        self.store_balances(coach, follower);
    }

    fn store_balances(&self, coach: f64, follower: f64) {
        let balances = Balances::compute(coach, follower);
        self.store_follower_bits(follower);
        *self.balances.write() = Some(balances);
    }

    fn store_follower_bits(&self, follower: f64) {
        self.follower_balance
            .store(follower.to_bits(), Ordering::Relaxed);
    }

    fn follower_balance(&self) -> f64 {
        f64::from_bits(self.follower_balance.load(Ordering::Relaxed))
    }

    pub fn update_coach_balance(&self, coach: f64) {
        let follower = self.balances.read().map(|b| b.follower).unwrap_or(0.0);
        self.store_balances(coach, follower);
    }

    pub fn update_follower_balance(&self, follower: f64) {
        let coach = self.balances.read().map(|b| b.coach).unwrap_or(0.0);
        self.store_balances(coach, follower);
    }

    /// Non-blocking: reads the broker off the hot path and updates the cache. Callers
    /// typically invoke this from a periodic background task, not from `calculate`.
    pub async fn refresh_follower_balance(&self, broker: &dyn BrokerGateway, account: &str) {
        match broker.get_balances(account).await {
            Ok(snapshot) => self.update_follower_balance(snapshot.net_liquidating_value),
            Err(err) => warn!(error = %err, "follower balance refresh failed, keeping cached value"),
        }
    }

    pub fn needs_cache_refresh(&self) -> bool {
        match *self.balances.read() {
            Some(b) => b.updated_at.elapsed() >= self.ttl,
            None => true,
        }
    }

    fn clamp(&self, quantity: u64) -> u64 {
        let mut q = quantity;
        if let Some(min) = self.config.min_quantity {
            q = q.max(min);
        }
        if let Some(max) = self.config.max_quantity {
            q = q.min(max);
        }
        q
    }

    /// Pure hot path: no I/O. `proportional` reads the cached ratio; everything else
    /// is arithmetic over the signal and static config.
    pub fn calculate(&self, signal: &Signal) -> u64 {
        let raw = match self.config.method {
            SizingMethod::Fixed => self.config.fixed_quantity,
            SizingMethod::Multiplier => {
                ((signal.quantity as f64) * self.config.multiplier).floor() as u64
            }
            SizingMethod::Proportional => {
                let ratio = self.balances.read().map(|b| b.ratio);
                match ratio {
                    Some(ratio) => ((signal.quantity as f64) * ratio).round() as u64,
                    None => {
                        warn!("proportional sizing requested before ratio initialised, falling back to signal quantity");
                        signal.quantity.max(1)
                    }
                }
            }
            SizingMethod::Percentage => {
                let follower = self
                    .balances
                    .read()
                    .map(|b| b.follower)
                    .unwrap_or_else(|| self.follower_balance());
                let price_per_contract = signal.price.unwrap_or(100.0)
                    * if signal.instrument_type == crate::models::InstrumentType::EquityOption {
                        100.0
                    } else {
                        1.0
                    };
                if price_per_contract <= 0.0 {
                    0
                } else {
                    ((follower * self.config.percentage / 100.0) / price_per_contract).floor()
                        as u64
                }
            }
        };
        self.clamp(raw)
    }
}
