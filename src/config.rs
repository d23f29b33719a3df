//! Environment configuration loading.
//!
//! Grouped exactly as the external-interfaces section of the design lists: broker auth,
//! transport/channel ids, policy, sizing, safety, filtering, queue. Every field is fail-soft
//! (falls back to a documented default) except where noted.

use std::env;

use crate::sizer::SizingMethod;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub environment: BrokerEnv,
    pub account_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEnv {
    Sandbox,
    Production,
}

#[derive(Debug, Clone)]
pub struct TierChannels {
    pub vip_channel_id: Option<String>,
    pub premium_channel_id: Option<String>,
    pub basic_channel_id: Option<String>,
    pub vip_fills_channel_id: Option<String>,
    pub premium_fills_channel_id: Option<String>,
    pub basic_fills_channel_id: Option<String>,
    pub transport_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub server_url: String,
    pub bot_token: String,
    pub subscriber_id: Option<String>,
    pub deployment_id: Option<String>,
    pub discord_user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SizingConfig {
    pub method: SizingMethod,
    pub fixed_quantity: u64,
    pub multiplier: f64,
    pub percentage: f64,
    pub coach_account_balance: Option<f64>,
    pub balance_cache_ttl_secs: u64,
    pub min_quantity: Option<u64>,
    pub max_quantity: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub max_daily_trades: u32,
    pub max_daily_loss: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub enabled_symbols: Option<Vec<String>>,
    pub enabled_actions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueProfile {
    Aggressive,
    Balanced,
    Conservative,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub profile: QueueProfile,
    pub max_concurrent_orders: usize,
    pub delay_between_orders_ms: u64,
    pub max_orders_per_minute: u32,
    pub priority_threshold: u8,
    pub enable_dry_run_validation: bool,
}

impl QueueConfig {
    fn for_profile(profile: QueueProfile) -> Self {
        let (max_concurrent, delay_ms, per_minute) = match profile {
            QueueProfile::Aggressive => (10, 0, 120),
            QueueProfile::Balanced => (5, 250, 60),
            QueueProfile::Conservative => (2, 1000, 20),
        };
        Self {
            profile,
            max_concurrent_orders: max_concurrent,
            delay_between_orders_ms: delay_ms,
            max_orders_per_minute: per_minute,
            priority_threshold: 8,
            enable_dry_run_validation: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub tiers: TierChannels,
    pub policy: PolicyConfig,
    pub sizing: SizingConfig,
    pub safety: SafetyConfig,
    pub filters: FilterConfig,
    pub queue: QueueConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let account_number = env::var("BROKER_ACCOUNT_NUMBER")
            .map_err(|_| anyhow::anyhow!("BROKER_ACCOUNT_NUMBER is required"))?;

        let broker = BrokerConfig {
            username: env::var("BROKER_USERNAME").ok(),
            password: env::var("BROKER_PASSWORD").ok(),
            client_secret: env::var("BROKER_CLIENT_SECRET").ok(),
            refresh_token: env::var("BROKER_REFRESH_TOKEN").ok(),
            environment: match env::var("BROKER_ENV").as_deref() {
                Ok("production") => BrokerEnv::Production,
                _ => BrokerEnv::Sandbox,
            },
            account_number,
        };

        let tiers = TierChannels {
            vip_channel_id: env::var("VIP_CHANNEL_ID").ok(),
            premium_channel_id: env::var("PREMIUM_CHANNEL_ID").ok(),
            basic_channel_id: env::var("BASIC_CHANNEL_ID").ok(),
            vip_fills_channel_id: env::var("VIP_FILLS_CHANNEL_ID").ok(),
            premium_fills_channel_id: env::var("PREMIUM_FILLS_CHANNEL_ID").ok(),
            basic_fills_channel_id: env::var("BASIC_FILLS_CHANNEL_ID").ok(),
            transport_token: env::var("TRANSPORT_TOKEN").ok(),
        };

        let policy = PolicyConfig {
            server_url: env::var("CENTRAL_SERVER_URL")
                .unwrap_or_else(|_| "https://policy.internal".to_string()),
            bot_token: env::var("CENTRAL_BOT_TOKEN").unwrap_or_default(),
            subscriber_id: env::var("CENTRAL_SUBSCRIBER_ID").ok(),
            deployment_id: env::var("DEPLOYMENT_ID").ok(),
            discord_user_id: env::var("CENTRAL_DISCORD_USER_ID").ok(),
        };

        let method = env::var("SIZING_METHOD")
            .ok()
            .and_then(|v| SizingMethod::parse(&v))
            .unwrap_or(SizingMethod::Fixed);

        let sizing = SizingConfig {
            method,
            fixed_quantity: parse_env_or("FIXED_QUANTITY", 1),
            multiplier: parse_env_or("MULTIPLIER", 1.0),
            percentage: parse_env_or("PERCENTAGE", 1.0),
            coach_account_balance: env::var("COACH_ACCOUNT_BALANCE")
                .ok()
                .and_then(|v| v.parse::<f64>().ok()),
            balance_cache_ttl_secs: parse_env_or("BALANCE_CACHE_TTL", 60),
            min_quantity: env::var("MIN_QUANTITY").ok().and_then(|v| v.parse().ok()),
            max_quantity: env::var("MAX_QUANTITY").ok().and_then(|v| v.parse().ok()),
        };

        let safety = SafetyConfig {
            max_daily_trades: parse_env_or("MAX_DAILY_TRADES", 20),
            max_daily_loss: parse_env_or("MAX_DAILY_LOSS", 1_000.0),
        };

        let filters = FilterConfig {
            enabled_symbols: env::var("ENABLED_SYMBOLS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_uppercase()).collect()),
            enabled_actions: env::var("ENABLED_ACTIONS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_uppercase()).collect()),
        };

        let profile = match env::var("QUEUE_CONFIG_PROFILE").as_deref() {
            Ok("aggressive") => QueueProfile::Aggressive,
            Ok("conservative") => QueueProfile::Conservative,
            _ => QueueProfile::Balanced,
        };
        let mut queue = QueueConfig::for_profile(profile);
        if let Ok(v) = env::var("maxConcurrentOrders") {
            if let Ok(n) = v.parse() {
                queue.max_concurrent_orders = n;
            }
        }
        if let Ok(v) = env::var("delayBetweenOrders") {
            if let Ok(n) = v.parse() {
                queue.delay_between_orders_ms = n;
            }
        }
        if let Ok(v) = env::var("maxOrdersPerMinute") {
            if let Ok(n) = v.parse() {
                queue.max_orders_per_minute = n;
            }
        }
        if let Ok(v) = env::var("priorityThreshold") {
            if let Ok(n) = v.parse() {
                queue.priority_threshold = n;
            }
        }
        if let Ok(v) = env::var("enableDryRunValidation") {
            queue.enable_dry_run_validation = matches!(v.as_str(), "1" | "true" | "TRUE" | "on");
        }

        Ok(Self {
            broker,
            tiers,
            policy,
            sizing,
            safety,
            filters,
            queue,
        })
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
