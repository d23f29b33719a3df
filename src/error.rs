//! Crate-wide error taxonomy.
//!
//! Mirrors the error kinds named in the design: each carries enough structure for
//! callers to decide on retry/propagate/skip without string-matching messages.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("transient RPC error: {0}")]
    TransientRpc(String),

    #[error("broker rejected order ({code}): {message}")]
    BrokerRejection { code: String, message: String },

    #[error("policy blocked trade: {reason}")]
    PolicyBlocked { reason: PolicyBlockReason },

    #[error("account stream dropped: {0}")]
    StreamDropped(String),

    #[error("broadcast failed for tier {tier}: {message}")]
    BroadcastFailure { tier: String, message: String },

    #[error("queue cleared")]
    QueueCleared,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyBlockReason {
    TierBlocked,
    DailyLimit,
    LossLimit,
    InvalidQuantity,
}

impl std::fmt::Display for PolicyBlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyBlockReason::TierBlocked => "tier_blocked",
            PolicyBlockReason::DailyLimit => "daily_limit",
            PolicyBlockReason::LossLimit => "loss_limit",
            PolicyBlockReason::InvalidQuantity => "invalid_quantity",
        };
        f.write_str(s)
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
