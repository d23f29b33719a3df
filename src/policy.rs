//! Central policy client (§4.2): session-based day-level trading authorisation cached
//! locally, plus fire-and-forget trade/pnl reporting. Grounded on `auth/api.rs`'s shared
//! `reqwest::Client` + bearer-token pattern, generalised from JWT login to day-level
//! trade authorisation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::PolicyConfig;
use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingStatus {
    pub can_trade: bool,
    pub tier: String,
    pub monthly_profit_used: f64,
    pub monthly_cap_limit: f64,
    pub max_position_size: f64,
    pub valid_until: DateTime<Utc>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    can_trade: bool,
    tier: String,
    monthly_profit_used: f64,
    monthly_cap_limit: f64,
    max_position_size: f64,
    valid_until: DateTime<Utc>,
    reason: Option<String>,
    message: Option<String>,
}

impl From<StatusBody> for TradingStatus {
    fn from(body: StatusBody) -> Self {
        TradingStatus {
            can_trade: body.can_trade,
            tier: body.tier,
            monthly_profit_used: body.monthly_profit_used,
            monthly_cap_limit: body.monthly_cap_limit,
            max_position_size: body.max_position_size,
            valid_until: body.valid_until,
            reason: body.reason,
            message: body.message,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticateRequest<'a> {
    subscriber_id: Option<&'a str>,
    bot_token: &'a str,
    discord_user_id: Option<&'a str>,
    deployment_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticateResponse {
    session_token: String,
    #[allow(dead_code)]
    bot_id: String,
    #[allow(dead_code)]
    subscriber_id: Option<String>,
    status: StatusBody,
}

#[derive(Debug, Deserialize)]
struct BotStatusResponse {
    status: StatusBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportTradeBody {
    symbol: String,
    quantity: u64,
    fill_price: f64,
    pnl: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePnlBody {
    trade_id: String,
    pnl: f64,
}

enum ReportJob {
    Trade {
        symbol: String,
        quantity: u64,
        fill_price: f64,
        pnl: f64,
        timestamp: DateTime<Utc>,
    },
    Pnl {
        trade_id: String,
        pnl: f64,
    },
}

/// Day-cached trading authorisation plus fire-and-forget trade/pnl reporting.
pub struct PolicyClient {
    config: PolicyConfig,
    http: reqwest::Client,
    session_token: Arc<RwLock<Option<String>>>,
    status: RwLock<Option<TradingStatus>>,
    report_tx: mpsc::Sender<ReportJob>,
}

impl PolicyClient {
    pub fn new(config: PolicyConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with static config");

        let session_token = Arc::new(RwLock::new(None));

        let (report_tx, report_rx) = mpsc::channel(256);
        let worker_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client builds with static config");
        let worker_config = config.clone();
        let worker_session_token = session_token.clone();
        tokio::spawn(drain_reports(worker_http, worker_config, worker_session_token, report_rx));

        Self {
            config,
            http,
            session_token,
            status: RwLock::new(None),
            report_tx,
        }
    }

    /// The session token from a successful `authenticate()`, falling back to the
    /// configured static bot token for calls made before the first authentication.
    fn bearer_token(&self) -> String {
        bearer_token_of(&self.session_token, &self.config)
    }

    /// `POST /api/v1/bot/authenticate`. Fatal auth failures (401) propagate; 403/404
    /// also populate a blocking status so `canTradeToday` reports false without
    /// crashing the process.
    pub async fn authenticate(&self) -> Result<(), BridgeError> {
        let url = format!("{}/api/v1/bot/authenticate", self.config.server_url);
        let body = AuthenticateRequest {
            subscriber_id: self.config.subscriber_id.as_deref(),
            bot_token: &self.config.bot_token,
            discord_user_id: self.config.discord_user_id.as_deref(),
            deployment_id: self.config.deployment_id.as_deref(),
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::TransientRpc(e.to_string()))?;

        match resp.status().as_u16() {
            200 => {
                let parsed: AuthenticateResponse = resp
                    .json()
                    .await
                    .map_err(|e| BridgeError::TransientRpc(e.to_string()))?;
                let status: TradingStatus = parsed.status.into();
                info!(tier = %status.tier, can_trade = status.can_trade, "policy authenticated");
                *self.session_token.write() = Some(parsed.session_token);
                *self.status.write() = Some(status);
                Ok(())
            }
            401 => Err(BridgeError::Auth("policy server rejected credentials".to_string())),
            403 => {
                self.block_with_reason("account_inactive");
                Ok(())
            }
            404 => {
                self.block_with_reason("subscriber_not_found");
                Ok(())
            }
            code => Err(BridgeError::TransientRpc(format!(
                "policy authenticate returned HTTP {code}"
            ))),
        }
    }

    fn block_with_reason(&self, reason: &str) {
        warn!(reason, "policy server blocked trading for this cycle");
        *self.status.write() = Some(TradingStatus {
            can_trade: false,
            tier: "blocked".to_string(),
            monthly_profit_used: 0.0,
            monthly_cap_limit: 0.0,
            max_position_size: 0.0,
            valid_until: Utc::now() + chrono::Duration::hours(24),
            reason: Some(reason.to_string()),
            message: None,
        });
    }

    /// `GET /api/v1/bot/status` (bearer). Never overwrites a still-valid cached status
    /// on failure.
    pub async fn refresh_status(&self) {
        match self.fetch_status().await {
            Ok(status) => {
                info!(tier = %status.tier, can_trade = status.can_trade, "policy status refreshed");
                *self.status.write() = Some(status);
            }
            Err(err) => warn!(error = %err, "policy status refresh failed, keeping cached status"),
        }
    }

    async fn fetch_status(&self) -> Result<TradingStatus, BridgeError> {
        let url = format!("{}/api/v1/bot/status", self.config.server_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(self.bearer_token())
            .send()
            .await
            .map_err(|e| BridgeError::TransientRpc(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BridgeError::TransientRpc(format!(
                "policy status returned HTTP {}",
                resp.status()
            )));
        }
        let parsed: BotStatusResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::TransientRpc(e.to_string()))?;
        Ok(parsed.status.into())
    }

    pub fn can_trade_today(&self) -> bool {
        match &*self.status.read() {
            Some(status) => status.can_trade && Utc::now() <= status.valid_until,
            None => false,
        }
    }

    pub fn can_execute_position(&self, value_usd: f64) -> bool {
        if !self.can_trade_today() {
            return false;
        }
        match &*self.status.read() {
            Some(status) => value_usd <= status.max_position_size,
            None => false,
        }
    }

    pub fn current_status(&self) -> Option<TradingStatus> {
        self.status.read().clone()
    }

    /// Fire-and-forget: enqueues a report for the background worker. Never blocks the
    /// caller and never surfaces a failure to it.
    pub fn report_trade(&self, symbol: String, quantity: u64, fill_price: f64, pnl: f64) {
        let job = ReportJob::Trade {
            symbol,
            quantity,
            fill_price,
            pnl,
            timestamp: Utc::now(),
        };
        if self.report_tx.try_send(job).is_err() {
            warn!("policy report queue full, dropping trade report");
        }
    }

    pub fn update_pnl(&self, trade_id: String, pnl: f64) {
        if self.report_tx.try_send(ReportJob::Pnl { trade_id, pnl }).is_err() {
            warn!("policy report queue full, dropping pnl update");
        }
    }
}

fn bearer_token_of(session_token: &RwLock<Option<String>>, config: &PolicyConfig) -> String {
    session_token
        .read()
        .clone()
        .unwrap_or_else(|| config.bot_token.clone())
}

async fn drain_reports(
    http: reqwest::Client,
    config: PolicyConfig,
    session_token: Arc<RwLock<Option<String>>>,
    mut rx: mpsc::Receiver<ReportJob>,
) {
    while let Some(job) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            let bearer = bearer_token_of(&session_token, &config);
            let result = match &job {
                ReportJob::Trade {
                    symbol,
                    quantity,
                    fill_price,
                    pnl,
                    timestamp,
                } => {
                    send_trade_report(&http, &config, &bearer, symbol, *quantity, *fill_price, *pnl, *timestamp).await
                }
                ReportJob::Pnl { trade_id, pnl } => send_pnl_report(&http, &config, &bearer, trade_id, *pnl).await,
            };
            match result {
                Ok(()) => break,
                Err(err) if attempt >= 4 => {
                    error!(error = %err, attempt, "giving up on policy report after repeated failures");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, attempt, "policy report failed, backing off");
                    let backoff = Duration::from_millis(250 * 2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

async fn send_trade_report(
    http: &reqwest::Client,
    config: &PolicyConfig,
    bearer: &str,
    symbol: &str,
    quantity: u64,
    fill_price: f64,
    pnl: f64,
    timestamp: DateTime<Utc>,
) -> Result<(), BridgeError> {
    let url = format!("{}/api/v1/report-trade", config.server_url);
    let body = ReportTradeBody {
        symbol: symbol.to_string(),
        quantity,
        fill_price,
        pnl,
        timestamp,
    };
    let resp = http
        .post(&url)
        .bearer_auth(bearer)
        .json(&body)
        .send()
        .await
        .map_err(|e| BridgeError::TransientRpc(e.to_string()))?;
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(BridgeError::TransientRpc(format!(
            "trade report returned HTTP {}",
            resp.status()
        )))
    }
}

async fn send_pnl_report(
    http: &reqwest::Client,
    config: &PolicyConfig,
    bearer: &str,
    trade_id: &str,
    pnl: f64,
) -> Result<(), BridgeError> {
    let url = format!("{}/api/v1/update-pnl", config.server_url);
    let body = UpdatePnlBody {
        trade_id: trade_id.to_string(),
        pnl,
    };
    let resp = http
        .post(&url)
        .bearer_auth(bearer)
        .json(&body)
        .send()
        .await
        .map_err(|e| BridgeError::TransientRpc(e.to_string()))?;
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(BridgeError::TransientRpc(format!(
            "pnl report returned HTTP {}",
            resp.status()
        )))
    }
}
