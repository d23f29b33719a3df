//! Chat/notification transport seam (§4.9/A4). The real chat client (webhook or bot API)
//! lives outside this crate; `ChatTransport` is the trait boundary the broadcaster codes
//! against, mirrored on `broker::BrokerGateway`'s shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub title: String,
    pub body: String,
    pub fields: Vec<(String, String)>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub channel_id: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("channel not configured")]
    ChannelNotConfigured,
    #[error("transport rejected message: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(
        &self,
        channel_id: &str,
        message: &RenderedMessage,
    ) -> Result<DeliveryReceipt, TransportError>;
}

/// In-memory [`ChatTransport`] for unit and integration tests, recording every message
/// it was asked to send (§4.9 "Ambient addition").
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, RenderedMessage)>>,
    next_id: Mutex<u64>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_messages(&self) -> Vec<(String, RenderedMessage)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(
        &self,
        channel_id: &str,
        message: &RenderedMessage,
    ) -> Result<DeliveryReceipt, TransportError> {
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        let message_id = format!("msg_{next_id}");

        self.sent.lock().push((channel_id.to_string(), message.clone()));

        Ok(DeliveryReceipt {
            message_id,
            channel_id: channel_id.to_string(),
            sent_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> RenderedMessage {
        RenderedMessage {
            title: "Fill".to_string(),
            body: "AAPL filled".to_string(),
            fields: vec![("symbol".to_string(), "AAPL".to_string())],
            footer: Some("vip".to_string()),
        }
    }

    #[tokio::test]
    async fn records_sent_messages() {
        let transport = RecordingTransport::new();
        let receipt = transport.send("chan-1", &message()).await.unwrap();
        assert_eq!(receipt.channel_id, "chan-1");
        assert_eq!(transport.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn issues_distinct_message_ids() {
        let transport = RecordingTransport::new();
        let a = transport.send("chan-1", &message()).await.unwrap();
        let b = transport.send("chan-1", &message()).await.unwrap();
        assert_ne!(a.message_id, b.message_id);
    }
}
