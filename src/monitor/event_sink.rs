//! Event sinks for detected transfers.
//!
//! A sink must return quickly; the poll loop awaits `emit` before it advances
//! the tracker.

use crate::monitor::config::SinkKind;
use crate::types::TransferEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};

/// Consumer of enriched transfer events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: TransferEvent);
}

/// Emits each transfer as a structured `tracing` record.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: TransferEvent) {
        info!(
            wallet = %event.watched_address,
            signature = %event.signature,
            account = %event.account,
            mint = %event.mint,
            symbol = %event.symbol_or_unknown(),
            kind = %event.kind,
            amount = event.amount,
            timestamp = ?event.timestamp,
            "Token transfer detected"
        );
    }
}

/// Prints one human-readable line per transfer.
#[derive(Debug, Default, Clone)]
pub struct ConsoleSink;

#[async_trait]
impl EventSink for ConsoleSink {
    async fn emit(&self, event: TransferEvent) {
        println!("{event}");
    }
}

/// Prints one JSON object per transfer.
#[derive(Debug, Default, Clone)]
pub struct JsonLinesSink;

impl JsonLinesSink {
    pub fn render(event: &TransferEvent) -> Option<String> {
        match serde_json::to_string(event) {
            Ok(line) => Some(line),
            Err(e) => {
                error!("Failed to serialize transfer event {}: {}", event.signature, e);
                None
            }
        }
    }
}

#[async_trait]
impl EventSink for JsonLinesSink {
    async fn emit(&self, event: TransferEvent) {
        if let Some(line) = Self::render(&event) {
            println!("{line}");
        }
    }
}

/// Hands transfers to a downstream queue without ever waiting on it.
///
/// A full queue drops the event with a warning; a closed queue drops it with an error.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<TransferEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<TransferEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: TransferEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Transfer queue full, dropping event for {}", event.signature);
            }
            Err(TrySendError::Closed(event)) => {
                error!("Transfer queue closed, dropping event for {}", event.signature);
            }
        }
    }
}

/// Build the sink selected in the configuration.
pub fn build_sink(kind: SinkKind) -> Arc<dyn EventSink> {
    match kind {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Console => Arc::new(ConsoleSink),
        SinkKind::Json => Arc::new(JsonLinesSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransferKind;

    fn event(signature: &str) -> TransferEvent {
        TransferEvent {
            signature: signature.to_string(),
            watched_address: "wallet".to_string(),
            account: "acct".to_string(),
            mint: "M1".to_string(),
            kind: TransferKind::Sell,
            amount: 1.5,
            timestamp: None,
            symbol: Some("BONK".to_string()),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut receiver) = ChannelSink::channel(4);
        sink.emit(event("a")).await;

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.signature, "a");
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut receiver) = ChannelSink::channel(1);
        sink.emit(event("a")).await;
        sink.emit(event("b")).await;

        assert_eq!(receiver.recv().await.unwrap().signature, "a");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_sink_tolerates_closed_queue() {
        let (sink, receiver) = ChannelSink::channel(1);
        drop(receiver);
        sink.emit(event("a")).await;
    }

    #[test]
    fn test_json_render() {
        let line = JsonLinesSink::render(&event("a")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "SELL");
        assert_eq!(value["symbol"], "BONK");
        assert_eq!(value["amount"], 1.5);
    }
}
