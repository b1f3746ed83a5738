//! Price stream transport.
//!
//! The producer and the evaluator only see the traits below; which broker sits
//! behind them is decided in the composition root. Delivery is at-least-once:
//! a subscriber's position only becomes durable once [`PriceSubscriber::commit`]
//! is called, so anything received but not committed before a restart is
//! delivered again.

pub mod memory;
pub mod producer;

#[cfg(feature = "kafka")]
pub mod kafka;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic carrying [`PriceEvent`]s unless configured otherwise.
pub const PRICE_TOPIC: &str = "stock-price-updates";

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("broker unreachable: {0}")]
    Connection(String),

    #[error("subscription failed: {0}")]
    Subscribe(String),

    #[error("publish failed: {0}")]
    Send(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("undecodable payload: {0}")]
    Decode(String),

    #[error("channel closed")]
    ChannelClosed,
}

/// One price observation for one symbol. Serialized as a flat object
/// `{"symbol": .., "price": .., "timestamp": ..}` with the price as a JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Epoch seconds at fetch time.
    pub timestamp: i64,
}

impl PriceEvent {
    pub fn new(symbol: impl Into<String>, price: Decimal, timestamp: i64) -> Self {
        Self { symbol: symbol.into(), price, timestamp }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Decode(e.to_string()))
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(payload).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Publisher - appends price events to the topic
#[async_trait]
pub trait PricePublisher: Send + Sync {
    async fn publish(&self, event: &PriceEvent) -> Result<(), TransportError>;
}

/// Subscriber - reads price events from the topic on behalf of one consumer group
#[async_trait]
pub trait PriceSubscriber: Send {
    /// Wait for the next event. A [`TransportError::Decode`] still advances the
    /// position, so committing afterwards skips the bad record.
    async fn next(&mut self) -> Result<PriceEvent, TransportError>;

    /// Acknowledge everything returned by `next` so far.
    async fn commit(&mut self) -> Result<(), TransportError>;
}

/// Factory for publisher/subscriber endpoints. Creating an endpoint is where
/// an unreachable broker surfaces.
#[async_trait]
pub trait PriceTransport: Send + Sync {
    async fn publisher(&self) -> Result<Box<dyn PricePublisher>, TransportError>;
    async fn subscriber(&self) -> Result<Box<dyn PriceSubscriber>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // Ensure traits are object-safe
    fn _assert_publisher_object_safe(_: &dyn PricePublisher) {}
    fn _assert_subscriber_object_safe(_: &mut dyn PriceSubscriber) {}
    fn _assert_transport_object_safe(_: &dyn PriceTransport) {}

    #[test]
    fn test_price_event_wire_format() {
        let event = PriceEvent::new("AAPL", dec!(189.5), 1_700_000_000);
        let value: serde_json::Value = serde_json::from_slice(&event.to_payload().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({ "symbol": "AAPL", "price": 189.5, "timestamp": 1_700_000_000 }));
    }

    #[test]
    fn test_price_event_accepts_integer_price() {
        let event = PriceEvent::from_payload(br#"{"symbol":"MSFT","price":101,"timestamp":5}"#).unwrap();
        assert_eq!(event.price, dec!(101));
        assert!(matches!(
            PriceEvent::from_payload(b"not json"),
            Err(TransportError::Decode(_))
        ));
    }
}
