// Shared trait + types for quote source adapters

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

pub use alpha_vantage_types::SymbolMatch;

/// Snapshot of a symbol's current price plus the raw upstream fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub fields: BTreeMap<String, String>,
}

/// Capability over an external market data API.
///
/// Upstream failures (transport errors, non-200 responses, rate-limit notices,
/// malformed payloads) are reported as "no data", never as errors.
#[async_trait::async_trait]
pub trait QuoteSource: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Option<Quote>;
    async fn search_symbol(&self, keywords: &str) -> Vec<SymbolMatch>;
    async fn get_daily_series(&self, symbol: &str, compact: bool) -> Option<serde_json::Value>;
}

pub mod alpha_vantage;
pub mod alpha_vantage_types;
