// Source: https://www.alphavantage.co/documentation/
// Every value Alpha Vantage returns is a string, including prices.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field holding the latest traded price inside a `Global Quote` object.
pub const PRICE_FIELD: &str = "05. price";
pub const DAILY_SERIES_KEY: &str = "Time Series (Daily)";

// GET ?function=GLOBAL_QUOTE&symbol=...
#[derive(Debug, Deserialize)]
pub struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote", default)]
    pub global_quote: Option<BTreeMap<String, String>>,
}

// GET ?function=SYMBOL_SEARCH&keywords=...
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "bestMatches", default)]
    pub best_matches: Vec<SymbolMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMatch {
    #[serde(rename(deserialize = "1. symbol"))]
    pub symbol: String,
    #[serde(rename(deserialize = "2. name"), default)]
    pub name: String,
    #[serde(rename(deserialize = "3. type"), default)]
    pub kind: String,
    #[serde(rename(deserialize = "4. region"), default)]
    pub region: String,
    #[serde(rename(deserialize = "8. currency"), default)]
    pub currency: String,
    #[serde(rename(deserialize = "9. matchScore"), default)]
    pub match_score: String,
}
