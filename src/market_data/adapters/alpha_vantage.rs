// Alpha Vantage adapter: GLOBAL_QUOTE, SYMBOL_SEARCH and TIME_SERIES_DAILY over REST

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::alpha_vantage_types::{
    GlobalQuoteResponse, SearchResponse, SymbolMatch, DAILY_SERIES_KEY, PRICE_FIELD,
};
use super::{Quote, QuoteSource};

pub struct AlphaVantageClient {
    http: reqwest::Client,
    pub base_url: String, // "https://www.alphavantage.co/query"
    api_key: String,
}

impl AlphaVantageClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    // GET base_url with the given query params; None on any transport, status or body failure
    async fn query(&self, function: &str, params: &[(&str, &str)]) -> Option<Value> {
        let mut query: Vec<(&str, &str)> = vec![("function", function), ("apikey", &self.api_key)];
        query.extend_from_slice(params);

        let res = match self.http.get(&self.base_url).query(&query).send().await {
            Ok(res) => res,
            Err(e) => {
                warn!(function, error = %e, "quote api request failed");
                return None;
            }
        };

        if !res.status().is_success() {
            warn!(function, status = %res.status(), "quote api returned non-success status");
            return None;
        }

        match res.json::<Value>().await {
            Ok(body) => {
                if let Some(notice) = upstream_notice(&body) {
                    // rate limit / bad key notices come back as 200s
                    warn!(function, notice, "quote api returned a notice instead of data");
                    return None;
                }
                Some(body)
            }
            Err(e) => {
                warn!(function, error = %e, "quote api returned malformed json");
                None
            }
        }
    }
}

fn upstream_notice(body: &Value) -> Option<&str> {
    ["Note", "Information", "Error Message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
}

/// Extract a quote from a `GLOBAL_QUOTE` body. Missing or empty quote objects,
/// and prices that do not parse, yield `None`.
pub fn parse_global_quote(symbol: &str, body: Value) -> Option<Quote> {
    let response: GlobalQuoteResponse = serde_json::from_value(body).ok()?;
    let fields = response.global_quote.filter(|q| !q.is_empty())?;

    let raw_price = fields.get(PRICE_FIELD)?;
    let price = match Decimal::from_str(raw_price.trim()) {
        Ok(price) => price,
        Err(e) => {
            debug!(symbol, raw_price = raw_price.as_str(), error = %e, "unparseable quote price");
            return None;
        }
    };

    Some(Quote {
        symbol: symbol.to_string(),
        price,
        fields,
    })
}

pub fn parse_search(body: Value) -> Vec<SymbolMatch> {
    serde_json::from_value::<SearchResponse>(body)
        .map(|r| r.best_matches)
        .unwrap_or_default()
}

pub fn parse_daily_series(body: Value) -> Option<Value> {
    if body.get(DAILY_SERIES_KEY).is_some() {
        Some(body)
    } else {
        None
    }
}

#[async_trait::async_trait]
impl QuoteSource for AlphaVantageClient {
    #[instrument(skip(self))]
    async fn get_quote(&self, symbol: &str) -> Option<Quote> {
        let body = self.query("GLOBAL_QUOTE", &[("symbol", symbol)]).await?;
        parse_global_quote(symbol, body)
    }

    #[instrument(skip(self))]
    async fn search_symbol(&self, keywords: &str) -> Vec<SymbolMatch> {
        match self.query("SYMBOL_SEARCH", &[("keywords", keywords)]).await {
            Some(body) => parse_search(body),
            None => Vec::new(),
        }
    }

    #[instrument(skip(self))]
    async fn get_daily_series(&self, symbol: &str, compact: bool) -> Option<Value> {
        let output_size = if compact { "compact" } else { "full" };
        let body = self
            .query("TIME_SERIES_DAILY", &[("symbol", symbol), ("outputsize", output_size)])
            .await?;
        parse_daily_series(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn global_quote(price: &str) -> Value {
        json!({
            "Global Quote": {
                "01. symbol": "IBM",
                "02. open": "181.2000",
                "05. price": price,
                "06. volume": "3055611",
                "07. latest trading day": "2024-05-10"
            }
        })
    }

    #[test]
    fn test_parse_global_quote() {
        let quote = parse_global_quote("IBM", global_quote("182.4900")).unwrap();
        assert_eq!(quote.symbol, "IBM");
        assert_eq!(quote.price, dec!(182.49));
        assert_eq!(quote.fields.get("06. volume").map(String::as_str), Some("3055611"));
    }

    #[test]
    fn test_parse_global_quote_empty_section() {
        assert!(parse_global_quote("NOPE", json!({ "Global Quote": {} })).is_none());
        assert!(parse_global_quote("NOPE", json!({})).is_none());
    }

    #[test]
    fn test_parse_global_quote_bad_price() {
        assert!(parse_global_quote("IBM", global_quote("n/a")).is_none());
    }

    #[test]
    fn test_upstream_notice() {
        let body = json!({ "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute" });
        assert!(upstream_notice(&body).is_some());
        assert!(upstream_notice(&global_quote("1.0")).is_none());
    }

    #[test]
    fn test_parse_search() {
        let body = json!({
            "bestMatches": [
                {
                    "1. symbol": "TSCO.LON",
                    "2. name": "Tesco PLC",
                    "3. type": "Equity",
                    "4. region": "United Kingdom",
                    "8. currency": "GBX",
                    "9. matchScore": "0.7273"
                },
                { "1. symbol": "TSCDF" }
            ]
        });
        let matches = parse_search(body);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].name, "Tesco PLC");
        assert_eq!(matches[0].currency, "GBX");
        assert_eq!(matches[1].symbol, "TSCDF");
        assert!(matches[1].name.is_empty());

        assert!(parse_search(json!({ "Information": "bad key" })).is_empty());
    }

    #[test]
    fn test_search_match_serializes_plain_names() {
        let m = SymbolMatch {
            symbol: "IBM".into(),
            name: "International Business Machines".into(),
            kind: "Equity".into(),
            region: "United States".into(),
            currency: "USD".into(),
            match_score: "1.0000".into(),
        };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["symbol"], "IBM");
        assert_eq!(v["match_score"], "1.0000");
    }

    #[test]
    fn test_parse_daily_series() {
        let body = json!({
            "Meta Data": { "2. Symbol": "IBM" },
            "Time Series (Daily)": { "2024-05-10": { "4. close": "167.1500" } }
        });
        assert!(parse_daily_series(body).is_some());
        assert!(parse_daily_series(json!({ "Meta Data": {} })).is_none());
    }
}
