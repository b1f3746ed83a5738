use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::{ApiError, AppState};
use crate::market_data::{Quote, SymbolMatch};
use crate::persist::AlertId;
use crate::service::ServiceStatus;

#[derive(Debug, Deserialize)]
pub struct SymbolRequest {
    pub symbol: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub tracked_symbols: Vec<String>,
    pub services: ServiceStatus,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

fn default_compact() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    #[serde(default = "default_compact")]
    pub compact: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CooldownResponse {
    pub alert_id: AlertId,
    pub cooling_down: bool,
}

fn required_symbol(symbol: &str) -> Result<&str, ApiError> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(ApiError::bad_request("symbol must not be empty"));
    }
    Ok(symbol)
}

/// GET /health
pub async fn health() -> Json<MessageResponse> {
    Json(MessageResponse { message: "ok".into() })
}

/// POST /api/price-stream/track
pub async fn track(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SymbolRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let symbol = required_symbol(&req.symbol)?;
    state.producer.add_symbol(symbol);
    Ok(Json(MessageResponse { message: format!("Now tracking {symbol}") }))
}

/// POST /api/price-stream/untrack
pub async fn untrack(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SymbolRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let symbol = required_symbol(&req.symbol)?;
    state.producer.remove_symbol(symbol);
    Ok(Json(MessageResponse { message: format!("Stopped tracking {symbol}") }))
}

/// GET /api/price-stream/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        tracked_symbols: state.producer.tracked_symbols(),
        services: state.services.status().await,
    })
}

/// GET /api/stocks/search?query=
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SymbolMatch>>, ApiError> {
    let keywords = query.query.trim();
    if keywords.is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }
    Ok(Json(state.quotes.search_symbol(keywords).await))
}

/// GET /api/stocks/quote/:symbol
pub async fn quote(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Quote>, ApiError> {
    state
        .quotes
        .get_quote(&symbol)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No data found for symbol {symbol}")))
}

/// GET /api/stocks/daily/:symbol
pub async fn daily(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<DailyQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .quotes
        .get_daily_series(&symbol, query.compact)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No data found for symbol {symbol}")))
}

/// GET /api/alerts/:id/cooldown
pub async fn cooldown(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<AlertId>,
) -> Result<Json<CooldownResponse>, ApiError> {
    match state.evaluator.cooldown_status(alert_id).await {
        Ok(Some(cooling_down)) => Ok(Json(CooldownResponse { alert_id, cooling_down })),
        Ok(None) => Err(ApiError::not_found(format!("No alert {alert_id}"))),
        Err(e) => {
            error!(alert_id, error = %e, "cooldown lookup failed");
            Err(ApiError::internal("cooldown lookup failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::cooldown::MemoryRateLimitStore;
    use crate::alerts::{AlertEvaluator, LogNotifier, RateLimitStore};
    use crate::market_data::QuoteSource;
    use crate::persist::memory::MemoryStore;
    use crate::persist::{AlertKind, NotificationMethod};
    use crate::service::{ServiceManager, ServiceState};
    use crate::stream::memory::{MemoryBroker, MemoryTransport};
    use crate::stream::producer::PriceStreamProducer;
    use axum::http::StatusCode;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct StubQuotes;

    #[async_trait::async_trait]
    impl QuoteSource for StubQuotes {
        async fn get_quote(&self, symbol: &str) -> Option<Quote> {
            (symbol == "AAPL").then(|| Quote {
                symbol: "AAPL".into(),
                price: dec!(190.25),
                fields: BTreeMap::new(),
            })
        }
        async fn search_symbol(&self, keywords: &str) -> Vec<SymbolMatch> {
            vec![SymbolMatch {
                symbol: keywords.to_uppercase(),
                name: "Apple Inc".into(),
                kind: "Equity".into(),
                region: "United States".into(),
                currency: "USD".into(),
                match_score: "1.0000".into(),
            }]
        }
        async fn get_daily_series(&self, symbol: &str, compact: bool) -> Option<serde_json::Value> {
            (symbol == "AAPL").then(|| serde_json::json!({ "compact": compact }))
        }
    }

    struct Harness {
        state: Arc<AppState>,
        store: Arc<MemoryStore>,
        limiter: Arc<MemoryRateLimitStore>,
    }

    fn harness() -> Harness {
        let quotes: Arc<dyn QuoteSource> = Arc::new(StubQuotes);
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(MemoryRateLimitStore::new());
        let producer = Arc::new(PriceStreamProducer::new(Arc::clone(&quotes), Duration::from_secs(15)));
        let evaluator = Arc::new(AlertEvaluator::new(
            store.clone(),
            limiter.clone(),
            Arc::new(LogNotifier),
            Duration::from_secs(3600),
        ));
        let services = Arc::new(ServiceManager::new(
            Arc::clone(&producer),
            Arc::clone(&evaluator),
            Arc::new(MemoryTransport::new(MemoryBroker::new(), "prices", "alerts")),
            Duration::from_secs(5),
        ));
        Harness {
            state: Arc::new(AppState { producer, quotes, evaluator, services }),
            store,
            limiter,
        }
    }

    fn symbol(s: &str) -> Json<SymbolRequest> {
        Json(SymbolRequest { symbol: s.into() })
    }

    #[tokio::test]
    async fn test_track_untrack_and_status() {
        let h = harness();
        let Json(resp) = track(State(h.state.clone()), symbol("AAPL")).await.unwrap();
        assert_eq!(resp.message, "Now tracking AAPL");
        track(State(h.state.clone()), symbol("MSFT")).await.unwrap();

        let Json(resp) = untrack(State(h.state.clone()), symbol("MSFT")).await.unwrap();
        assert_eq!(resp.message, "Stopped tracking MSFT");
        // untracking something never tracked still succeeds
        untrack(State(h.state.clone()), symbol("TSLA")).await.unwrap();

        let Json(status) = status(State(h.state.clone())).await;
        assert_eq!(status.tracked_symbols, vec!["AAPL"]);
        assert_eq!(status.services.producer, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_track_rejects_empty_symbol() {
        let h = harness();
        let err = track(State(h.state.clone()), symbol("  ")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(h.state.producer.tracked_symbols().is_empty());
    }

    #[tokio::test]
    async fn test_quote_lookups() {
        let h = harness();
        let Json(q) = quote(State(h.state.clone()), Path("AAPL".into())).await.unwrap();
        assert_eq!(q.price, dec!(190.25));

        let err = quote(State(h.state.clone()), Path("NOPE".into())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.detail, "No data found for symbol NOPE");

        let Json(series) = daily(State(h.state.clone()), Path("AAPL".into()), Query(DailyQuery { compact: false }))
            .await
            .unwrap();
        assert_eq!(series["compact"], false);

        let Json(matches) = search(State(h.state.clone()), Query(SearchQuery { query: "aapl".into() }))
            .await
            .unwrap();
        assert_eq!(matches[0].symbol, "AAPL");

        let err = search(State(h.state.clone()), Query(SearchQuery { query: String::new() }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_daily_query_defaults_to_compact() {
        let q: DailyQuery = serde_json::from_str("{}").unwrap();
        assert!(q.compact);
    }

    #[tokio::test]
    async fn test_cooldown_endpoint() {
        let h = harness();
        let asset = h.store.add_asset(1, "AAPL", dec!(1), dec!(100));
        let alert = h.store.add_alert(asset.id, AlertKind::PriceAbove, dec!(150), NotificationMethod::Dashboard);

        let Json(resp) = cooldown(State(h.state.clone()), Path(alert.id)).await.unwrap();
        assert_eq!(resp, CooldownResponse { alert_id: alert.id, cooling_down: false });

        h.limiter
            .set_with_ttl(&crate::alerts::cooldown_key(alert.id), "1", Duration::from_secs(60))
            .await
            .unwrap();
        let Json(resp) = cooldown(State(h.state.clone()), Path(alert.id)).await.unwrap();
        assert!(resp.cooling_down);

        let err = cooldown(State(h.state.clone()), Path(999)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_router_builds() {
        let _ = crate::api::router(harness().state);
    }
}
