//! HTTP control plane: symbol tracking, worker status, quote lookups and
//! alert cooldown inspection.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::alerts::AlertEvaluator;
use crate::market_data::QuoteSource;
use crate::service::ServiceManager;
use crate::stream::producer::PriceStreamProducer;

mod error;
pub mod handlers;

pub use error::ApiError;

pub struct AppState {
    pub producer: Arc<PriceStreamProducer>,
    pub quotes: Arc<dyn QuoteSource>,
    pub evaluator: Arc<AlertEvaluator>,
    pub services: Arc<ServiceManager>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/price-stream/track", post(handlers::track))
        .route("/api/price-stream/untrack", post(handlers::untrack))
        .route("/api/price-stream/status", get(handlers::status))
        .route("/api/stocks/search", get(handlers::search))
        .route("/api/stocks/quote/:symbol", get(handlers::quote))
        .route("/api/stocks/daily/:symbol", get(handlers::daily))
        .route("/api/alerts/:id/cooldown", get(handlers::cooldown))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
