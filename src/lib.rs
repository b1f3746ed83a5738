//! Portfolio price streaming and alert evaluation.
//!
//! A [`stream::producer::PriceStreamProducer`] polls a [`market_data::QuoteSource`]
//! for every tracked symbol and publishes [`stream::PriceEvent`]s onto a
//! [`stream::PriceTransport`]. An [`alerts::evaluator::AlertEvaluator`] consumes
//! those events, matches them against the alert rules held in a
//! [`persist::AlertStore`] and notifies at most once per alert per cooldown
//! window. [`service::ServiceManager`] owns both workers next to the HTTP server.

pub mod alerts;
pub mod api;
pub mod config;
pub mod market_data;
pub mod persist;
pub mod service;
pub mod stream;
pub mod telemetry;
