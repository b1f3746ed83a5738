//! Consumes price events and fires alert notifications.
//!
//! Every asset holding the event's symbol is evaluated, whichever user owns
//! it; alerts are scoped to assets, not to the caller that created them.
//!
//! A notification is followed by a cooldown marker only when dispatch
//! succeeded, so a failed send is retried on the next qualifying price
//! instead of being silenced for the whole window. The check-then-set is not
//! atomic, which is fine with a single evaluator per topic.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::cooldown::{cooldown_key, RateLimitError, RateLimitStore};
use crate::alerts::notifier::{Notifier, NotifyError};
use crate::alerts::rules;
use crate::persist::{Alert, AlertId, AlertStore, Asset, StoreError};
use crate::stream::{PriceEvent, PriceSubscriber, TransportError};

const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

/// Tally for one processed price event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationReport {
    pub assets: usize,
    pub alerts: usize,
    pub notified: usize,
    pub suppressed: usize,
    pub failed: usize,
}

enum Outcome {
    Quiet,
    Notified,
    Suppressed,
    DispatchFailed,
}

pub fn alert_message(symbol: &str, price: Decimal, alert: &Alert) -> String {
    format!(
        "Alert for {symbol}: Current price ${price} has triggered your {} alert (threshold: {}).",
        alert.alert_type, alert.threshold_value
    )
}

pub struct AlertEvaluator {
    store: Arc<dyn AlertStore>,
    limiter: Arc<dyn RateLimitStore>,
    notifier: Arc<dyn Notifier>,
    cooldown: Duration,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        limiter: Arc<dyn RateLimitStore>,
        notifier: Arc<dyn Notifier>,
        cooldown: Duration,
    ) -> Self {
        Self { store, limiter, notifier, cooldown }
    }

    /// Evaluate every active alert on every asset holding `event.symbol`.
    /// Store and rate-limit failures abort the event; dispatch failures do not.
    #[instrument(skip(self), fields(symbol = %event.symbol, price = %event.price))]
    pub async fn process_event(&self, event: &PriceEvent) -> Result<EvaluationReport, EvaluatorError> {
        let mut report = EvaluationReport::default();
        if event.symbol.trim().is_empty() || event.price <= Decimal::ZERO {
            debug!("ignoring price event without symbol or price");
            return Ok(report);
        }

        let assets = self.store.assets_by_symbol(&event.symbol).await?;
        report.assets = assets.len();

        for asset in &assets {
            let alerts = self.store.active_alerts_for_asset(asset.id).await?;
            report.alerts += alerts.len();

            for alert in &alerts {
                match self.check_alert(alert, asset, event).await? {
                    Outcome::Quiet => {}
                    Outcome::Notified => report.notified += 1,
                    Outcome::Suppressed => report.suppressed += 1,
                    Outcome::DispatchFailed => report.failed += 1,
                }
            }
        }
        Ok(report)
    }

    async fn check_alert(&self, alert: &Alert, asset: &Asset, event: &PriceEvent) -> Result<Outcome, EvaluatorError> {
        if !rules::is_triggered(alert, asset, event.price) {
            return Ok(Outcome::Quiet);
        }

        let key = cooldown_key(alert.id);
        if self.limiter.exists(&key).await? {
            debug!(alert_id = alert.id, "alert in cooldown, suppressed");
            metrics::counter!("stockpulse_alerts_suppressed_total").increment(1);
            return Ok(Outcome::Suppressed);
        }

        let message = alert_message(&event.symbol, event.price, alert);
        match self.dispatch(alert, asset, &message).await {
            Ok(()) => {
                self.limiter.set_with_ttl(&key, "1", self.cooldown).await?;
                info!(alert_id = alert.id, asset_id = asset.id, method = %alert.notification_method, "alert triggered");
                metrics::counter!("stockpulse_alerts_triggered_total").increment(1);
                Ok(Outcome::Notified)
            }
            Err(e) => {
                warn!(alert_id = alert.id, error = %e, "alert notification failed");
                metrics::counter!("stockpulse_notification_failures_total").increment(1);
                Ok(Outcome::DispatchFailed)
            }
        }
    }

    async fn dispatch(&self, alert: &Alert, asset: &Asset, message: &str) -> Result<(), NotifyError> {
        let recipient = match self.store.recipient_for_portfolio(asset.portfolio_id).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => return Err(NotifyError::Recipient(asset.portfolio_id.to_string())),
            Err(e) => return Err(NotifyError::Recipient(format!("{}: {e}", asset.portfolio_id))),
        };
        self.notifier
            .dispatch(alert.notification_method, &recipient, message)
            .await
    }

    /// `None` when the alert does not exist, otherwise whether it is cooling down.
    pub async fn cooldown_status(&self, alert_id: AlertId) -> Result<Option<bool>, EvaluatorError> {
        if self.store.alert_by_id(alert_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.limiter.exists(&cooldown_key(alert_id)).await?))
    }

    /// Consume until `shutdown` flips to true or its sender is dropped. Each
    /// event is committed after processing, whether or not processing failed.
    pub async fn run(self: Arc<Self>, mut subscriber: Box<dyn PriceSubscriber>, mut shutdown: watch::Receiver<bool>) {
        info!(cooldown_secs = self.cooldown.as_secs(), "alert evaluator started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = subscriber.next() => received,
            };

            match received {
                Ok(event) => {
                    metrics::counter!("stockpulse_price_events_consumed_total").increment(1);
                    match self.process_event(&event).await {
                        Ok(report) => debug!(symbol = %event.symbol, ?report, "price event evaluated"),
                        Err(e) => error!(symbol = %event.symbol, error = %e, "failed to process price event"),
                    }
                }
                Err(TransportError::Decode(reason)) => {
                    warn!(%reason, "skipping undecodable price event");
                }
                Err(TransportError::ChannelClosed) => {
                    warn!("price stream closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "price stream receive failed, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                    }
                    continue;
                }
            }

            if let Err(e) = subscriber.commit().await {
                warn!(error = %e, "failed to commit price stream position");
            }
        }
        info!("alert evaluator stopped");
    }
}
