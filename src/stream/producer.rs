// Price stream producer: polls quotes for tracked symbols and publishes price events

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::market_data::QuoteSource;
use crate::stream::{PriceEvent, PricePublisher};

/// Set of symbols the producer polls. Writers are API handlers; the producer
/// only ever iterates a cloned snapshot.
#[derive(Default)]
pub struct TrackedSymbols {
    inner: RwLock<BTreeSet<String>>,
}

impl TrackedSymbols {
    /// Returns true if the symbol was not tracked before. Blank symbols are ignored.
    pub fn add(&self, symbol: &str) -> bool {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return false;
        }
        self.inner.write().insert(symbol.to_string())
    }

    /// Returns true if the symbol was tracked.
    pub fn remove(&self, symbol: &str) -> bool {
        self.inner.write().remove(symbol.trim())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.inner.read().iter().cloned().collect()
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub tracked: usize,
    pub published: usize,
    pub failed: usize,
}

pub struct PriceStreamProducer {
    symbols: TrackedSymbols,
    quotes: Arc<dyn QuoteSource>,
    poll_interval: Duration,
}

impl PriceStreamProducer {
    pub fn new(quotes: Arc<dyn QuoteSource>, poll_interval: Duration) -> Self {
        Self {
            symbols: TrackedSymbols::default(),
            quotes,
            poll_interval,
        }
    }

    pub fn add_symbol(&self, symbol: &str) -> bool {
        let added = self.symbols.add(symbol);
        if added {
            info!(symbol = symbol.trim(), "tracking symbol");
        }
        added
    }

    pub fn remove_symbol(&self, symbol: &str) -> bool {
        let removed = self.symbols.remove(symbol);
        if removed {
            info!(symbol = symbol.trim(), "stopped tracking symbol");
        }
        removed
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.symbols.snapshot()
    }

    /// Poll every tracked symbol once and publish one event per quote obtained.
    pub async fn run_cycle(&self, publisher: &dyn PricePublisher) -> CycleReport {
        self.cycle(publisher, None).await
    }

    #[instrument(level = "debug", skip_all)]
    async fn cycle(&self, publisher: &dyn PricePublisher, stop: Option<&watch::Receiver<bool>>) -> CycleReport {
        let symbols = self.symbols.snapshot();
        let mut report = CycleReport {
            tracked: symbols.len(),
            ..CycleReport::default()
        };

        for symbol in symbols {
            if stop.is_some_and(|rx| *rx.borrow()) {
                debug!("stop requested mid-cycle");
                break;
            }

            let Some(quote) = self.quotes.get_quote(&symbol).await else {
                debug!(symbol = %symbol, "no quote this cycle");
                metrics::counter!("stockpulse_quote_failures_total").increment(1);
                report.failed += 1;
                continue;
            };

            let event = PriceEvent::new(symbol, quote.price, Utc::now().timestamp());
            match publisher.publish(&event).await {
                Ok(()) => {
                    debug!(symbol = %event.symbol, price = %event.price, "published price update");
                    metrics::counter!("stockpulse_price_events_published_total").increment(1);
                    report.published += 1;
                }
                Err(e) => {
                    warn!(symbol = %event.symbol, error = %e, "failed to publish price update");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Poll on a fixed cadence until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self: Arc<Self>, publisher: Box<dyn PricePublisher>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.poll_interval.as_secs(), "price stream producer started");

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {}
                _ = ticker.tick() => {
                    let report = self.cycle(publisher.as_ref(), Some(&shutdown)).await;
                    debug!(?report, "poll cycle finished");
                }
            }
            if shutdown.has_changed().is_err() {
                break;
            }
        }
        info!("price stream producer stopped");
    }
}
