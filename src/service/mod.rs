//! Lifecycle of the two background workers: the price producer and the
//! alert evaluator.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::alerts::AlertEvaluator;
use crate::stream::producer::PriceStreamProducer;
use crate::stream::PriceTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub producer: ServiceState,
    pub evaluator: ServiceState,
}

struct Worker {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Worker {
    fn state(&self) -> ServiceState {
        if self.join.is_finished() {
            ServiceState::Stopped
        } else {
            ServiceState::Running
        }
    }

    async fn stop(mut self, timeout: Duration) {
        let _ = self.shutdown.send(true);
        match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(Ok(())) => info!(worker = self.name, "worker stopped"),
            Ok(Err(e)) => warn!(worker = self.name, error = %e, "worker ended abnormally"),
            Err(_) => {
                warn!(worker = self.name, timeout_secs = timeout.as_secs(), "worker did not stop in time, aborting");
                self.join.abort();
            }
        }
    }
}

fn state_of(slot: &Option<Worker>) -> ServiceState {
    slot.as_ref().map_or(ServiceState::Stopped, Worker::state)
}

fn is_running(slot: &Option<Worker>) -> bool {
    state_of(slot) == ServiceState::Running
}

#[derive(Default)]
struct Workers {
    producer: Option<Worker>,
    evaluator: Option<Worker>,
}

/// Starts and stops the producer and evaluator loops. Both calls are
/// idempotent and serialized against each other.
pub struct ServiceManager {
    producer: Arc<PriceStreamProducer>,
    evaluator: Arc<AlertEvaluator>,
    transport: Arc<dyn PriceTransport>,
    shutdown_timeout: Duration,
    workers: Mutex<Workers>,
}

impl ServiceManager {
    pub fn new(
        producer: Arc<PriceStreamProducer>,
        evaluator: Arc<AlertEvaluator>,
        transport: Arc<dyn PriceTransport>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            evaluator,
            transport,
            shutdown_timeout,
            workers: Mutex::new(Workers::default()),
        }
    }

    /// Start whichever worker is not running. A worker whose transport
    /// endpoint cannot be opened is logged and left stopped; the other one
    /// still starts.
    pub async fn start_services(&self) -> ServiceStatus {
        let mut workers = self.workers.lock().await;

        let publisher = if is_running(&workers.producer) {
            None
        } else {
            match self.transport.publisher().await {
                Ok(publisher) => Some(publisher),
                Err(e) => {
                    error!(error = %e, "could not open price publisher, producer not started");
                    None
                }
            }
        };

        let subscriber = if is_running(&workers.evaluator) {
            None
        } else {
            match self.transport.subscriber().await {
                Ok(subscriber) => Some(subscriber),
                Err(e) => {
                    error!(error = %e, "could not open price subscriber, evaluator not started");
                    None
                }
            }
        };

        if let Some(publisher) = publisher {
            let (shutdown, rx) = watch::channel(false);
            let join = tokio::spawn(Arc::clone(&self.producer).run(publisher, rx));
            workers.producer = Some(Worker { name: "producer", shutdown, join });
        }
        if let Some(subscriber) = subscriber {
            let (shutdown, rx) = watch::channel(false);
            let join = tokio::spawn(Arc::clone(&self.evaluator).run(subscriber, rx));
            workers.evaluator = Some(Worker { name: "evaluator", shutdown, join });
        }

        let status = ServiceStatus {
            producer: state_of(&workers.producer),
            evaluator: state_of(&workers.evaluator),
        };
        info!(?status, "services started");
        status
    }

    /// Signal both workers and wait up to the shutdown timeout for each,
    /// aborting stragglers.
    pub async fn stop_services(&self) {
        let mut workers = self.workers.lock().await;
        let producer = workers.producer.take();
        let evaluator = workers.evaluator.take();
        if producer.is_none() && evaluator.is_none() {
            return;
        }

        // signal both before waiting on either
        for worker in [&producer, &evaluator].into_iter().flatten() {
            let _ = worker.shutdown.send(true);
        }
        for worker in [producer, evaluator].into_iter().flatten() {
            worker.stop(self.shutdown_timeout).await;
        }
        info!("services stopped");
    }

    pub async fn status(&self) -> ServiceStatus {
        let workers = self.workers.lock().await;
        ServiceStatus {
            producer: state_of(&workers.producer),
            evaluator: state_of(&workers.evaluator),
        }
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        let workers = self.workers.get_mut();
        for worker in [workers.producer.take(), workers.evaluator.take()].into_iter().flatten() {
            worker.join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::cooldown::MemoryRateLimitStore;
    use crate::alerts::LogNotifier;
    use crate::market_data::{Quote, QuoteSource, SymbolMatch};
    use crate::persist::memory::MemoryStore;
    use crate::stream::memory::{MemoryBroker, MemoryTransport};
    use crate::stream::{PricePublisher, PriceSubscriber, TransportError};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    struct OneQuote;

    #[async_trait::async_trait]
    impl QuoteSource for OneQuote {
        async fn get_quote(&self, symbol: &str) -> Option<Quote> {
            Some(Quote { symbol: symbol.to_string(), price: dec!(10), fields: BTreeMap::new() })
        }
        async fn search_symbol(&self, _keywords: &str) -> Vec<SymbolMatch> {
            Vec::new()
        }
        async fn get_daily_series(&self, _symbol: &str, _compact: bool) -> Option<serde_json::Value> {
            None
        }
    }

    fn manager(transport: Arc<dyn PriceTransport>) -> (ServiceManager, Arc<PriceStreamProducer>) {
        let producer = Arc::new(PriceStreamProducer::new(Arc::new(OneQuote), Duration::from_secs(15)));
        let evaluator = Arc::new(AlertEvaluator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryRateLimitStore::new()),
            Arc::new(LogNotifier),
            Duration::from_secs(3600),
        ));
        let manager = ServiceManager::new(Arc::clone(&producer), evaluator, transport, Duration::from_secs(5));
        (manager, producer)
    }

    const RUNNING: ServiceStatus = ServiceStatus { producer: ServiceState::Running, evaluator: ServiceState::Running };
    const STOPPED: ServiceStatus = ServiceStatus { producer: ServiceState::Stopped, evaluator: ServiceState::Stopped };

    #[tokio::test(start_paused = true)]
    async fn test_double_start_runs_one_producer() {
        let broker = MemoryBroker::new();
        let (manager, producer) = manager(Arc::new(MemoryTransport::new(broker.clone(), "prices", "alerts")));
        producer.add_symbol("AAPL");

        assert_eq!(manager.start_services().await, RUNNING);
        assert_eq!(manager.start_services().await, RUNNING);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(broker.payloads("prices").len(), 1);

        manager.stop_services().await;
        assert_eq!(manager.status().await, STOPPED);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (manager, _) = manager(Arc::new(MemoryTransport::new(MemoryBroker::new(), "prices", "alerts")));
        manager.stop_services().await;

        manager.start_services().await;
        manager.stop_services().await;
        manager.stop_services().await;
        assert_eq!(manager.status().await, STOPPED);

        // and can come back
        assert_eq!(manager.start_services().await, RUNNING);
        manager.stop_services().await;
    }

    /// Publisher side of the broker is unreachable; subscribing works.
    struct NoPublisher(MemoryTransport);

    #[async_trait::async_trait]
    impl PriceTransport for NoPublisher {
        async fn publisher(&self) -> Result<Box<dyn PricePublisher>, TransportError> {
            Err(TransportError::Connection("broker unreachable".into()))
        }
        async fn subscriber(&self) -> Result<Box<dyn PriceSubscriber>, TransportError> {
            self.0.subscriber().await
        }
    }

    #[tokio::test]
    async fn test_failed_endpoint_leaves_only_that_worker_stopped() {
        let transport = NoPublisher(MemoryTransport::new(MemoryBroker::new(), "prices", "alerts"));
        let (manager, _) = manager(Arc::new(transport));

        let status = manager.start_services().await;
        assert_eq!(status.producer, ServiceState::Stopped);
        assert_eq!(status.evaluator, ServiceState::Running);

        manager.stop_services().await;
        assert_eq!(manager.status().await, STOPPED);
    }

    /// Publisher that panics on first use.
    struct PanickingPublisher;

    #[async_trait::async_trait]
    impl PricePublisher for PanickingPublisher {
        async fn publish(&self, _event: &crate::stream::PriceEvent) -> Result<(), TransportError> {
            panic!("publisher blew up");
        }
    }

    struct PanicOnPublish(MemoryTransport);

    #[async_trait::async_trait]
    impl PriceTransport for PanicOnPublish {
        async fn publisher(&self) -> Result<Box<dyn PricePublisher>, TransportError> {
            Ok(Box::new(PanickingPublisher))
        }
        async fn subscriber(&self) -> Result<Box<dyn PriceSubscriber>, TransportError> {
            self.0.subscriber().await
        }
    }

    #[tokio::test]
    async fn test_worker_panic_only_stops_that_worker() {
        let transport = PanicOnPublish(MemoryTransport::new(MemoryBroker::new(), "prices", "alerts"));
        let (manager, producer) = manager(Arc::new(transport));
        producer.add_symbol("AAPL");

        manager.start_services().await;
        for _ in 0..100 {
            if manager.status().await.producer == ServiceState::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = manager.status().await;
        assert_eq!(status.producer, ServiceState::Stopped);
        assert_eq!(status.evaluator, ServiceState::Running);

        // stop still cleans up the surviving worker
        manager.stop_services().await;
        assert_eq!(manager.status().await, STOPPED);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(RUNNING).unwrap();
        assert_eq!(json, serde_json::json!({"producer": "running", "evaluator": "running"}));
    }
}
