//! In-process broker for single-process mode.
//!
//! Each topic is an append-only log with bounded retention. Consumer groups
//! keep a committed offset in the broker, so a subscriber that is dropped and
//! recreated resumes at its last commit and sees uncommitted records again.
//! The log outlives any publisher or subscriber; it lives as long as the broker.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::stream::{PriceEvent, PricePublisher, PriceSubscriber, PriceTransport, TransportError};

pub const DEFAULT_RETENTION: usize = 10_000;

#[derive(Default)]
struct TopicLog {
    /// Offset of `records[0]`.
    base: u64,
    records: VecDeque<Vec<u8>>,
    committed: HashMap<String, u64>,
}

impl TopicLog {
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }
}

enum Read {
    Record(Vec<u8>),
    Empty,
    /// Requested offset was trimmed away; carries the oldest retained offset.
    Trimmed(u64),
}

pub struct MemoryBroker {
    topics: Mutex<HashMap<String, TopicLog>>,
    appended: watch::Sender<u64>,
    retention: usize,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Arc<Self> {
        let (appended, _) = watch::channel(0);
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            appended,
            retention: retention.max(1),
        })
    }

    /// Append a record and return its offset.
    pub fn append(&self, topic: &str, payload: Vec<u8>) -> u64 {
        let offset = {
            let mut topics = self.topics.lock();
            let log = topics.entry(topic.to_string()).or_default();
            log.records.push_back(payload);
            while log.records.len() > self.retention {
                log.records.pop_front();
                log.base += 1;
            }
            log.end() - 1
        };
        self.appended.send_modify(|n| *n += 1);
        offset
    }

    pub fn end_offset(&self, topic: &str) -> u64 {
        self.topics.lock().get(topic).map(TopicLog::end).unwrap_or(0)
    }

    pub fn committed(&self, topic: &str, group: &str) -> Option<u64> {
        self.topics.lock().get(topic)?.committed.get(group).copied()
    }

    /// Retained payloads of a topic, oldest first.
    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        self.topics
            .lock()
            .get(topic)
            .map(|log| log.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn commit(&self, topic: &str, group: &str, offset: u64) {
        let mut topics = self.topics.lock();
        let log = topics.entry(topic.to_string()).or_default();
        log.committed.insert(group.to_string(), offset);
    }

    /// Committed offset for the group, or the log end for a group seen for the
    /// first time (which is then committed so a restart resumes there).
    fn join(&self, topic: &str, group: &str) -> u64 {
        let mut topics = self.topics.lock();
        let log = topics.entry(topic.to_string()).or_default();
        let end = log.end();
        *log.committed.entry(group.to_string()).or_insert(end)
    }

    fn read(&self, topic: &str, offset: u64) -> Read {
        let topics = self.topics.lock();
        let Some(log) = topics.get(topic) else {
            return Read::Empty;
        };
        if offset < log.base {
            return Read::Trimmed(log.base);
        }
        match log.records.get((offset - log.base) as usize) {
            Some(payload) => Read::Record(payload.clone()),
            None => Read::Empty,
        }
    }
}

/// [`PriceTransport`] over a shared [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
    topic: String,
    group: String,
}

impl MemoryTransport {
    pub fn new(broker: Arc<MemoryBroker>, topic: &str, group: &str) -> Self {
        Self {
            broker,
            topic: topic.to_string(),
            group: group.to_string(),
        }
    }
}

#[async_trait]
impl PriceTransport for MemoryTransport {
    async fn publisher(&self) -> Result<Box<dyn PricePublisher>, TransportError> {
        Ok(Box::new(MemoryPublisher {
            broker: Arc::clone(&self.broker),
            topic: self.topic.clone(),
        }))
    }

    async fn subscriber(&self) -> Result<Box<dyn PriceSubscriber>, TransportError> {
        let position = self.broker.join(&self.topic, &self.group);
        debug!(topic = %self.topic, group = %self.group, position, "memory subscriber joined");
        Ok(Box::new(MemorySubscriber {
            broker: Arc::clone(&self.broker),
            appended: self.broker.appended.subscribe(),
            topic: self.topic.clone(),
            group: self.group.clone(),
            position,
        }))
    }
}

pub struct MemoryPublisher {
    broker: Arc<MemoryBroker>,
    topic: String,
}

#[async_trait]
impl PricePublisher for MemoryPublisher {
    async fn publish(&self, event: &PriceEvent) -> Result<(), TransportError> {
        let payload = event.to_payload()?;
        self.broker.append(&self.topic, payload);
        Ok(())
    }
}

pub struct MemorySubscriber {
    broker: Arc<MemoryBroker>,
    appended: watch::Receiver<u64>,
    topic: String,
    group: String,
    position: u64,
}

#[async_trait]
impl PriceSubscriber for MemorySubscriber {
    async fn next(&mut self) -> Result<PriceEvent, TransportError> {
        loop {
            // Mark the current append count as seen before reading, so an append
            // racing with the read still wakes `changed()` below.
            self.appended.borrow_and_update();
            match self.broker.read(&self.topic, self.position) {
                Read::Record(payload) => {
                    self.position += 1;
                    return PriceEvent::from_payload(&payload);
                }
                Read::Trimmed(base) => {
                    warn!(
                        topic = %self.topic,
                        group = %self.group,
                        skipped = base - self.position,
                        "subscriber fell behind retention, skipping ahead"
                    );
                    self.position = base;
                    continue;
                }
                Read::Empty => {}
            }
            if self.appended.changed().await.is_err() {
                return Err(TransportError::ChannelClosed);
            }
        }
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        self.broker.commit(&self.topic, &self.group, self.position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn transport(broker: &Arc<MemoryBroker>) -> MemoryTransport {
        MemoryTransport::new(Arc::clone(broker), "prices", "alerts")
    }

    #[tokio::test]
    async fn test_pubsub_in_order() {
        let broker = MemoryBroker::new();
        let transport = transport(&broker);
        let mut sub = transport.subscriber().await.unwrap();
        let publisher = transport.publisher().await.unwrap();

        publisher.publish(&PriceEvent::new("AAPL", dec!(1), 1)).await.unwrap();
        publisher.publish(&PriceEvent::new("AAPL", dec!(2), 2)).await.unwrap();

        assert_eq!(sub.next().await.unwrap().price, dec!(1));
        assert_eq!(sub.next().await.unwrap().price, dec!(2));
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let broker = MemoryBroker::new();
        let transport = transport(&broker);
        let mut sub = transport.subscriber().await.unwrap();
        let publisher = transport.publisher().await.unwrap();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(&PriceEvent::new("MSFT", dec!(300), 7)).await.unwrap();
        });

        let event = tokio::time::timeout(Duration::from_secs(2), sub.next()).await.unwrap().unwrap();
        assert_eq!(event.symbol, "MSFT");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_uncommitted_records_are_redelivered() {
        let broker = MemoryBroker::new();
        let transport = transport(&broker);
        let mut sub = transport.subscriber().await.unwrap();
        let publisher = transport.publisher().await.unwrap();
        for ts in 1..=3 {
            publisher.publish(&PriceEvent::new("AAPL", dec!(10), ts)).await.unwrap();
        }

        assert_eq!(sub.next().await.unwrap().timestamp, 1);
        sub.commit().await.unwrap();
        assert_eq!(sub.next().await.unwrap().timestamp, 2);
        drop(sub); // no commit for ts=2

        let mut sub = transport.subscriber().await.unwrap();
        assert_eq!(sub.next().await.unwrap().timestamp, 2);
        assert_eq!(broker.committed("prices", "alerts"), Some(1));
    }

    #[tokio::test]
    async fn test_log_survives_publisher_restart() {
        let broker = MemoryBroker::new();
        let transport = transport(&broker);
        let mut sub = transport.subscriber().await.unwrap();

        let first = transport.publisher().await.unwrap();
        first.publish(&PriceEvent::new("AAPL", dec!(1), 1)).await.unwrap();
        drop(first);
        let second = transport.publisher().await.unwrap();
        second.publish(&PriceEvent::new("AAPL", dec!(2), 2)).await.unwrap();

        assert_eq!(sub.next().await.unwrap().timestamp, 1);
        assert_eq!(sub.next().await.unwrap().timestamp, 2);
        assert_eq!(broker.end_offset("prices"), 2);
    }

    #[tokio::test]
    async fn test_new_group_starts_at_end() {
        let broker = MemoryBroker::new();
        broker.append("prices", PriceEvent::new("OLD", dec!(1), 1).to_payload().unwrap());

        let transport = transport(&broker);
        let mut sub = transport.subscriber().await.unwrap();
        broker.append("prices", PriceEvent::new("NEW", dec!(1), 2).to_payload().unwrap());

        assert_eq!(sub.next().await.unwrap().symbol, "NEW");
    }

    #[tokio::test]
    async fn test_decode_error_advances_position() {
        let broker = MemoryBroker::new();
        let transport = transport(&broker);
        let mut sub = transport.subscriber().await.unwrap();
        broker.append("prices", b"{garbage".to_vec());
        broker.append("prices", PriceEvent::new("AAPL", dec!(5), 1).to_payload().unwrap());

        assert!(matches!(sub.next().await, Err(TransportError::Decode(_))));
        assert_eq!(sub.next().await.unwrap().symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_retention_skips_trimmed_records() {
        let broker = MemoryBroker::with_retention(2);
        let transport = transport(&broker);
        let mut sub = transport.subscriber().await.unwrap();
        for ts in 1..=4 {
            broker.append("prices", PriceEvent::new("AAPL", dec!(1), ts).to_payload().unwrap());
        }

        assert_eq!(broker.payloads("prices").len(), 2);
        assert_eq!(sub.next().await.unwrap().timestamp, 3);
        assert_eq!(sub.next().await.unwrap().timestamp, 4);
    }
}
