//! Kafka-backed price transport.
//!
//! Events are keyed by symbol so per-symbol ordering follows the partition.
//! Offsets are committed manually after the evaluator has processed an event.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::config::Settings;
use crate::stream::{PriceEvent, PricePublisher, PriceSubscriber, PriceTransport, TransportError};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

pub struct KafkaTransport {
    config: ClientConfig,
    topic: String,
    group_id: String,
    offset_reset: String,
}

/// Base client config shared by producers and consumers, with optional SASL/TLS.
fn client_config(settings: &Settings) -> ClientConfig {
    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", &settings.kafka_bootstrap_servers);

    if let Some(proto) = &settings.kafka_security_protocol {
        // ex: SASL_SSL
        cfg.set("security.protocol", proto);
    }
    if let Some(mech) = &settings.kafka_sasl_mechanism {
        // ex: SCRAM-SHA-256
        cfg.set("sasl.mechanisms", mech);
    }
    if let Some(user) = &settings.kafka_sasl_username {
        cfg.set("sasl.username", user);
    }
    if let Some(pass) = &settings.kafka_sasl_password {
        cfg.set("sasl.password", pass);
    }
    cfg
}

impl KafkaTransport {
    pub fn new(settings: &Settings) -> Self {
        Self {
            config: client_config(settings),
            topic: settings.price_topic.clone(),
            group_id: settings.kafka_group_id.clone(),
            offset_reset: settings.kafka_offset_reset.clone(),
        }
    }

    // Client creation never touches the network, so ask for topic metadata to
    // find out whether the broker is actually there.
    async fn probe(&self) -> Result<(), TransportError> {
        let cfg = self.config.clone();
        let topic = self.topic.clone();
        tokio::task::spawn_blocking(move || {
            let probe: BaseConsumer = cfg
                .create()
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            probe
                .fetch_metadata(Some(&topic), PROBE_TIMEOUT)
                .map(|_| ())
                .map_err(|e| TransportError::Connection(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?
    }
}

#[async_trait]
impl PriceTransport for KafkaTransport {
    async fn publisher(&self) -> Result<Box<dyn PricePublisher>, TransportError> {
        self.probe().await?;
        let producer: FutureProducer = self
            .config
            .clone()
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        info!(topic = %self.topic, "kafka publisher ready");
        Ok(Box::new(KafkaPublisher {
            producer,
            topic: self.topic.clone(),
        }))
    }

    async fn subscriber(&self) -> Result<Box<dyn PriceSubscriber>, TransportError> {
        self.probe().await?;
        let consumer: StreamConsumer = self
            .config
            .clone()
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.offset_reset)
            .create()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        info!(topic = %self.topic, group = %self.group_id, "kafka subscriber ready");
        Ok(Box::new(KafkaSubscriber {
            consumer,
            pending: HashMap::new(),
        }))
    }
}

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

#[async_trait]
impl PricePublisher for KafkaPublisher {
    async fn publish(&self, event: &PriceEvent) -> Result<(), TransportError> {
        let payload = event.to_payload()?;
        let record = FutureRecord::to(&self.topic).key(&event.symbol).payload(&payload);

        match self.producer.send(record, SEND_TIMEOUT).await {
            Ok((partition, offset)) => {
                debug!(symbol = %event.symbol, partition, offset, "price event produced");
                Ok(())
            }
            Err((e, _msg)) => Err(TransportError::Send(e.to_string())),
        }
    }
}

pub struct KafkaSubscriber {
    consumer: StreamConsumer,
    /// Next offset to commit per (topic, partition).
    pending: HashMap<(String, i32), i64>,
}

#[async_trait]
impl PriceSubscriber for KafkaSubscriber {
    async fn next(&mut self) -> Result<PriceEvent, TransportError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        self.pending
            .insert((msg.topic().to_string(), msg.partition()), msg.offset() + 1);

        match msg.payload() {
            Some(payload) => PriceEvent::from_payload(payload),
            None => Err(TransportError::Decode("empty payload".into())),
        }
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), offset) in &self.pending {
            tpl.add_partition_offset(topic, *partition, Offset::Offset(*offset))
                .map_err(|e| TransportError::Commit(e.to_string()))?;
        }
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| TransportError::Commit(e.to_string()))?;
        self.pending.clear();
        Ok(())
    }
}
