use std::sync::{Arc, Weak};

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    message::{Header, Headers, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    ClientConfig, Message,
};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::kafka_producer::KafkaContext;
use crate::REDELIVERY_HEADER;

#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Received empty payload")]
    Empty,
    #[error("Failed to store offset of a poison pill: {0}")]
    Offset(#[from] OffsetErr),
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

#[derive(Debug, thiserror::Error)]
pub enum AckErr {
    #[error(transparent)]
    Offset(#[from] OffsetErr),
    #[error("failed to hand message back to the topic: {0}")]
    Redeliver(KafkaError),
    #[error("failed to hand message back to the topic (timeout)")]
    RedeliverCanceled,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: KafkaConfig,
        consumer_config: ConsumerConfig,
        producer: FutureProducer<KafkaContext>,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "enable.auto.commit",
                consumer_config.kafka_consumer_auto_commit.to_string(),
            )
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            );

        client_config.set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            producer,
            topic: consumer_config.kafka_consumer_topic,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Receives the next message. Empty payloads are acked here, they can never
    /// become valid.
    pub async fn recv(&self) -> Result<InboundMessage, RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            offset.store()?;
            return Err(RecvErr::Empty);
        };

        Ok(InboundMessage {
            payload: payload.to_vec(),
            key: message.key().map(|k| k.to_vec()),
            redelivery_count: message.headers().map(redelivery_count).unwrap_or(0),
            offset,
        })
    }
}

/// A message pulled from the topic. It must be acked or nacked, and both
/// consume it, so a handle is acted upon exactly once.
pub struct InboundMessage {
    payload: Vec<u8>,
    key: Option<Vec<u8>>,
    redelivery_count: u32,
    offset: Offset,
}

impl InboundMessage {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn redelivery_count(&self) -> u32 {
        self.redelivery_count
    }

    pub fn ack(self) -> Result<(), AckErr> {
        self.offset.store()?;
        Ok(())
    }

    /// Hands the payload back to the topic with a bumped redelivery count, then
    /// moves past the original offset.
    pub async fn nack(self) -> Result<(), AckErr> {
        let inner = self.offset.handle.upgrade().ok_or(OffsetErr::Gone)?;
        let count = (self.redelivery_count + 1).to_string();
        let headers = OwnedHeaders::new().insert(Header {
            key: REDELIVERY_HEADER,
            value: Some(count.as_str()),
        });
        let record = FutureRecord {
            topic: &inner.topic,
            key: self.key.as_deref(),
            payload: Some(self.payload.as_slice()),
            timestamp: None,
            partition: None,
            headers: Some(headers),
        };

        let delivery = inner
            .producer
            .send_result(record)
            .map_err(|(e, _)| AckErr::Redeliver(e))?;
        match delivery.await {
            Ok(Ok(_)) => {}
            Ok(Err((e, _))) => return Err(AckErr::Redeliver(e)),
            Err(_) => return Err(AckErr::RedeliverCanceled),
        }
        drop(inner);

        self.offset.store()?;
        Ok(())
    }
}

struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }
}

fn redelivery_count<H: Headers>(headers: &H) -> u32 {
    headers
        .iter()
        .find(|h| h.key == REDELIVERY_HEADER)
        .and_then(|h| h.value)
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_redelivery_header() {
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "trace_id",
                value: Some("abc"),
            })
            .insert(Header {
                key: REDELIVERY_HEADER,
                value: Some("3"),
            });
        assert_eq!(redelivery_count(&headers), 3);
    }

    #[test]
    fn missing_or_garbled_header_counts_as_first_delivery() {
        assert_eq!(redelivery_count(&OwnedHeaders::new()), 0);

        let garbled = OwnedHeaders::new().insert(Header {
            key: REDELIVERY_HEADER,
            value: Some("many"),
        });
        assert_eq!(redelivery_count(&garbled), 0);
    }
}
