use async_trait::async_trait;
use common_kafka::kafka_consumer::{AckErr, InboundMessage};
use thiserror::Error;
use tracing::error;

use crate::metrics_consts::{MESSAGES_ACKED, MESSAGES_NACKED, SETTLE_FAILED};

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error(transparent)]
    Kafka(#[from] AckErr),
    #[error("{0}")]
    Other(String),
}

/// A message handed to the accumulator. Settling it consumes the handle, so
/// every delivery is acked or nacked exactly once.
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    fn payload(&self) -> &[u8];

    fn redelivery_count(&self) -> u32;

    async fn ack(self) -> Result<(), DeliveryError>;

    /// Gives the message back to the broker for a later attempt.
    async fn nack(self) -> Result<(), DeliveryError>;
}

#[async_trait]
impl Delivery for InboundMessage {
    fn payload(&self) -> &[u8] {
        InboundMessage::payload(self)
    }

    fn redelivery_count(&self) -> u32 {
        InboundMessage::redelivery_count(self)
    }

    async fn ack(self) -> Result<(), DeliveryError> {
        Ok(InboundMessage::ack(self)?)
    }

    async fn nack(self) -> Result<(), DeliveryError> {
        Ok(InboundMessage::nack(self).await?)
    }
}

async fn ack<M: Delivery>(message: M) {
    if let Err(e) = message.ack().await {
        error!("failed to ack message: {}", e);
        metrics::counter!(SETTLE_FAILED, &[("action", "ack")]).increment(1);
        return;
    }
    metrics::counter!(MESSAGES_ACKED).increment(1);
}

async fn nack<M: Delivery>(message: M) {
    let redeliveries = message.redelivery_count();
    if let Err(e) = message.nack().await {
        error!(redeliveries, "failed to nack message: {}", e);
        metrics::counter!(SETTLE_FAILED, &[("action", "nack")]).increment(1);
        return;
    }
    metrics::counter!(MESSAGES_NACKED).increment(1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ack,
    Nack,
}

/// Settles a whole batch once every message in it has been decided. Storing an
/// offset moves the partition's watermark past every earlier message, so the
/// batch is settled in arrival order and only after its commit.
pub async fn settle_in_order<M: Delivery>(settlements: Vec<(M, Verdict)>) {
    for (message, verdict) in settlements {
        match verdict {
            Verdict::Ack => ack(message).await,
            Verdict::Nack => nack(message).await,
        }
    }
}
