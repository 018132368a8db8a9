pub mod config;
pub mod kafka_consumer;
pub mod kafka_producer;

/// Header carrying how many times a message was handed back to the broker.
pub const REDELIVERY_HEADER: &str = "redelivery_count";
