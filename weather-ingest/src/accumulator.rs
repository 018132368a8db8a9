use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use tokio::sync::Mutex;
use tracing::debug;

use crate::metrics_consts::{BATCH_SIZE, FLUSH_TRIGGER};

/// Receives every batch the accumulator cuts. Per-message outcomes are the
/// sink's business; the accumulator forgets a batch once it has been handed over.
#[async_trait]
pub trait BatchSink<M>: Send + Sync {
    async fn flush(&self, batch: Vec<M>);
}

/// Buffers messages until either `max_batch_size` of them are pending or
/// `max_wait` has elapsed. The buffer lock is held for the whole flush, so
/// batches never overlap and leave in arrival order.
pub struct BatchAccumulator<M, S> {
    buffer: Mutex<Vec<M>>,
    sink: S,
    max_batch_size: usize,
    max_wait: Duration,
    liveness: Option<HealthHandle>,
}

impl<M, S> BatchAccumulator<M, S>
where
    M: Send,
    S: BatchSink<M>,
{
    pub fn new(sink: S, max_batch_size: usize, max_wait: Duration) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            buffer: Mutex::new(Vec::with_capacity(max_batch_size)),
            sink,
            max_batch_size,
            max_wait,
            liveness: None,
        }
    }

    /// The timer reports on this handle after every tick.
    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn add_message(&self, message: M) {
        let mut buffer = self.buffer.lock().await;
        buffer.push(message);
        if buffer.len() >= self.max_batch_size {
            let batch = std::mem::replace(&mut *buffer, Vec::with_capacity(self.max_batch_size));
            self.hand_over(batch, "size").await;
        }
    }

    /// Flushes whatever is buffered, returning how many messages left.
    pub async fn flush_pending(&self) -> usize {
        self.flush_buffered("manual").await
    }

    pub async fn run_timer(&self) {
        loop {
            tokio::time::sleep(self.max_wait).await;
            self.flush_buffered("time").await;
            if let Some(liveness) = &self.liveness {
                liveness.report_healthy().await;
            }
        }
    }

    async fn flush_buffered(&self, trigger: &'static str) -> usize {
        let mut buffer = self.buffer.lock().await;
        if buffer.is_empty() {
            return 0;
        }
        let batch = std::mem::take(&mut *buffer);
        let len = batch.len();
        self.hand_over(batch, trigger).await;
        len
    }

    async fn hand_over(&self, batch: Vec<M>, trigger: &'static str) {
        debug!(trigger, size = batch.len(), "flushing batch");
        metrics::counter!(FLUSH_TRIGGER, &[("trigger", trigger)]).increment(1);
        metrics::histogram!(BATCH_SIZE).record(batch.len() as f64);
        self.sink.flush(batch).await;
    }
}
