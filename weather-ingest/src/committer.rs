use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, warn};
use weather_common::analytics::AnalyticalSink;

use crate::{
    accumulator::BatchSink,
    detect::WriteDecision,
    kinds::{EntityKind, Enriched},
    message::{settle_in_order, Delivery, Verdict},
    metrics_consts::{
        ANALYTICAL_INSERT_FAILED, ANALYTICAL_ROWS_WRITTEN, BATCH_FLUSH_TIME, COMMIT_FAILED,
        MESSAGES_INVALID, MESSAGES_RECEIVED, MESSAGES_UNCHANGED, MESSAGE_PARSE_ERROR,
        RECORDS_WRITTEN, RECORD_WRITE_FAILED,
    },
    store::RelationalStore,
};

enum Rejected {
    /// Can never succeed, settled as processed.
    Drop,
    /// Might succeed on a later delivery.
    Retry,
}

impl Rejected {
    fn verdict(&self) -> Verdict {
        match self {
            Rejected::Drop => Verdict::Ack,
            Rejected::Retry => Verdict::Nack,
        }
    }
}

/// Messages of one batch in arrival order. `None` marks a message whose
/// verdict depends on how the batch commits.
type Pending<M> = Vec<(M, Option<Verdict>)>;

fn decide<M>(pending: Pending<M>, staged: Verdict) -> Vec<(M, Verdict)> {
    pending
        .into_iter()
        .map(|(message, verdict)| (message, verdict.unwrap_or(staged)))
        .collect()
}

/// Writes each batch into the relational store, then mirrors what was written
/// into the analytical store. Kinds without a relational copy use the
/// analytical append as their commit. No message is settled before the batch
/// is decided.
pub struct DualWriteCommitter<K: EntityKind> {
    kind: K,
    relational: Option<Arc<dyn RelationalStore<K::Record>>>,
    analytical: Arc<dyn AnalyticalSink<K::Row>>,
}

impl<K: EntityKind> DualWriteCommitter<K> {
    pub fn new(
        kind: K,
        relational: Arc<dyn RelationalStore<K::Record>>,
        analytical: Arc<dyn AnalyticalSink<K::Row>>,
    ) -> Self {
        Self {
            kind,
            relational: Some(relational),
            analytical,
        }
    }

    pub fn analytical_only(kind: K, analytical: Arc<dyn AnalyticalSink<K::Row>>) -> Self {
        Self {
            kind,
            relational: None,
            analytical,
        }
    }

    fn prepare<M: Delivery>(
        &self,
        message: &M,
    ) -> Result<Enriched<K::Record, K::Row>, Rejected> {
        let decoded: K::Message = match serde_json::from_slice(message.payload()) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(kind = K::NAME, "dropping malformed message: {}", e);
                metrics::counter!(MESSAGE_PARSE_ERROR, &[("kind", K::NAME)]).increment(1);
                return Err(Rejected::Drop);
            }
        };

        self.kind.enrich(decoded, Utc::now()).map_err(|e| {
            if e.is_permanent() {
                warn!(kind = K::NAME, "dropping invalid message: {}", e);
                metrics::counter!(MESSAGES_INVALID, &[("kind", K::NAME)]).increment(1);
                Rejected::Drop
            } else {
                error!(
                    kind = K::NAME,
                    redeliveries = message.redelivery_count(),
                    "enrichment failed: {}",
                    e
                );
                Rejected::Retry
            }
        })
    }

    async fn commit_relational<M: Delivery>(
        &self,
        store: &dyn RelationalStore<K::Record>,
        batch: Vec<M>,
    ) {
        let mut tx = match store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(kind = K::NAME, size = batch.len(), "failed to open transaction: {}", e);
                settle_in_order(batch.into_iter().map(|m| (m, Verdict::Nack)).collect()).await;
                return;
            }
        };

        let mut pending: Pending<M> = Vec::with_capacity(batch.len());
        let mut rows = Vec::new();
        for message in batch {
            let enriched = match self.prepare(&message) {
                Ok(enriched) => enriched,
                Err(rejected) => {
                    pending.push((message, Some(rejected.verdict())));
                    continue;
                }
            };

            let current = match tx.current(&enriched.record).await {
                Ok(current) => current,
                Err(e) => {
                    error!(kind = K::NAME, "failed to read current record: {}", e);
                    pending.push((message, Some(Verdict::Nack)));
                    continue;
                }
            };

            let decision = K::detect(current.as_ref(), &enriched.record);
            if decision == WriteDecision::Unchanged {
                metrics::counter!(MESSAGES_UNCHANGED, &[("kind", K::NAME)]).increment(1);
                pending.push((message, Some(Verdict::Ack)));
                continue;
            }

            if let Err(e) = tx.write(&enriched.record, decision).await {
                error!(kind = K::NAME, decision = decision.as_str(), "write failed: {}", e);
                metrics::counter!(RECORD_WRITE_FAILED, &[("kind", K::NAME)]).increment(1);
                pending.push((message, Some(Verdict::Nack)));
                continue;
            }
            metrics::counter!(
                RECORDS_WRITTEN,
                &[("kind", K::NAME), ("decision", decision.as_str())]
            )
            .increment(1);
            pending.push((message, None));
            rows.push(enriched.row);
        }

        if let Err(e) = tx.commit().await {
            error!(kind = K::NAME, staged = rows.len(), "commit failed: {}", e);
            metrics::counter!(COMMIT_FAILED, &[("kind", K::NAME)]).increment(1);
            settle_in_order(decide(pending, Verdict::Nack)).await;
            return;
        }

        let count = rows.len();
        if count > 0 {
            if let Err(e) = self.analytical.append(rows).await {
                // The relational commit is durable, redelivering would only hit the
                // unchanged path, so these rows are lost to the analytical store.
                error!(
                    kind = K::NAME,
                    rows = count,
                    "analytical insert failed after commit: {}",
                    e
                );
                metrics::counter!(ANALYTICAL_INSERT_FAILED, &[("kind", K::NAME)]).increment(1);
            } else {
                metrics::counter!(ANALYTICAL_ROWS_WRITTEN, &[("kind", K::NAME)])
                    .increment(count as u64);
            }
        }
        settle_in_order(decide(pending, Verdict::Ack)).await;
    }

    async fn commit_analytical<M: Delivery>(&self, batch: Vec<M>) {
        let mut pending: Pending<M> = Vec::with_capacity(batch.len());
        let mut rows = Vec::with_capacity(batch.len());
        for message in batch {
            match self.prepare(&message) {
                Ok(enriched) => {
                    pending.push((message, None));
                    rows.push(enriched.row);
                }
                Err(rejected) => pending.push((message, Some(rejected.verdict()))),
            }
        }

        let count = rows.len();
        let staged = if count == 0 {
            Verdict::Ack
        } else {
            match self.analytical.append(rows).await {
                Ok(()) => {
                    metrics::counter!(ANALYTICAL_ROWS_WRITTEN, &[("kind", K::NAME)])
                        .increment(count as u64);
                    Verdict::Ack
                }
                Err(e) => {
                    error!(kind = K::NAME, rows = count, "analytical insert failed: {}", e);
                    metrics::counter!(ANALYTICAL_INSERT_FAILED, &[("kind", K::NAME)]).increment(1);
                    Verdict::Nack
                }
            }
        };
        settle_in_order(decide(pending, staged)).await;
    }
}

#[async_trait]
impl<K, M> BatchSink<M> for DualWriteCommitter<K>
where
    K: EntityKind,
    M: Delivery,
{
    async fn flush(&self, batch: Vec<M>) {
        if batch.is_empty() {
            return;
        }
        metrics::counter!(MESSAGES_RECEIVED, &[("kind", K::NAME)]).increment(batch.len() as u64);
        let labels = [("kind".to_string(), K::NAME.to_string())];
        let timer = common_metrics::timing_guard(BATCH_FLUSH_TIME, &labels);

        match &self.relational {
            Some(store) => self.commit_relational(store.as_ref(), batch).await,
            None => self.commit_analytical(batch).await,
        }
        timer.fin();
    }
}
