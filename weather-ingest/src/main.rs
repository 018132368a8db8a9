use std::{future::ready, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{routing::get, Router};
use common_kafka::{
    kafka_consumer::{InboundMessage, RecvErr, SingleTopicConsumer},
    kafka_producer::create_kafka_producer,
};
use common_metrics::{serve, setup_metrics_routes};
use health::HealthHandle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use weather_ingest::{
    accumulator::{BatchAccumulator, BatchSink},
    app_context::AppContext,
    committer::DualWriteCommitter,
    config::{Config, EntityKindName},
    enrich::GeoLocator,
    kinds::{EntityKind, LeadEventKind, PageKind, UserKind},
    metrics_consts::EMPTY_MESSAGES,
    store::PgStore,
};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "weather ingestion service"
}

fn start_health_liveness_server(
    config: &Config,
    context: Arc<AppContext>,
) -> anyhow::Result<JoinHandle<Result<(), std::io::Error>>> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(context.liveness.get_status())),
        );
    let router = setup_metrics_routes(router)?;
    let bind = config.bind();
    Ok(tokio::task::spawn(async move { serve(router, &bind).await }))
}

async fn consume<S>(
    consumer: SingleTopicConsumer,
    accumulator: Arc<BatchAccumulator<InboundMessage, S>>,
    liveness: HealthHandle,
) -> anyhow::Error
where
    S: BatchSink<InboundMessage> + 'static,
{
    loop {
        liveness.report_healthy().await;
        match consumer.recv().await {
            Ok(message) => accumulator.add_message(message).await,
            Err(RecvErr::Empty) => {
                warn!("Received empty message");
                metrics::counter!(EMPTY_MESSAGES).increment(1);
            }
            Err(RecvErr::Offset(e)) => {
                error!("Failed to store offset of an empty message: {}", e);
            }
            // If kafka's down, we're down
            Err(RecvErr::Kafka(e)) => return anyhow::Error::new(e).context("kafka recv failed"),
        }
    }
}

async fn run<K: EntityKind>(
    config: Config,
    context: Arc<AppContext>,
    consumer: SingleTopicConsumer,
    committer: DualWriteCommitter<K>,
) -> anyhow::Result<()> {
    let accumulator = Arc::new(
        BatchAccumulator::new(committer, config.batch_size(), config.max_wait())
            .with_liveness(context.worker_liveness.clone()),
    );
    info!(
        kind = K::NAME,
        batch_size = config.batch_size(),
        max_wait_ms = config.max_wait_ms,
        "Accumulating batches"
    );

    let server = start_health_liveness_server(&config, context.clone())?;
    let timer = tokio::spawn({
        let accumulator = accumulator.clone();
        async move { accumulator.run_timer().await }
    });
    let consumer = tokio::spawn(consume(
        consumer,
        accumulator.clone(),
        context.worker_liveness.clone(),
    ));

    let res = tokio::select! {
        res = server => match res {
            Ok(Ok(())) => Err(anyhow::anyhow!("health server exited")),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("health server failed")),
            Err(e) => Err(anyhow::Error::new(e).context("health server panicked")),
        },
        res = timer => Err(anyhow::anyhow!("flush timer exited: {:?}", res)),
        res = consumer => match res {
            Ok(e) => Err(e),
            Err(e) => Err(anyhow::Error::new(e).context("consumer panicked")),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };

    let flushed = accumulator.flush_pending().await;
    info!(flushed, "Flushed pending messages");
    res
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_with_defaults().expect("failed to load configuration from env");
    let kind = config.entity_kind;

    let context = Arc::new(AppContext::new(&config).await?);

    let kafka_liveness = context
        .liveness
        .register("rdkafka", Duration::from_secs(30))
        .await;
    let producer = create_kafka_producer(&config.kafka, kafka_liveness).await?;
    let consumer =
        SingleTopicConsumer::new(config.kafka.clone(), config.consumer.clone(), producer)?;
    info!(
        kind = kind.as_str(),
        "Subscribed to topic: {}", config.consumer.kafka_consumer_topic
    );

    let analytics = Arc::new(context.analytics.clone());
    let relational = Arc::new(PgStore::new(context.pool.clone()));
    match kind {
        EntityKindName::Page => {
            let committer = DualWriteCommitter::new(PageKind, relational, analytics);
            run(config, context, consumer, committer).await
        }
        EntityKindName::User => {
            let committer = DualWriteCommitter::new(UserKind, relational, analytics);
            run(config, context, consumer, committer).await
        }
        EntityKindName::LeadEvent => {
            let geo: Arc<dyn GeoLocator> = context
                .geo
                .clone()
                .context("lead events need a geoip database")?;
            let committer = DualWriteCommitter::analytical_only(LeadEventKind::new(geo), analytics);
            run(config, context, consumer, committer).await
        }
    }
}
