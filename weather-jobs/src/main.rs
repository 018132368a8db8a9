use std::{future::ready, sync::Arc, time::Duration};

use axum::{routing::get, Router};
use chrono::Utc;
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use health::{HealthHandle, HealthRegistry};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use weather_common::{analytics::ClickHouseStore, postgres::get_pool, postgres::list_brands};
use weather_jobs::{
    config::Config,
    context::JobContext,
    error::JobError,
    job::Job,
    jobs,
    runner::{run_job, RunSummary},
};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "weather aggregation jobs"
}

pub fn app(liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
}

async fn run_once(ctx: &JobContext, job: Arc<dyn Job>) -> Result<RunSummary, JobError> {
    let ctx = Arc::new(ctx.at(Utc::now()));
    let brands = list_brands(&ctx.pool).await?;
    run_job(ctx, job, brands).await
}

async fn schedule_loop(
    ctx: JobContext,
    job: Arc<dyn Job>,
    liveness: HealthHandle,
    interval: Duration,
) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match run_once(&ctx, job.clone()).await {
            Ok(summary) => info!(
                job = job.name(),
                brands_ok = summary.brands_ok,
                brands_failed = summary.brands_failed,
                "Run complete"
            ),
            Err(e) => error!(job = job.name(), "Run failed with: {}", e),
        }
        liveness.report_healthy().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let config = Config::init_from_env().expect("failed to load configuration from env");
    let job = jobs::build(config.job, &config)?;

    let pool = get_pool(&config.database_url, config.max_pg_connections).await?;
    let analytics = ClickHouseStore::new(&config.clickhouse).await?;
    let ctx = JobContext::new(pool, analytics.client().clone());

    let interval = match config.run_interval() {
        Some(_) if config.job.is_backfill() => {
            warn!(job = job.name(), "Backfills run once, ignoring RUN_INTERVAL_SECS");
            None
        }
        interval => interval,
    };

    let Some(interval) = interval else {
        let summary = run_once(&ctx, job.clone()).await?;
        info!(
            job = job.name(),
            brands_ok = summary.brands_ok,
            brands_failed = summary.brands_failed,
            written = summary.rows.written,
            deleted = summary.rows.deleted,
            "Run complete"
        );
        return Ok(());
    };

    let liveness = HealthRegistry::new("liveness");
    let job_liveness = liveness.register("job", interval * 4).await;
    info!(job = job.name(), every_secs = interval.as_secs(), "Scheduling job");

    let job_loop = tokio::spawn(schedule_loop(ctx, job, job_liveness, interval));

    let app = setup_metrics_routes(app(liveness))?;
    let bind = config.bind();
    let http_server = tokio::spawn(async move { serve(app, &bind).await });

    tokio::select! {
        res = job_loop => {
            error!("job loop exited");
            if let Err(e) = res {
                error!("job loop failed with: {}", e)
            }
        }
        res = http_server => {
            error!("http server exited");
            if let Err(e) = res {
                error!("server failed with: {}", e)
            }
        }
    }

    info!("exiting");
    Ok(())
}
