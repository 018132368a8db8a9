use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};
use weather_common::types::Brand;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{BrandReport, Job};
use crate::metrics_consts::{
    BRAND_RUNS, ROWS_DELETED, ROWS_SKIPPED, ROWS_WRITTEN, RUN_ENDS, RUN_STARTS, RUN_TIME,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub brands_ok: usize,
    pub brands_failed: usize,
    pub rows: BrandReport,
}

/// Runs `job` for every brand concurrently and waits for all of them.
///
/// A failing brand is logged and counted without affecting the others. If any
/// brand fails with a fatal error, the first one is returned once every task
/// has finished.
pub async fn run_job(
    ctx: Arc<JobContext>,
    job: Arc<dyn Job>,
    brands: Vec<Brand>,
) -> Result<RunSummary, JobError> {
    let labels = vec![("job".to_string(), job.name().to_string())];
    let _run_time = common_metrics::timing_guard(RUN_TIME, &labels);
    common_metrics::inc(RUN_STARTS, &labels, 1);
    info!(job = job.name(), brands = brands.len(), "Starting run");

    let mut tasks = JoinSet::new();
    for brand in brands {
        let ctx = ctx.clone();
        let job = job.clone();
        let span = info_span!("brand", job = job.name(), brand = %brand.name);
        tasks.spawn(
            async move {
                let res = job.run_for_brand(&ctx, &brand).await;
                (brand.name, res)
            }
            .instrument(span),
        );
    }

    let mut summary = RunSummary::default();
    let mut fatal = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((brand, Ok(report))) => {
                info!(
                    job = job.name(),
                    brand = %brand,
                    deleted = report.deleted,
                    written = report.written,
                    skipped = report.skipped,
                    "Brand done"
                );
                metrics::counter!(BRAND_RUNS, "job" => job.name(), "outcome" => "ok").increment(1);
                summary.brands_ok += 1;
                summary.rows.add(report);
            }
            Ok((brand, Err(e))) => {
                error!(job = job.name(), brand = %brand, error = %e, "Brand failed");
                metrics::counter!(BRAND_RUNS, "job" => job.name(), "outcome" => "error")
                    .increment(1);
                summary.brands_failed += 1;
                if e.is_fatal() && fatal.is_none() {
                    fatal = Some(e);
                }
            }
            Err(e) => {
                error!(job = job.name(), error = %e, "Brand task panicked");
                metrics::counter!(BRAND_RUNS, "job" => job.name(), "outcome" => "panic")
                    .increment(1);
                summary.brands_failed += 1;
                fatal.get_or_insert(JobError::Panicked(e.to_string()));
            }
        }
    }

    common_metrics::inc(ROWS_WRITTEN, &labels, summary.rows.written);
    common_metrics::inc(ROWS_DELETED, &labels, summary.rows.deleted);
    common_metrics::inc(ROWS_SKIPPED, &labels, summary.rows.skipped);
    common_metrics::inc(RUN_ENDS, &labels, 1);

    match fatal {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}
