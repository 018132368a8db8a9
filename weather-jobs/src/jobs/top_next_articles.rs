use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clickhouse::{Client, Row};
use serde::Deserialize;
use sqlx::PgPool;
use weather_common::period::Period;
use weather_common::types::Brand;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{BrandReport, Job};
use crate::jobs::{avg_meta, count_to_i64, in_window};
use crate::rollup::{purge_before, MergeUpsert, RollupKey, RollupValues};
use crate::window::TimeWindow;

const TABLE: &str = "top_next_articles";
const RETENTION_DAYS: i64 = 2;
const NEXT_PER_ARTICLE: u64 = 10;

/// Which articles readers open next, from the referrer of each article view.
pub struct TopNextArticles;

#[derive(Debug, Clone, PartialEq, Row, Deserialize)]
pub struct Transition {
    pub initial_url: String,
    pub next_url: String,
    pub view_count: u64,
    pub avg_time_spent: f64,
    pub avg_reading_rate: f64,
}

pub async fn store(
    pool: &PgPool,
    brand: &str,
    period: DateTime<Utc>,
    rows: Vec<Transition>,
) -> Result<BrandReport, JobError> {
    let upsert = MergeUpsert::new(
        TABLE,
        &["initial_url", "next_url"],
        "view_count",
        &["avg_time_spent", "avg_reading_rate"],
    );
    let mut report = BrandReport::default();
    for row in rows {
        let keys = [RollupKey::Text(row.initial_url), RollupKey::Text(row.next_url)];
        let values = RollupValues {
            count: count_to_i64(row.view_count),
            averages: vec![row.avg_time_spent, row.avg_reading_rate],
        };
        report.record(upsert.execute(pool, brand, &keys, period, &values).await?);
    }
    Ok(report)
}

async fn fetch(
    client: &Client,
    brand: &str,
    window: &TimeWindow,
) -> Result<Vec<Transition>, JobError> {
    let sql = format!(
        "SELECT relevant_referrer AS initial_url, url AS next_url, count() AS view_count,
                {time_spent} AS avg_time_spent,
                {reading_rate} AS avg_reading_rate
         FROM lead_event
         WHERE brand = ? AND page_type = 'article'
           AND relevant_referrer != '' AND url != relevant_referrer
           AND {}
         GROUP BY relevant_referrer, url
         ORDER BY initial_url ASC, view_count DESC
         LIMIT {NEXT_PER_ARTICLE} BY initial_url",
        in_window("datetime"),
        time_spent = avg_meta("metas", "timeSpent"),
        reading_rate = avg_meta("metas", "readingRate")
    );
    let rows = client
        .query(&sql)
        .bind(brand)
        .bind(window.start_millis())
        .bind(window.end_millis())
        .fetch_all::<Transition>()
        .await?;
    Ok(rows)
}

#[async_trait]
impl Job for TopNextArticles {
    fn name(&self) -> &'static str {
        "top_next_articles"
    }

    async fn run_for_brand(
        &self,
        ctx: &JobContext,
        brand: &Brand,
    ) -> Result<BrandReport, JobError> {
        let cutoff = ctx.now - Duration::days(RETENTION_DAYS);
        let deleted = purge_before(&ctx.pool, TABLE, &brand.name, cutoff).await?;

        let window = TimeWindow::trailing(ctx.now, Duration::minutes(1));
        let rows = fetch(&ctx.analytics, &brand.name, &window).await?;
        let mut report = store(&ctx.pool, &brand.name, Period::Hour.truncate(ctx.now), rows).await?;
        report.deleted = deleted;
        Ok(report)
    }
}
