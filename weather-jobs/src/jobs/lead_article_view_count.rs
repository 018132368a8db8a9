use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use clickhouse::{Client, Row};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;
use weather_common::period::Period;
use weather_common::types::Brand;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{BrandReport, Job};
use crate::jobs::{count_to_i64, in_window};
use crate::rollup::{purge_before, MergeUpsert, RollupKey, RollupValues};
use crate::window::TimeWindow;

const TABLE: &str = "lead_article_view_count";

/// Article views per lead and day, summed.
pub struct LeadArticleViewCount;

#[derive(Debug, Clone, PartialEq, Row, Deserialize)]
pub struct LeadViews {
    #[serde(with = "clickhouse::serde::uuid")]
    pub lead_uuid: Uuid,
    pub view_count: u64,
}

/// Purges rows older than `cutoff` and adds `rows` to the day, all or
/// nothing.
pub async fn store(
    pool: &PgPool,
    brand: &str,
    cutoff: DateTime<Utc>,
    period: DateTime<Utc>,
    rows: Vec<LeadViews>,
) -> Result<BrandReport, JobError> {
    let upsert = MergeUpsert::new(TABLE, &["lead_uuid"], "view_count", &[]);
    let mut report = BrandReport::default();

    let mut tx = pool.begin().await?;
    report.deleted = purge_before(&mut *tx, TABLE, brand, cutoff).await?;
    for row in rows {
        let values = RollupValues {
            count: count_to_i64(row.view_count),
            averages: Vec::new(),
        };
        let written = upsert
            .execute(&mut *tx, brand, &[RollupKey::Uuid(row.lead_uuid)], period, &values)
            .await?;
        report.record(written);
    }
    tx.commit().await?;

    Ok(report)
}

async fn fetch(
    client: &Client,
    brand: &str,
    window: &TimeWindow,
) -> Result<Vec<LeadViews>, JobError> {
    let sql = format!(
        "SELECT lead_uuid, count() AS view_count
         FROM lead_event
         WHERE brand = ? AND page_type = 'article' AND {}
         GROUP BY lead_uuid",
        in_window("datetime")
    );
    let rows = client
        .query(&sql)
        .bind(brand)
        .bind(window.start_millis())
        .bind(window.end_millis())
        .fetch_all::<LeadViews>()
        .await?;
    Ok(rows)
}

#[async_trait]
impl Job for LeadArticleViewCount {
    fn name(&self) -> &'static str {
        "lead_article_view_count"
    }

    async fn run_for_brand(
        &self,
        ctx: &JobContext,
        brand: &Brand,
    ) -> Result<BrandReport, JobError> {
        let window = TimeWindow::trailing(ctx.now, Duration::minutes(1));
        let rows = fetch(&ctx.analytics, &brand.name, &window).await?;

        let cutoff = ctx
            .now
            .checked_sub_months(Months::new(3))
            .unwrap_or(ctx.now - Duration::days(90));
        store(
            &ctx.pool,
            &brand.name,
            cutoff,
            Period::Day.truncate(ctx.now),
            rows,
        )
        .await
    }
}
