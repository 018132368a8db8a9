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

const TABLE: &str = "top_articles";
const RETENTION_DAYS: i64 = 2;

/// Hourly article audience with a recency weight, kept for the whole site,
/// per section and per sub section.
pub struct TopArticles;

#[derive(Debug, Clone, PartialEq, Row, Deserialize)]
pub struct TopArticleAggregate {
    pub url: String,
    pub section: String,
    // Empty without a sub section
    pub sub_section: String,
    pub view_count: u64,
    pub avg_time_spent: f64,
    pub avg_reading_rate: f64,
    pub recency_weight: f64,
}

impl TopArticleAggregate {
    /// The `(section, sub_section)` keys the row is written under, where an
    /// empty value means "all".
    pub fn granularities(&self) -> Vec<(String, String)> {
        let mut keys = vec![(String::new(), String::new())];
        if !self.section.is_empty() {
            keys.push((self.section.clone(), String::new()));
            if !self.sub_section.is_empty() {
                keys.push((self.section.clone(), self.sub_section.clone()));
            }
        }
        keys
    }
}

pub async fn store(
    pool: &PgPool,
    brand: &str,
    period: DateTime<Utc>,
    rows: Vec<TopArticleAggregate>,
) -> Result<BrandReport, JobError> {
    let upsert = MergeUpsert::new(
        TABLE,
        &["url", "section", "sub_section"],
        "view_count",
        &["avg_time_spent", "avg_reading_rate", "recency_weight"],
    );
    let mut report = BrandReport::default();
    for row in rows {
        let values = RollupValues {
            count: count_to_i64(row.view_count),
            averages: vec![row.avg_time_spent, row.avg_reading_rate, row.recency_weight],
        };
        for (section, sub_section) in row.granularities() {
            let keys = [
                RollupKey::Text(row.url.clone()),
                RollupKey::Text(section),
                RollupKey::Text(sub_section),
            ];
            report.record(upsert.execute(pool, brand, &keys, period, &values).await?);
        }
    }
    Ok(report)
}

// Each view weighs 1 / hours elapsed until `now`
async fn fetch(
    client: &Client,
    brand: &str,
    window: &TimeWindow,
    now: DateTime<Utc>,
) -> Result<Vec<TopArticleAggregate>, JobError> {
    let sql = format!(
        "SELECT le.url AS url, p.page_section AS section, p.page_sub_section AS sub_section,
                count() AS view_count,
                {time_spent} AS avg_time_spent,
                {reading_rate} AS avg_reading_rate,
                round(sumIf(3600 / seconds_ago, seconds_ago > 0), 2) AS recency_weight
         FROM (
             SELECT url, metas,
                    dateDiff('second', datetime, fromUnixTimestamp64Milli(toInt64(?))) AS seconds_ago
             FROM lead_event
             WHERE brand = ? AND page_type = 'article' AND {}
         ) AS le
         INNER JOIN (
             SELECT url AS page_url,
                    argMax(section, datetime) AS page_section,
                    argMax(ifNull(sub_section, ''), datetime) AS page_sub_section
             FROM page
             WHERE brand = ?
             GROUP BY url
         ) AS p ON p.page_url = le.url
         GROUP BY le.url, p.page_section, p.page_sub_section",
        in_window("datetime"),
        time_spent = avg_meta("le.metas", "timeSpent"),
        reading_rate = avg_meta("le.metas", "readingRate")
    );
    let rows = client
        .query(&sql)
        .bind(now.timestamp_millis())
        .bind(brand)
        .bind(window.start_millis())
        .bind(window.end_millis())
        .bind(brand)
        .fetch_all::<TopArticleAggregate>()
        .await?;
    Ok(rows)
}

#[async_trait]
impl Job for TopArticles {
    fn name(&self) -> &'static str {
        "top_articles"
    }

    async fn run_for_brand(
        &self,
        ctx: &JobContext,
        brand: &Brand,
    ) -> Result<BrandReport, JobError> {
        let cutoff = ctx.now - Duration::days(RETENTION_DAYS);
        let deleted = purge_before(&ctx.pool, TABLE, &brand.name, cutoff).await?;

        let window = TimeWindow::trailing(ctx.now, Duration::minutes(1));
        let rows = fetch(&ctx.analytics, &brand.name, &window, ctx.now).await?;
        let mut report = store(&ctx.pool, &brand.name, Period::Hour.truncate(ctx.now), rows).await?;
        report.deleted = deleted;
        Ok(report)
    }
}
