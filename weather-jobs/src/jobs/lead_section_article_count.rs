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
use crate::jobs::{avg_meta, count_to_i64, in_window};
use crate::rollup::{purge_before, MergeUpsert, RollupKey, RollupValues};
use crate::window::{Coverage, TimeWindow};

const TABLE: &str = "lead_section_article_count";

/// Distinct articles each lead read per section, by day.
pub struct LeadSectionArticleCount;

#[derive(Debug, Clone, PartialEq, Row, Deserialize)]
pub struct SectionAggregate {
    #[serde(with = "clickhouse::serde::uuid")]
    pub lead_uuid: Uuid,
    pub section: String,
    pub article_count: u64,
    pub avg_time_spent: f64,
    pub avg_reading_rate: f64,
}

fn upsert() -> MergeUpsert {
    MergeUpsert::new(
        TABLE,
        &["lead_uuid", "section"],
        "article_count",
        &["avg_time_spent", "avg_reading_rate"],
    )
}

pub async fn store(
    pool: &PgPool,
    brand: &str,
    period: DateTime<Utc>,
    rows: Vec<SectionAggregate>,
) -> Result<BrandReport, JobError> {
    let upsert = upsert();
    let mut report = BrandReport::default();
    for row in rows {
        let keys = [RollupKey::Uuid(row.lead_uuid), RollupKey::Text(row.section)];
        let values = RollupValues {
            count: count_to_i64(row.article_count),
            averages: vec![row.avg_time_spent, row.avg_reading_rate],
        };
        report.record(upsert.execute(pool, brand, &keys, period, &values).await?);
    }
    Ok(report)
}

// Sections come from the latest version of each page in the analytical log
async fn fetch(
    client: &Client,
    brand: &str,
    window: &TimeWindow,
) -> Result<Vec<SectionAggregate>, JobError> {
    let sql = format!(
        "SELECT le.lead_uuid AS lead_uuid, p.page_section AS section,
                uniqExact(le.url) AS article_count,
                {time_spent} AS avg_time_spent,
                {reading_rate} AS avg_reading_rate
         FROM lead_event AS le
         INNER JOIN (
             SELECT url AS page_url, argMax(section, datetime) AS page_section
             FROM page
             WHERE brand = ?
             GROUP BY url
         ) AS p ON p.page_url = le.url
         WHERE le.brand = ? AND p.page_section != '' AND {}
         GROUP BY le.lead_uuid, p.page_section",
        in_window("le.datetime"),
        time_spent = avg_meta("le.metas", "timeSpent"),
        reading_rate = avg_meta("le.metas", "readingRate")
    );
    let rows = client
        .query(&sql)
        .bind(brand)
        .bind(brand)
        .bind(window.start_millis())
        .bind(window.end_millis())
        .fetch_all::<SectionAggregate>()
        .await?;
    Ok(rows)
}

#[async_trait]
impl Job for LeadSectionArticleCount {
    fn name(&self) -> &'static str {
        "lead_section_article_count"
    }

    async fn run_for_brand(
        &self,
        ctx: &JobContext,
        brand: &Brand,
    ) -> Result<BrandReport, JobError> {
        let cutoff = ctx
            .now
            .checked_sub_months(Months::new(1))
            .unwrap_or(ctx.now - Duration::days(30));
        let deleted = purge_before(&ctx.pool, TABLE, &brand.name, cutoff).await?;

        let window = TimeWindow::trailing(ctx.now, Duration::minutes(1));
        let rows = fetch(&ctx.analytics, &brand.name, &window).await?;
        let mut report = store(&ctx.pool, &brand.name, Period::Day.truncate(ctx.now), rows).await?;
        report.deleted = deleted;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[sqlx::test(migrations = "../migrations")]
    async fn sections_are_counted_separately(db: PgPool) {
        let day = Utc.with_ymd_and_hms(2024, 10, 17, 0, 0, 0).unwrap();
        let lead = Uuid::now_v7();
        let row = |section: &str, article_count| SectionAggregate {
            lead_uuid: lead,
            section: section.to_string(),
            article_count,
            avg_time_spent: 20.0,
            avg_reading_rate: 0.5,
        };

        store(&db, "meteo-lyon", day, vec![row("orages", 2), row("canicule", 1)])
            .await
            .unwrap();
        store(&db, "meteo-lyon", day, vec![row("orages", 3)])
            .await
            .unwrap();

        let rows: Vec<(String, i64, f64)> = sqlx::query_as(
            "SELECT section, article_count, avg_time_spent FROM lead_section_article_count ORDER BY section",
        )
        .fetch_all(&db)
        .await
        .unwrap();
        assert_eq!(
            rows,
            vec![
                ("canicule".to_string(), 1, 20.0),
                // (20 + 20) / 5
                ("orages".to_string(), 5, 8.0),
            ]
        );
    }
}
