use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
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

const TABLE: &str = "lead_engagement_metrics";

// Also the span a lead needs page_view_threshold events in to be tracked
const RETENTION_DAYS: i64 = 90;

/// Daily engagement of the leads active enough to be scored.
pub struct LeadEngagementMetrics {
    coverage: Coverage,
    upsert: MergeUpsert,
}

#[derive(Debug, Clone, PartialEq, Row, Deserialize)]
pub struct LeadAggregate {
    #[serde(with = "clickhouse::serde::uuid")]
    pub lead_uuid: Uuid,
    pub view_count: u64,
    pub avg_time_spent: f64,
    pub avg_reading_rate: f64,
}

impl LeadEngagementMetrics {
    pub fn new(coverage: Coverage) -> Self {
        Self {
            coverage,
            upsert: MergeUpsert::new(
                TABLE,
                &["lead_uuid"],
                "view_count",
                &["avg_time_spent", "avg_reading_rate"],
            ),
        }
    }

    pub async fn store(
        &self,
        pool: &PgPool,
        brand: &str,
        period: DateTime<Utc>,
        rows: Vec<LeadAggregate>,
    ) -> Result<BrandReport, JobError> {
        let mut report = BrandReport::default();
        for row in rows {
            let values = RollupValues {
                count: count_to_i64(row.view_count),
                averages: vec![row.avg_time_spent, row.avg_reading_rate],
            };
            let written = self
                .upsert
                .execute(pool, brand, &[RollupKey::Uuid(row.lead_uuid)], period, &values)
                .await?;
            report.record(written);
        }
        Ok(report)
    }
}

/// Activity in `window` of the leads with at least `threshold` events in the
/// 90 days up to the end of the window.
async fn fetch(
    client: &Client,
    brand: &Brand,
    window: &TimeWindow,
) -> Result<Vec<LeadAggregate>, JobError> {
    let sql = format!(
        "SELECT lead_uuid, count() AS view_count,
                {time_spent} AS avg_time_spent,
                {reading_rate} AS avg_reading_rate
         FROM lead_event
         WHERE brand = ? AND {}
           AND lead_uuid IN (
               SELECT lead_uuid
               FROM lead_event
               WHERE brand = ? AND {}
               GROUP BY lead_uuid
               HAVING count() >= ?
           )
         GROUP BY lead_uuid",
        in_window("datetime"),
        in_window("datetime"),
        time_spent = avg_meta("metas", "timeSpent"),
        reading_rate = avg_meta("metas", "readingRate")
    );
    let qualifying_since = window.end - Duration::days(RETENTION_DAYS);
    let rows = client
        .query(&sql)
        .bind(&brand.name)
        .bind(window.start_millis())
        .bind(window.end_millis())
        .bind(&brand.name)
        .bind(qualifying_since.timestamp_millis())
        .bind(window.end_millis())
        .bind(brand.page_view_threshold)
        .fetch_all::<LeadAggregate>()
        .await?;
    Ok(rows)
}

#[async_trait]
impl Job for LeadEngagementMetrics {
    fn name(&self) -> &'static str {
        if self.coverage.is_backfill() {
            "historical_lead_engagement_metrics"
        } else {
            "lead_engagement_metrics"
        }
    }

    async fn run_for_brand(
        &self,
        ctx: &JobContext,
        brand: &Brand,
    ) -> Result<BrandReport, JobError> {
        let mut report = BrandReport::default();
        // A backfill writes periods that would fall out of retention right away
        if !self.coverage.is_backfill() {
            let cutoff = ctx.now - Duration::days(RETENTION_DAYS);
            report.deleted = purge_before(&ctx.pool, TABLE, &brand.name, cutoff).await?;
        }

        for (window, period) in self.coverage.windows(ctx.now, Period::Day) {
            let rows = fetch(&ctx.analytics, brand, &window).await?;
            report.add(self.store(&ctx.pool, &brand.name, period, rows).await?);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[sqlx::test(migrations = "../migrations")]
    async fn leads_are_merged_per_day(db: PgPool) {
        let job = LeadEngagementMetrics::new(Coverage::LastMinute);
        let day = Utc.with_ymd_and_hms(2024, 10, 17, 0, 0, 0).unwrap();
        let lead = Uuid::now_v7();
        let other = Uuid::now_v7();

        for (view_count, avg_time_spent) in [(2, 30.0), (2, 10.0)] {
            job.store(
                &db,
                "meteo-lyon",
                day,
                vec![LeadAggregate {
                    lead_uuid: lead,
                    view_count,
                    avg_time_spent,
                    avg_reading_rate: 0.4,
                }],
            )
            .await
            .unwrap();
        }
        job.store(
            &db,
            "meteo-lyon",
            day,
            vec![LeadAggregate {
                lead_uuid: other,
                view_count: 1,
                avg_time_spent: 5.0,
                avg_reading_rate: 0.1,
            }],
        )
        .await
        .unwrap();

        let merged: (i64, f64, f64) = sqlx::query_as(
            "SELECT view_count, avg_time_spent, avg_reading_rate FROM lead_engagement_metrics WHERE lead_uuid = $1",
        )
        .bind(lead)
        .fetch_one(&db)
        .await
        .unwrap();
        // (30 + 10) / 4 and (0.4 + 0.4) / 4
        assert_eq!(merged, (4, 10.0, 0.2));

        let leads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lead_engagement_metrics")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(leads, 2);
    }
}
