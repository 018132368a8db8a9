use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::debug;
use weather_common::period::Period;
use weather_common::types::Brand;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{BrandReport, Job};
use crate::jobs::{avg_meta, count_to_i64, in_window};
use crate::rollup::{MergeUpsert, RollupKey, RollupValues};
use crate::window::{Coverage, TimeWindow};

/// Hourly views, time spent and reading rate per article.
pub struct ArticleMetrics {
    coverage: Coverage,
    upsert: MergeUpsert,
}

#[derive(Debug, Clone, PartialEq, Row, Deserialize)]
pub struct ArticleAggregate {
    pub url: String,
    pub view_count: u64,
    pub avg_time_spent: f64,
    pub avg_reading_rate: f64,
}

impl ArticleMetrics {
    pub fn new(coverage: Coverage) -> Self {
        Self {
            coverage,
            upsert: MergeUpsert::new(
                "article_metrics",
                &["url"],
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
        rows: Vec<ArticleAggregate>,
    ) -> Result<BrandReport, JobError> {
        let mut report = BrandReport::default();
        for row in rows {
            let values = RollupValues {
                count: count_to_i64(row.view_count),
                averages: vec![row.avg_time_spent, row.avg_reading_rate],
            };
            let written = self
                .upsert
                .execute(pool, brand, &[RollupKey::Text(row.url)], period, &values)
                .await?;
            report.record(written);
        }
        Ok(report)
    }
}

async fn fetch(
    client: &Client,
    brand: &str,
    window: &TimeWindow,
) -> Result<Vec<ArticleAggregate>, JobError> {
    let sql = format!(
        "SELECT url, count() AS view_count,
                {time_spent} AS avg_time_spent,
                {reading_rate} AS avg_reading_rate
         FROM lead_event
         WHERE brand = ? AND page_type = 'article' AND {}
         GROUP BY url",
        in_window("datetime"),
        time_spent = avg_meta("metas", "timeSpent"),
        reading_rate = avg_meta("metas", "readingRate")
    );
    let rows = client
        .query(&sql)
        .bind(brand)
        .bind(window.start_millis())
        .bind(window.end_millis())
        .fetch_all::<ArticleAggregate>()
        .await?;
    Ok(rows)
}

#[async_trait]
impl Job for ArticleMetrics {
    fn name(&self) -> &'static str {
        if self.coverage.is_backfill() {
            "historical_article_metrics"
        } else {
            "article_metrics"
        }
    }

    async fn run_for_brand(
        &self,
        ctx: &JobContext,
        brand: &Brand,
    ) -> Result<BrandReport, JobError> {
        let mut report = BrandReport::default();
        for (window, period) in self.coverage.windows(ctx.now, Period::Hour) {
            let rows = fetch(&ctx.analytics, &brand.name, &window).await?;
            debug!(brand = %brand.name, %period, articles = rows.len(), "Aggregated articles");
            report.add(self.store(&ctx.pool, &brand.name, period, rows).await?);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn aggregate(url: &str, view_count: u64, avg_time_spent: f64) -> ArticleAggregate {
        ArticleAggregate {
            url: url.to_string(),
            view_count,
            avg_time_spent,
            avg_reading_rate: 0.5,
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn consecutive_runs_merge_into_the_hour(db: PgPool) {
        let job = ArticleMetrics::new(Coverage::LastMinute);
        let hour = Utc.with_ymd_and_hms(2024, 10, 17, 14, 0, 0).unwrap();

        let first = job
            .store(
                &db,
                "meteo-lyon",
                hour,
                vec![
                    aggregate("https://meteo-lyon.fr/orages", 10, 50.0),
                    aggregate("https://meteo-lyon.fr/canicule", 0, 0.0),
                ],
            )
            .await
            .unwrap();
        assert_eq!(first.written, 1);
        assert_eq!(first.skipped, 1);

        job.store(
            &db,
            "meteo-lyon",
            hour,
            vec![aggregate("https://meteo-lyon.fr/orages", 5, 80.0)],
        )
        .await
        .unwrap();

        let rows: Vec<(String, i64, f64)> =
            sqlx::query_as("SELECT url, view_count, avg_time_spent FROM article_metrics")
                .fetch_all(&db)
                .await
                .unwrap();
        assert_eq!(
            rows,
            vec![("https://meteo-lyon.fr/orages".to_string(), 15, 8.67)]
        );
    }

    #[test]
    fn backfill_has_its_own_name() {
        let backfill = ArticleMetrics::new(Coverage::Backfill {
            start: Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap(),
        });
        assert_eq!(backfill.name(), "historical_article_metrics");
        assert_eq!(
            ArticleMetrics::new(Coverage::LastMinute).name(),
            "article_metrics"
        );
    }
}
