use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clickhouse::{Client, Row};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;
use weather_common::types::Brand;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{BrandReport, Job};
use crate::jobs::in_window;
use crate::window::TimeWindow;

const FRESHNESS_DAYS: i64 = 15;

/// When each lead first read each recent article.
pub struct LeadReadArticles;

#[derive(Debug, Clone, PartialEq, Row, Deserialize)]
pub struct FirstRead {
    #[serde(with = "clickhouse::serde::uuid")]
    pub lead_uuid: Uuid,
    pub url: String,
    // Epoch milliseconds
    pub first_read_at: i64,
}

/// Drops the reads of articles published before `published_before`.
pub async fn purge(
    pool: &PgPool,
    brand: &str,
    published_before: DateTime<Utc>,
) -> Result<u64, JobError> {
    let result = sqlx::query(
        "DELETE FROM lead_read_articles r
         USING page p
         WHERE r.brand = $1 AND p.brand = r.brand AND p.url = r.url AND p.publication_date < $2",
    )
    .bind(brand)
    .bind(published_before)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Inserts reads not seen before. A known (lead, url) keeps its first read.
pub async fn store(
    pool: &PgPool,
    brand: &str,
    rows: Vec<FirstRead>,
) -> Result<BrandReport, JobError> {
    let mut report = BrandReport::default();
    for row in rows {
        let Some(first_read_at) = DateTime::<Utc>::from_timestamp_millis(row.first_read_at) else {
            warn!(brand, url = %row.url, first_read_at = row.first_read_at, "Skipping read with an invalid timestamp");
            report.skipped += 1;
            continue;
        };
        let result = sqlx::query(
            "INSERT INTO lead_read_articles (brand, lead_uuid, url, first_read_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT DO NOTHING",
        )
        .bind(brand)
        .bind(row.lead_uuid)
        .bind(&row.url)
        .bind(first_read_at)
        .execute(pool)
        .await?;
        report.record(result.rows_affected() > 0);
    }
    Ok(report)
}

async fn fetch(
    client: &Client,
    brand: &str,
    window: &TimeWindow,
    published_after: DateTime<Utc>,
) -> Result<Vec<FirstRead>, JobError> {
    let sql = format!(
        "SELECT le.lead_uuid AS lead_uuid, le.url AS url, min(le.datetime) AS first_read_at
         FROM lead_event AS le
         INNER JOIN (
             SELECT url AS page_url,
                    argMax(page_type, datetime) AS latest_type,
                    argMax(publication_date, datetime) AS latest_publication_date
             FROM page
             WHERE brand = ?
             GROUP BY url
         ) AS p ON p.page_url = le.url
         WHERE le.brand = ? AND le.name = 'page_view' AND p.latest_type = 'article'
           AND p.latest_publication_date >= fromUnixTimestamp64Milli(toInt64(?))
           AND {}
         GROUP BY le.lead_uuid, le.url",
        in_window("le.datetime")
    );
    let rows = client
        .query(&sql)
        .bind(brand)
        .bind(brand)
        .bind(published_after.timestamp_millis())
        .bind(window.start_millis())
        .bind(window.end_millis())
        .fetch_all::<FirstRead>()
        .await?;
    Ok(rows)
}

#[async_trait]
impl Job for LeadReadArticles {
    fn name(&self) -> &'static str {
        "lead_read_articles"
    }

    async fn run_for_brand(
        &self,
        ctx: &JobContext,
        brand: &Brand,
    ) -> Result<BrandReport, JobError> {
        let fresh_since = ctx.now - Duration::days(FRESHNESS_DAYS);
        let deleted = purge(&ctx.pool, &brand.name, fresh_since).await?;

        let window = TimeWindow::trailing(ctx.now, Duration::minutes(1));
        let rows = fetch(&ctx.analytics, &brand.name, &window, fresh_since).await?;
        let mut report = store(&ctx.pool, &brand.name, rows).await?;
        report.deleted = deleted;
        Ok(report)
    }
}
