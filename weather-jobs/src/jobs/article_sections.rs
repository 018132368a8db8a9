use async_trait::async_trait;
use sqlx::PgPool;
use weather_common::types::Brand;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{BrandReport, Job};

/// Registers every (section, sub_section) pair the brand's pages use.
pub struct ArticleSections;

pub async fn register_sections(pool: &PgPool, brand: &str) -> Result<u64, JobError> {
    let result = sqlx::query(
        "INSERT INTO article_section (brand, section, sub_section)
         SELECT DISTINCT brand, section, COALESCE(sub_section, '')
         FROM page
         WHERE brand = $1 AND section <> ''
         ON CONFLICT DO NOTHING",
    )
    .bind(brand)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl Job for ArticleSections {
    fn name(&self) -> &'static str {
        "article_sections"
    }

    async fn run_for_brand(
        &self,
        ctx: &JobContext,
        brand: &Brand,
    ) -> Result<BrandReport, JobError> {
        Ok(BrandReport {
            written: register_sections(&ctx.pool, &brand.name).await?,
            ..BrandReport::default()
        })
    }
}
