use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use weather_common::types::Brand;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{BrandReport, Job};
use crate::similarity::term_frequencies;

/// Computes the term frequencies of articles that have none yet. Pages get
/// theirs reset whenever their content changes.
pub struct ArticleContentVector;

pub async fn vectorize_pending(pool: &PgPool, brand: &str) -> Result<u64, JobError> {
    let pending: Vec<(String, String)> = sqlx::query_as(
        "SELECT url, content FROM page
         WHERE brand = $1 AND type = 'article' AND content_vector IS NULL",
    )
    .bind(brand)
    .fetch_all(pool)
    .await?;

    let mut written = 0;
    for (url, content) in pending {
        let vector = term_frequencies(&content);
        written += sqlx::query("UPDATE page SET content_vector = $1 WHERE brand = $2 AND url = $3")
            .bind(Json(&vector))
            .bind(brand)
            .bind(&url)
            .execute(pool)
            .await?
            .rows_affected();
    }
    Ok(written)
}

#[async_trait]
impl Job for ArticleContentVector {
    fn name(&self) -> &'static str {
        "article_content_vector"
    }

    async fn run_for_brand(
        &self,
        ctx: &JobContext,
        brand: &Brand,
    ) -> Result<BrandReport, JobError> {
        Ok(BrandReport {
            written: vectorize_pending(&ctx.pool, &brand.name).await?,
            ..BrandReport::default()
        })
    }
}
