use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::types::Brand;

pub async fn get_pool(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .test_before_acquire(true)
        .connect(url)
        .await
}

pub async fn list_brands(pool: &PgPool) -> Result<Vec<Brand>, sqlx::Error> {
    sqlx::query_as::<_, Brand>("SELECT name, page_view_threshold FROM brand ORDER BY name")
        .fetch_all(pool)
        .await
}
