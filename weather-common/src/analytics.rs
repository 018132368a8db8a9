use async_trait::async_trait;
use clickhouse::Client;
use envconfig::Envconfig;
use thiserror::Error;
use tracing::info;

use crate::rows::AnalyticalRow;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("clickhouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),
    #[error("failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Envconfig, Clone)]
pub struct ClickHouseConfig {
    #[envconfig(default = "http://localhost:8123")]
    pub clickhouse_url: String,

    #[envconfig(default = "weather")]
    pub clickhouse_database: String,

    #[envconfig(default = "default")]
    pub clickhouse_user: String,

    #[envconfig(default = "")]
    pub clickhouse_password: String,

    // Only meant for local setups, production tables are managed separately
    #[envconfig(default = "false")]
    pub clickhouse_create_tables: bool,
}

/// Bulk, append-only writes into the analytical store.
#[async_trait]
pub trait AnalyticalSink<R>: Send + Sync {
    async fn append(&self, rows: Vec<R>) -> Result<(), AnalyticsError>;
}

#[derive(Clone)]
pub struct ClickHouseStore {
    client: Client,
}

impl ClickHouseStore {
    pub async fn new(config: &ClickHouseConfig) -> Result<Self, AnalyticsError> {
        let client = Client::default()
            .with_url(config.clickhouse_url.clone())
            .with_database(config.clickhouse_database.clone())
            .with_user(config.clickhouse_user.clone())
            .with_password(config.clickhouse_password.clone());

        client.query("SELECT 1").execute().await?;
        info!(
            "Successfully connected to ClickHouse at {}",
            config.clickhouse_url
        );

        let store = Self { client };
        if config.clickhouse_create_tables {
            store.ensure_tables().await?;
        }
        Ok(store)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn ensure_tables(&self) -> Result<(), AnalyticsError> {
        for ddl in [LEAD_EVENT_DDL, PAGE_DDL, USER_DDL] {
            self.client.query(ddl).execute().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<R> AnalyticalSink<R> for ClickHouseStore
where
    R: AnalyticalRow,
{
    async fn append(&self, rows: Vec<R>) -> Result<(), AnalyticsError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut insert = self.client.insert::<R>(R::TABLE)?;
        for row in &rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }
}

const LEAD_EVENT_DDL: &str = "
CREATE TABLE IF NOT EXISTS lead_event (
    datetime DateTime64(3, 'UTC'),
    brand String,
    uuid UUID,
    lead_uuid UUID,
    name String,
    page_type String,
    page_language String,
    device String,
    url String,
    referrer String,
    referrer_type String,
    relevant_referrer String,
    metas String,
    consent Bool,
    ip String,
    location_country String,
    location_city String
) ENGINE = MergeTree()
PARTITION BY toYYYYMM(datetime)
ORDER BY (brand, datetime)";

const PAGE_DDL: &str = "
CREATE TABLE IF NOT EXISTS page (
    datetime DateTime64(3, 'UTC'),
    brand String,
    url String,
    page_type String,
    language String,
    publication_date DateTime64(3, 'UTC'),
    modification_date Nullable(DateTime64(3, 'UTC')),
    title String,
    description String,
    content String,
    section String,
    sub_section Nullable(String),
    image Nullable(String),
    is_paid Bool
) ENGINE = MergeTree()
ORDER BY (brand, url, datetime)";

const USER_DDL: &str = "
CREATE TABLE IF NOT EXISTS user (
    datetime DateTime64(3, 'UTC'),
    brand String,
    lead_uuid UUID,
    user_id String,
    email String,
    first_name String,
    last_name String,
    is_subscriber Bool
) ENGINE = MergeTree()
ORDER BY (brand, lead_uuid, datetime)";
