use std::sync::Arc;
use std::time::Duration;

use common_geoip::GeoIpClient;
use health::{HealthHandle, HealthRegistry};
use sqlx::PgPool;
use weather_common::{analytics::ClickHouseStore, postgres::get_pool};

use crate::config::{Config, EntityKindName};

/// Everything the ingestion loop shares, opened once at startup. Failing to
/// open any of it is fatal.
pub struct AppContext {
    pub pool: PgPool,
    pub analytics: ClickHouseStore,
    // Only lead events are located
    pub geo: Option<Arc<GeoIpClient>>,
    pub liveness: HealthRegistry,
    pub worker_liveness: HealthHandle,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, anyhow::Error> {
        let pool = get_pool(&config.database_url, config.max_pg_connections).await?;
        let analytics = ClickHouseStore::new(&config.clickhouse).await?;

        let geo = match config.entity_kind {
            EntityKindName::LeadEvent => Some(Arc::new(GeoIpClient::new(&config.geoip_db_path)?)),
            EntityKindName::Page | EntityKindName::User => None,
        };

        let liveness = HealthRegistry::new("liveness");
        // Reported on every message and every timer tick, so quiet topics stay live
        let worker_liveness = liveness
            .register("consumer", config.max_wait().max(Duration::from_secs(20)) * 3)
            .await;

        Ok(Self {
            pool,
            analytics,
            geo,
            liveness,
            worker_liveness,
        })
    }
}
