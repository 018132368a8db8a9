use chrono::{DateTime, Utc};
use clickhouse::Client;
use sqlx::PgPool;

/// Connections shared by every brand task of a run, plus the instant the run
/// is computed at.
#[derive(Clone)]
pub struct JobContext {
    pub pool: PgPool,
    pub analytics: Client,
    pub now: DateTime<Utc>,
}

impl JobContext {
    pub fn new(pool: PgPool, analytics: Client) -> Self {
        Self {
            pool,
            analytics,
            now: Utc::now(),
        }
    }

    /// The same connections, for a run computed at `now`.
    pub fn at(&self, now: DateTime<Utc>) -> Self {
        Self {
            now,
            ..self.clone()
        }
    }
}
