use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("clickhouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),
    #[error("failed to encode content vector: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("brand task panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Fatal errors would fail every brand the same way, so the run as a whole
    /// is reported as failed.
    pub fn is_fatal(&self) -> bool {
        match self {
            JobError::Database(e) => matches!(
                e,
                sqlx::Error::PoolClosed | sqlx::Error::Configuration(_) | sqlx::Error::Migrate(_)
            ),
            JobError::Config(_) | JobError::Panicked(_) => true,
            JobError::ClickHouse(_) | JobError::Encode(_) => false,
        }
    }
}
