use async_trait::async_trait;
use weather_common::types::Brand;

use crate::context::JobContext;
use crate::error::JobError;

/// What one brand's run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrandReport {
    pub deleted: u64,
    pub written: u64,
    pub skipped: u64,
}

impl BrandReport {
    pub fn add(&mut self, other: BrandReport) {
        self.deleted += other.deleted;
        self.written += other.written;
        self.skipped += other.skipped;
    }

    /// Counts one upsert outcome as written or skipped.
    pub fn record(&mut self, written: bool) {
        if written {
            self.written += 1;
        } else {
            self.skipped += 1;
        }
    }
}

/// An aggregation job. Each brand is computed independently, so a run can fan
/// out one task per brand.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_for_brand(&self, ctx: &JobContext, brand: &Brand)
        -> Result<BrandReport, JobError>;
}
