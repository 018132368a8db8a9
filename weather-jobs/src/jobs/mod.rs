use std::sync::Arc;

use crate::config::{Config, JobName};
use crate::error::JobError;
use crate::job::Job;
use crate::window::{parse_bound, Coverage};

pub mod article_metrics;
pub mod article_sections;
pub mod content_based_articles;
pub mod content_vector;
pub mod lead_article_view_count;
pub mod lead_engagement_metrics;
pub mod lead_read_articles;
pub mod lead_section_article_count;
pub mod top_articles;
pub mod top_next_articles;

/// `[?, ?)` bounds on a DateTime64 column, bound as epoch milliseconds.
pub(crate) fn in_window(column: &str) -> String {
    format!(
        "{column} >= fromUnixTimestamp64Milli(toInt64(?)) AND {column} < fromUnixTimestamp64Milli(toInt64(?))"
    )
}

/// Average of a numeric `metas` key, rounded to 2 decimals. Events without the
/// key are left out rather than counted as 0, and a group where none has it
/// averages to 0.
pub(crate) fn avg_meta(column: &str, key: &str) -> String {
    format!("round(ifNull(avg(JSONExtract({column}, '{key}', 'Nullable(Float64)')), 0), 2)")
}

pub(crate) fn count_to_i64(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn backfill(config: &Config) -> Result<Coverage, JobError> {
    let start = parse_bound("START_DATE", config.start_date.as_deref()).map_err(JobError::Config)?;
    let end = parse_bound("END_DATE", config.end_date.as_deref()).map_err(JobError::Config)?;
    if start >= end {
        return Err(JobError::Config(
            "START_DATE must be before END_DATE".to_string(),
        ));
    }
    Ok(Coverage::Backfill { start, end })
}

pub fn build(name: JobName, config: &Config) -> Result<Arc<dyn Job>, JobError> {
    let job: Arc<dyn Job> = match name {
        JobName::ArticleMetrics => Arc::new(article_metrics::ArticleMetrics::new(
            Coverage::LastMinute,
        )),
        JobName::HistoricalArticleMetrics => {
            Arc::new(article_metrics::ArticleMetrics::new(backfill(config)?))
        }
        JobName::LeadEngagementMetrics => Arc::new(
            lead_engagement_metrics::LeadEngagementMetrics::new(Coverage::LastMinute),
        ),
        JobName::HistoricalLeadEngagementMetrics => Arc::new(
            lead_engagement_metrics::LeadEngagementMetrics::new(backfill(config)?),
        ),
        JobName::LeadSectionArticleCount => {
            Arc::new(lead_section_article_count::LeadSectionArticleCount)
        }
        JobName::LeadArticleViewCount => Arc::new(lead_article_view_count::LeadArticleViewCount),
        JobName::LeadReadArticles => Arc::new(lead_read_articles::LeadReadArticles),
        JobName::TopArticles => Arc::new(top_articles::TopArticles),
        JobName::TopNextArticles => Arc::new(top_next_articles::TopNextArticles),
        JobName::ArticleSections => Arc::new(article_sections::ArticleSections),
        JobName::ArticleContentVector => Arc::new(content_vector::ArticleContentVector),
        JobName::ContentBasedArticles => Arc::new(content_based_articles::ContentBasedArticles),
    };
    Ok(job)
}
