use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use weather_common::engagement::{engagement_score, fetch_engagement_windows, WindowMetrics};

use crate::error::{required, ApiError};
use crate::handlers::QUERY_TIME;

#[derive(Debug, Deserialize)]
pub struct EngagementParams {
    brand: Option<String>,
    lead_uuid: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EngagementScore {
    pub lead_uuid: Uuid,
    pub score: f64,
    /// 90 to 60, 60 to 30 and 30 to 0 days ago.
    pub windows: [WindowMetrics; 3],
}

pub async fn get_engagement_score(
    State(pool): State<PgPool>,
    Query(params): Query<EngagementParams>,
) -> Result<Json<EngagementScore>, ApiError> {
    let brand = required("brand", params.brand)?;
    let lead_uuid = required("lead_uuid", params.lead_uuid)?;
    let lead_uuid = Uuid::parse_str(lead_uuid.trim()).map_err(|e| ApiError::InvalidParameter {
        name: "lead_uuid",
        reason: e.to_string(),
    })?;

    let labels = [("endpoint".to_string(), "engagement_score".to_string())];
    let windows = {
        let _time = common_metrics::timing_guard(QUERY_TIME, &labels);
        fetch_engagement_windows(&pool, &brand, lead_uuid).await?
    };

    Ok(Json(EngagementScore {
        lead_uuid,
        score: engagement_score(&windows),
        windows,
    }))
}
