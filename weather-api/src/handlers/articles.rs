use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{required, ApiError};
use crate::handlers::QUERY_TIME;

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 100;

/// A recommended article, with its page details when the page is known.
#[derive(Debug, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct RankedArticle {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub section: Option<String>,
    pub sub_section: Option<String>,
    pub view_count: i64,
    pub avg_reading_rate: f64,
    pub avg_time_spent: f64,
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct SimilarArticle {
    pub url: String,
    pub title: String,
    pub description: String,
    pub image: Option<String>,
    pub section: String,
    pub sub_section: Option<String>,
    pub similarity: f64,
}

#[derive(Debug, Deserialize)]
pub struct TopArticlesParams {
    brand: Option<String>,
    section: Option<String>,
    sub_section: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopNextArticlesParams {
    brand: Option<String>,
    url: Option<String>,
    lead_uuid: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarArticlesParams {
    brand: Option<String>,
    url: Option<String>,
}

fn labels(endpoint: &str) -> [(String, String); 1] {
    [("endpoint".to_string(), endpoint.to_string())]
}

// Unparseable or out of range limits fall back to something sensible
fn parse_limit(limit: Option<&str>) -> i64 {
    match limit.and_then(|l| l.trim().parse::<i64>().ok()) {
        Some(l) if l >= 1 => l.min(MAX_LIMIT),
        _ => DEFAULT_LIMIT,
    }
}

/// The site wide top 10 of the last 2 days, or the one of a section or sub
/// section.
pub async fn get_top_articles(
    State(pool): State<PgPool>,
    Query(params): Query<TopArticlesParams>,
) -> Result<Json<Vec<RankedArticle>>, ApiError> {
    let brand = required("brand", params.brand)?;
    let section = params.section.unwrap_or_default();
    let sub_section = params.sub_section.unwrap_or_default();
    if section.is_empty() && !sub_section.is_empty() {
        return Err(ApiError::MissingParameter("section"));
    }

    let labels = labels("top_articles");
    let _time = common_metrics::timing_guard(QUERY_TIME, &labels);
    let articles = sqlx::query_as::<_, RankedArticle>(
        r#"
        SELECT
            ta.url,
            p.title,
            p.description,
            p.image,
            p.section,
            p.sub_section,
            SUM(ta.view_count)::BIGINT AS view_count,
            ROUND(AVG(ta.avg_reading_rate)::NUMERIC, 2)::DOUBLE PRECISION AS avg_reading_rate,
            ROUND(AVG(ta.avg_time_spent)::NUMERIC, 2)::DOUBLE PRECISION AS avg_time_spent,
            ROUND((
                AVG(ta.avg_reading_rate) * 0.3
                + AVG(ta.avg_time_spent) * 0.3
                + AVG(ta.recency_weight) * 0.4
            )::NUMERIC, 2)::DOUBLE PRECISION AS score
        FROM top_articles ta
        LEFT JOIN page p ON p.brand = ta.brand AND p.url = ta.url
        WHERE ta.brand = $1
            AND ta.section = $2
            AND ta.sub_section = $3
            AND ta.calculation_period >= NOW() - INTERVAL '2 days'
        GROUP BY ta.url, p.title, p.description, p.image, p.section, p.sub_section
        ORDER BY score DESC, ta.url
        LIMIT 10
        "#,
    )
    .bind(&brand)
    .bind(&section)
    .bind(&sub_section)
    .fetch_all(&pool)
    .await?;

    Ok(Json(articles))
}

const TOP_NEXT_ARTICLES: &str = r#"
    SELECT
        tna.next_url AS url,
        p.title,
        p.description,
        p.image,
        p.section,
        p.sub_section,
        SUM(tna.view_count)::BIGINT AS view_count,
        ROUND(AVG(tna.avg_reading_rate)::NUMERIC, 2)::DOUBLE PRECISION AS avg_reading_rate,
        ROUND(AVG(tna.avg_time_spent)::NUMERIC, 2)::DOUBLE PRECISION AS avg_time_spent,
        ROUND((
            SUM(tna.view_count) * 0.4
            + AVG(tna.avg_reading_rate) * 0.3
            + AVG(tna.avg_time_spent) * 0.3
        )::NUMERIC, 2)::DOUBLE PRECISION AS score
    FROM top_next_articles tna
    LEFT JOIN page p ON p.brand = tna.brand AND p.url = tna.next_url
    WHERE tna.brand = $1
        AND tna.initial_url = $2
        AND tna.calculation_period >= NOW() - INTERVAL '2 days'
    GROUP BY tna.next_url, p.title, p.description, p.image, p.section, p.sub_section
    ORDER BY score DESC, tna.next_url
    LIMIT $3
"#;

// Leaves out what the lead already read and favours the sections they read most
const TOP_NEXT_ARTICLES_FOR_LEAD: &str = r#"
    SELECT
        tna.next_url AS url,
        p.title,
        p.description,
        p.image,
        p.section,
        p.sub_section,
        SUM(tna.view_count)::BIGINT AS view_count,
        ROUND(AVG(tna.avg_reading_rate)::NUMERIC, 2)::DOUBLE PRECISION AS avg_reading_rate,
        ROUND(AVG(tna.avg_time_spent)::NUMERIC, 2)::DOUBLE PRECISION AS avg_time_spent,
        ROUND((
            SUM(tna.view_count) * 0.4
            + AVG(tna.avg_reading_rate) * 0.2
            + AVG(tna.avg_time_spent) * 0.2
            + COALESCE((
                SELECT SUM(lsac.article_count)
                FROM lead_section_article_count lsac
                WHERE lsac.brand = $1 AND lsac.lead_uuid = $4 AND lsac.section = p.section
            ), 0) * 0.2
        )::NUMERIC, 2)::DOUBLE PRECISION AS score
    FROM top_next_articles tna
    LEFT JOIN page p ON p.brand = tna.brand AND p.url = tna.next_url
    WHERE tna.brand = $1
        AND tna.initial_url = $2
        AND tna.calculation_period >= NOW() - INTERVAL '2 days'
        AND NOT EXISTS (
            SELECT 1 FROM lead_read_articles lra
            WHERE lra.brand = $1 AND lra.lead_uuid = $4 AND lra.url = tna.next_url
        )
    GROUP BY tna.next_url, p.title, p.description, p.image, p.section, p.sub_section
    ORDER BY score DESC, tna.next_url
    LIMIT $3
"#;

/// What readers of `url` went on to read over the last 2 days.
pub async fn get_top_next_articles(
    State(pool): State<PgPool>,
    Query(params): Query<TopNextArticlesParams>,
) -> Result<Json<Vec<RankedArticle>>, ApiError> {
    let brand = required("brand", params.brand)?;
    let url = required("url", params.url)?;
    let limit = parse_limit(params.limit.as_deref());
    let lead_uuid = match params.lead_uuid.filter(|l| !l.trim().is_empty()) {
        Some(lead) => Some(Uuid::parse_str(lead.trim()).map_err(|e| {
            ApiError::InvalidParameter {
                name: "lead_uuid",
                reason: e.to_string(),
            }
        })?),
        None => None,
    };

    let labels = labels("top_next_articles");
    let _time = common_metrics::timing_guard(QUERY_TIME, &labels);
    let query = match lead_uuid {
        Some(lead) => sqlx::query_as::<_, RankedArticle>(TOP_NEXT_ARTICLES_FOR_LEAD)
            .bind(brand)
            .bind(url)
            .bind(limit)
            .bind(lead),
        None => sqlx::query_as::<_, RankedArticle>(TOP_NEXT_ARTICLES)
            .bind(brand)
            .bind(url)
            .bind(limit),
    };
    let articles = query.fetch_all(&pool).await?;

    Ok(Json(articles))
}

/// The 10 recent articles closest in content to `url`.
pub async fn get_content_based_articles(
    State(pool): State<PgPool>,
    Query(params): Query<SimilarArticlesParams>,
) -> Result<Json<Vec<SimilarArticle>>, ApiError> {
    let brand = required("brand", params.brand)?;
    let url = required("url", params.url)?;

    let labels = labels("content_based_articles");
    let _time = common_metrics::timing_guard(QUERY_TIME, &labels);
    let articles = sqlx::query_as::<_, SimilarArticle>(
        r#"
        SELECT
            p.url,
            p.title,
            p.description,
            p.image,
            p.section,
            p.sub_section,
            cba.similarity_score AS similarity
        FROM content_based_articles cba
        JOIN page p ON p.brand = cba.brand AND p.url = cba.article_url_2
        WHERE cba.brand = $1
            AND cba.article_url_1 = $2
            AND cba.similarity_score > 0
        ORDER BY cba.similarity_score DESC, p.url
        LIMIT 10
        "#,
    )
    .bind(&brand)
    .bind(&url)
    .fetch_all(&pool)
    .await?;

    Ok(Json(articles))
}
