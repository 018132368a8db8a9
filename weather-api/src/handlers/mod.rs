use axum::{routing, Router};
use sqlx::PgPool;
use tower::limit::ConcurrencyLimitLayer;

pub mod articles;
pub mod engagement;

pub const QUERY_TIME: &str = "weather_api_query_time_ms";

pub fn add_routes(router: Router, pool: PgPool, concurrency_limit: usize) -> Router {
    let api = Router::new()
        .route(
            "/api/v1/engagement-score",
            routing::get(engagement::get_engagement_score),
        )
        .route("/api/v1/top-articles", routing::get(articles::get_top_articles))
        .route(
            "/api/v1/top-next-articles",
            routing::get(articles::get_top_next_articles),
        )
        .route(
            "/api/v1/content-based-articles",
            routing::get(articles::get_content_based_articles),
        )
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
        .with_state(pool);

    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // Nothing runs in the background to watch
        .merge(api)
}

pub async fn index() -> &'static str {
    "weather api"
}
