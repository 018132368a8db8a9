use axum::Router;
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use weather_api::{config::Config, handlers};
use weather_common::postgres::get_pool;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let config = Config::init_from_env().expect("failed to load configuration from env");

    let pool = get_pool(&config.database_url, config.max_pg_connections).await?;

    let app = handlers::add_routes(Router::new(), pool, config.concurrency_limit);
    let app = setup_metrics_routes(app)?;

    let bind = config.bind();
    info!("Listening on {}", bind);
    if let Err(e) = serve(app, &bind).await {
        error!("failed to start weather-api http server, {}", e);
        return Err(e.into());
    }
    Ok(())
}
