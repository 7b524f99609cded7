use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use playlist_edge::{AppConfig, EdgeApplicationServer, Logger, RedisDatabase};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards flush the log writer and keep sentry alive, drop them and logs go missing
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!("logger and env prepped...");

    // /metrics just 404s if this fails, not worth refusing to start over
    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("prometheus recorder not installed: {}", e);
            None
        }
    };

    let redis_db = match &config.redis_url {
        Some(url) => {
            info!("connecting to redis...");
            Some(
                RedisDatabase::connect(url)
                    .await
                    .context("where is the redis connection!!")?,
            )
        }
        None => {
            info!("no REDIS_URL, running standalone");
            None
        }
    };

    EdgeApplicationServer::serve(config, redis_db, metrics)
        .await
        .context("edge server failed to start")?;

    Ok(())
}
