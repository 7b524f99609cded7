pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    Extension, Router, ServiceExt,
    extract::Request,
    http::{HeaderValue, Method},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    normalize_path::{NormalizePath, NormalizePathLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    database::RedisDatabase,
    server::{
        api::{
            health_controller::{health_endpoint, metrics_endpoint},
            playlist_controller::PlaylistController,
        },
        services::edge_services::EdgeServices,
    },
};

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct EdgeApplicationServer;

impl EdgeApplicationServer {
    /// all routes plus cors and tracing, without path normalization
    pub fn router(services: EdgeServices) -> Router {
        let cors = Self::cors_layer(&services.config.cors_origin);

        Router::new()
            .nest("/playlist", PlaylistController::app())
            .route("/health", get(health_endpoint))
            .route("/metrics", get(metrics_endpoint))
            .layer(Extension(services))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// the router wrapped so `/playlist/` and `/playlist/vod/` route like their
    /// slashless versions, normalization has to run before routing so it sits outside
    pub fn app(services: EdgeServices) -> NormalizePath<Router> {
        NormalizePathLayer::trim_trailing_slash().layer(Self::router(services))
    }

    fn cors_layer(cors_origin: &str) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(Any);

        if cors_origin.trim() == "*" {
            return layer.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = cors_origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("ignoring invalid cors origin {:?}", o);
                    None
                }
            })
            .collect();

        layer.allow_origin(AllowOrigin::list(origins))
    }

    pub async fn serve(
        config: Arc<AppConfig>,
        redis_db: Option<RedisDatabase>,
        metrics: Option<PrometheusHandle>,
    ) -> anyhow::Result<()> {
        Lazy::force(&START_TIME);

        let services = EdgeServices::new(redis_db, config.clone(), metrics)?;
        let app = Self::app(services);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        info!("playlist edge listening on {}", addr);

        axum::serve(
            listener,
            ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
        )
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("shutting down...");
        })
        .await
        .context("server error")?;

        Ok(())
    }
}
