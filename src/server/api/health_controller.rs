use axum::Extension;
use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::error;

use crate::config::CargoEnv;
use crate::server::dtos::health_dto::{
    HealthResponse, HealthStatus, RedisHealth, ServiceHealthDetails,
};
use crate::server::services::edge_services::EdgeServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// health endpoint, redis is the only dependency worth pinging
/// upstream apis aren't checked, a dead gql shows up as playlist failures instead
pub async fn health_endpoint(
    Extension(services): Extension<EdgeServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let redis_health = match &services.redis {
        Some(_) => Some(check_redis_health(&services).await),
        None => None,
    };

    let overall_status = match &redis_health {
        Some(redis) if redis.status == HealthStatus::Unhealthy => HealthStatus::Unhealthy,
        _ => HealthStatus::Healthy,
    };

    let response = HealthResponse {
        status: overall_status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: match services.config.cargo_env {
            CargoEnv::Development => "development".to_string(),
            CargoEnv::Production => "production".to_string(),
        },
        services: ServiceHealthDetails {
            redis: redis_health,
        },
    };

    let http_status = match overall_status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

async fn check_redis_health(services: &EdgeServices) -> RedisHealth {
    let Some(redis) = &services.redis else {
        return RedisHealth {
            status: HealthStatus::Unhealthy,
            response_time_ms: 0.0,
        };
    };

    match redis.health_check().await {
        Ok(response_time) => RedisHealth {
            status: HealthStatus::Healthy,
            response_time_ms: response_time,
        },
        Err(e) => {
            error!("Redis health check failed: {}", e);
            RedisHealth {
                status: HealthStatus::Unhealthy,
                response_time_ms: 0.0,
            }
        }
    }
}

/// prometheus text format, 404 when no recorder was installed
pub async fn metrics_endpoint(Extension(services): Extension<EdgeServices>) -> Response {
    match &services.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
