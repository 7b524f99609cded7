use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::{
    config::AppConfig,
    database::{DynSettingsStore, RedisDatabase, RedisSettingsStore, StaticSettingsStore},
    server::utils::{browser_profile_utils::USER_AGENT, clock_utils::SystemClock},
};

use super::{
    access_token_services::{DynAccessTokenService, GqlAccessTokenService},
    manifest_services::{DynManifestService, UsherManifestService},
    playlist_services::PlaylistService,
    rate_limit_services::{
        DynRateLimitService, EdgeRateLimitService, InMemoryRateLimitService, RateLimitConfig,
    },
};

/// everything the handlers need, cloned into each request through an extension
/// redis is optional, without it settings come from the env and rate limits stay in process
#[derive(Clone)]
pub struct EdgeServices {
    pub playlists: Arc<PlaylistService>,
    pub redis: Option<Arc<RedisDatabase>>,
    pub metrics: Option<PrometheusHandle>,
    pub config: Arc<AppConfig>,
}

impl EdgeServices {
    pub fn new(
        redis_db: Option<RedisDatabase>,
        config: Arc<AppConfig>,
        metrics: Option<PrometheusHandle>,
    ) -> anyhow::Result<Self> {
        info!("starting edge services...");

        let redis = redis_db.map(Arc::new);

        // one client for both upstreams so connections get pooled
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.upstream_timeout_seconds.max(1)))
            .build()
            .context("Failed to build upstream http client")?;

        let clock = Arc::new(SystemClock);
        let rate_limit_config = RateLimitConfig::from_config(&config);

        let (settings, rate_limit) = match &redis {
            Some(redis) => {
                info!("redis configured, using shared settings and rate limits");
                (
                    Arc::new(RedisSettingsStore::new(redis.clone(), &config)) as DynSettingsStore,
                    Arc::new(EdgeRateLimitService::new(
                        redis.clone(),
                        rate_limit_config,
                        clock,
                    )) as DynRateLimitService,
                )
            }
            None => {
                info!("no redis, settings come from the env and rate limits stay in memory");
                (
                    Arc::new(StaticSettingsStore::from_config(&config)) as DynSettingsStore,
                    Arc::new(InMemoryRateLimitService::new(rate_limit_config, clock))
                        as DynRateLimitService,
                )
            }
        };

        let tokens =
            Arc::new(GqlAccessTokenService::new(http.clone(), &config)) as DynAccessTokenService;
        let manifests = Arc::new(UsherManifestService::new(http, &config)) as DynManifestService;

        let playlists = Arc::new(PlaylistService::new(
            rate_limit, tokens, manifests, settings, &config,
        ));

        Ok(Self {
            playlists,
            redis,
            metrics,
            config,
        })
    }
}
