use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use redis::AsyncCommands;
use tracing::{debug, error};

use crate::{config::AppConfig, database::RedisDatabase};

/// run the ad filter over upstream manifests
pub const REMOVE_ADS: &str = "RemoveAds";
/// dump every upstream manifest into the logs, very noisy
pub const LOGGING_PLAYLISTS: &str = "LoggingPlaylists";

const SETTINGS_HASH_KEY: &str = "settings";

pub type DynSettingsStore = Arc<dyn SettingsStore + Send + Sync>;

#[automock]
#[async_trait]
pub trait SettingsStore {
    /// returns `default` when the key is missing or can't be read
    async fn get_bool_setting(&self, key: &str, default: bool) -> bool;
}

/// settings kept in a redis hash so they can be flipped without a redeploy
pub struct RedisSettingsStore {
    redis: Arc<RedisDatabase>,
    fallback: StaticSettingsStore,
}

impl RedisSettingsStore {
    pub fn new(redis: Arc<RedisDatabase>, config: &AppConfig) -> Self {
        Self {
            redis,
            fallback: StaticSettingsStore::from_config(config),
        }
    }
}

#[async_trait]
impl SettingsStore for RedisSettingsStore {
    async fn get_bool_setting(&self, key: &str, default: bool) -> bool {
        let mut conn = self.redis.connection.clone();
        let result: Result<Option<String>, redis::RedisError> =
            conn.hget(SETTINGS_HASH_KEY, key).await;

        match result {
            Ok(Some(value)) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    debug!("setting {} has non boolean value {:?}", key, other);
                    self.fallback.get_bool_setting(key, default).await
                }
            },
            Ok(None) => self.fallback.get_bool_setting(key, default).await,
            Err(e) => {
                error!("Failed to read setting {}: {}", key, e);
                self.fallback.get_bool_setting(key, default).await
            }
        }
    }
}

/// settings fixed at startup from the env
#[derive(Debug, Clone)]
pub struct StaticSettingsStore {
    remove_ads: bool,
    log_playlists: bool,
}

impl StaticSettingsStore {
    pub fn new(remove_ads: bool, log_playlists: bool) -> Self {
        Self {
            remove_ads,
            log_playlists,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.remove_ads, config.log_playlists)
    }
}

#[async_trait]
impl SettingsStore for StaticSettingsStore {
    async fn get_bool_setting(&self, key: &str, default: bool) -> bool {
        match key {
            REMOVE_ADS => self.remove_ads,
            LOGGING_PLAYLISTS => self.log_playlists,
            _ => default,
        }
    }
}
