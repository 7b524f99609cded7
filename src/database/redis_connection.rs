use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use redis::aio::MultiplexedConnection;
use tokio::time::timeout;
use tracing::{info, warn};

// an unreachable redis must not stall startup or the health endpoint
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// settings hash and rate limit keys live here, one multiplexed socket shared by every clone
#[derive(Debug, Clone)]
pub struct RedisDatabase {
    pub connection: MultiplexedConnection,
}

impl RedisDatabase {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;

        let connection = timeout(CONNECT_TIMEOUT, client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| anyhow!("redis did not answer within {:?}", CONNECT_TIMEOUT))?
            .context("could not open the redis connection")?;

        let db = Self { connection };
        let latency = db.health_check().await?;
        info!("redis connected, ping took {:.2}ms", latency);

        Ok(db)
    }

    /// ping round trip in milliseconds for /health
    pub async fn health_check(&self) -> anyhow::Result<f64> {
        let mut conn = self.connection.clone();
        let started = Instant::now();

        let pong = timeout(
            PING_TIMEOUT,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow!("redis ping timed out"))?
        .context("redis ping failed")?;

        if pong != "PONG" {
            warn!("unexpected ping reply from redis: {}", pong);
        }

        Ok(started.elapsed().as_secs_f64() * 1000.0)
    }
}
