use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, error, warn};

use crate::{
    config::AppConfig,
    database::RedisDatabase,
    server::utils::clock_utils::DynClock,
};

// how often the in memory store drops records nobody has touched since they expired
const PRUNE_EVERY_CHECKS: u64 = 1024;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// requests allowed per window before the identity gets banned
    pub max_requests_per_window: u32,
    pub window: Duration,
    pub ban_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 100,
            window: Duration::seconds(60),
            ban_duration: Duration::minutes(5),
        }
    }
}

impl RateLimitConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_requests_per_window: config.rate_limit_max_requests.max(1),
            window: Duration::seconds(config.rate_limit_window_seconds.max(1) as i64),
            ban_duration: Duration::seconds(config.rate_limit_ban_seconds as i64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// request may go through, `requests_in_window` includes this one
    Allowed {
        requests_in_window: u32,
        remaining: u32,
        reset_at: DateTime<Utc>,
    },
    /// identity is banned, nothing upstream may be touched
    Banned { retry_after: u64 },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// per identity counter, lives until its window or ban runs out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub window_expires_at: DateTime<Utc>,
    pub banned: bool,
    pub ban_expires_at: DateTime<Utc>,
}

impl RateLimitRecord {
    pub fn new(now: DateTime<Utc>, config: &RateLimitConfig) -> Self {
        Self {
            count: 1,
            window_expires_at: now + config.window,
            banned: false,
            ban_expires_at: now,
        }
    }

    /// applies one request to an existing record and says whether it may pass
    pub fn check(&mut self, now: DateTime<Utc>, config: &RateLimitConfig) -> RateLimitResult {
        if self.banned {
            if now < self.ban_expires_at {
                return RateLimitResult::Banned {
                    retry_after: seconds_until(now, self.ban_expires_at),
                };
            }
            *self = Self::new(now, config);
            return self.allowed(config);
        }

        if now >= self.window_expires_at {
            *self = Self::new(now, config);
            return self.allowed(config);
        }

        if self.count >= config.max_requests_per_window {
            self.banned = true;
            self.ban_expires_at = now + config.ban_duration;
            return RateLimitResult::Banned {
                retry_after: seconds_until(now, self.ban_expires_at),
            };
        }

        self.count += 1;
        self.allowed(config)
    }

    pub fn allowed(&self, config: &RateLimitConfig) -> RateLimitResult {
        RateLimitResult::Allowed {
            requests_in_window: self.count,
            remaining: config.max_requests_per_window.saturating_sub(self.count),
            reset_at: self.window_expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.banned {
            now >= self.ban_expires_at
        } else {
            now >= self.window_expires_at
        }
    }
}

fn seconds_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0);
    ((millis + 999) / 1000).max(1) as u64
}

pub type DynRateLimitService = Arc<dyn RateLimitServiceTrait + Send + Sync>;

#[async_trait::async_trait]
pub trait RateLimitServiceTrait {
    /// counts one request for `identity`, the read-check-write is atomic per identity
    async fn check_rate_limit(&self, identity: &str) -> RateLimitResult;
}

fn record_outcome(identity: &str, result: &RateLimitResult, config: &RateLimitConfig) {
    match result {
        RateLimitResult::Allowed {
            requests_in_window, ..
        } => {
            metrics::gauge!("abuse_gate_requests_in_window").set(*requests_in_window as f64);
            debug!(
                "identity {} at {}/{} requests in window",
                identity, requests_in_window, config.max_requests_per_window
            );
        }
        RateLimitResult::Banned { retry_after } => {
            metrics::counter!("abuse_gate_rejections_total").increment(1);
            warn!(
                "identity {} is banned for another {}s (cap {} per {}s)",
                identity,
                retry_after,
                config.max_requests_per_window,
                config.window.num_seconds()
            );
        }
    }
}

/// single process store, each check holds the identity's shard lock for the whole
/// read-check-write
pub struct InMemoryRateLimitService {
    records: DashMap<String, RateLimitRecord>,
    config: RateLimitConfig,
    clock: DynClock,
    checks: AtomicU64,
}

impl InMemoryRateLimitService {
    pub fn new(config: RateLimitConfig, clock: DynClock) -> Self {
        Self {
            records: DashMap::new(),
            config,
            clock,
            checks: AtomicU64::new(0),
        }
    }

    pub fn tracked_identities(&self) -> usize {
        self.records.len()
    }

    pub fn prune_expired(&self) {
        let now = self.clock.now();
        self.records.retain(|_, record| !record.is_expired(now));
    }
}

#[async_trait::async_trait]
impl RateLimitServiceTrait for InMemoryRateLimitService {
    async fn check_rate_limit(&self, identity: &str) -> RateLimitResult {
        let now = self.clock.now();

        let result = match self.records.entry(identity.to_string()) {
            Entry::Occupied(mut entry) => entry.get_mut().check(now, &self.config),
            Entry::Vacant(entry) => {
                let record = RateLimitRecord::new(now, &self.config);
                let result = record.allowed(&self.config);
                entry.insert(record);
                result
            }
        };

        // entry guard is gone by now, retain would deadlock on the shard otherwise
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY_CHECKS
            == PRUNE_EVERY_CHECKS - 1
        {
            self.prune_expired();
        }

        record_outcome(identity, &result, &self.config);
        result
    }
}

// same state machine as RateLimitRecord::check, run inside redis so concurrent edges can't
// race each other. times are unix millis
const RATE_LIMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local cap = tonumber(ARGV[3])
local ban = tonumber(ARGV[4])

local record = redis.call('HMGET', key, 'count', 'window_expires_at', 'banned', 'ban_expires_at')
local count = tonumber(record[1])
local window_expires_at = tonumber(record[2])
local banned = record[3] == '1'
local ban_expires_at = tonumber(record[4])

if banned and ban_expires_at and now < ban_expires_at then
  return {0, count or 0, ban_expires_at - now}
end

if count == nil or window_expires_at == nil or banned or now >= window_expires_at then
  redis.call('HSET', key, 'count', 1, 'window_expires_at', now + window, 'banned', 0, 'ban_expires_at', 0)
  redis.call('PEXPIRE', key, window)
  return {1, 1, window}
end

if count >= cap then
  redis.call('HSET', key, 'banned', 1, 'ban_expires_at', now + ban)
  redis.call('PEXPIRE', key, ban)
  return {0, count, ban}
end

count = redis.call('HINCRBY', key, 'count', 1)
return {1, count, window_expires_at - now}
"#;

/// turns the script's `{allowed, count, ttl_ms}` reply into a result. a broken redis shouldn't
/// take playback down with it, so errors let the request through
pub fn script_result(
    reply: Result<(i64, i64, i64), redis::RedisError>,
    now: DateTime<Utc>,
    config: &RateLimitConfig,
) -> RateLimitResult {
    match reply {
        Ok((1, count, ttl_ms)) => {
            let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
            RateLimitResult::Allowed {
                requests_in_window: count,
                remaining: config.max_requests_per_window.saturating_sub(count),
                reset_at: now + Duration::milliseconds(ttl_ms.max(0)),
            }
        }
        Ok((_, _, ttl_ms)) => RateLimitResult::Banned {
            retry_after: seconds_until(now, now + Duration::milliseconds(ttl_ms)),
        },
        Err(_) => RateLimitResult::Allowed {
            requests_in_window: 0,
            remaining: 0,
            reset_at: now + config.window,
        },
    }
}

/// shared store for when several edges sit behind one balancer, keys expire on their own
pub struct EdgeRateLimitService {
    redis: Arc<RedisDatabase>,
    config: RateLimitConfig,
    clock: DynClock,
    script: redis::Script,
}

impl EdgeRateLimitService {
    pub fn new(redis: Arc<RedisDatabase>, config: RateLimitConfig, clock: DynClock) -> Self {
        Self {
            redis,
            config,
            clock,
            script: redis::Script::new(RATE_LIMIT_SCRIPT),
        }
    }

    fn rate_limit_key(&self, identity: &str) -> String {
        format!("playlist_rate_limit:{}", identity)
    }
}

#[async_trait::async_trait]
impl RateLimitServiceTrait for EdgeRateLimitService {
    async fn check_rate_limit(&self, identity: &str) -> RateLimitResult {
        let now = self.clock.now();
        let mut conn = self.redis.connection.clone();

        let result: Result<(i64, i64, i64), redis::RedisError> = self
            .script
            .key(self.rate_limit_key(identity))
            .arg(now.timestamp_millis())
            .arg(self.config.window.num_milliseconds())
            .arg(self.config.max_requests_per_window)
            .arg(self.config.ban_duration.num_milliseconds())
            .invoke_async(&mut conn)
            .await;

        if let Err(e) = &result {
            error!("Rate limit check failed for {}: {}", identity, e);
        }

        let result = script_result(result, now, &self.config);
        record_outcome(identity, &result, &self.config);
        result
    }
}
