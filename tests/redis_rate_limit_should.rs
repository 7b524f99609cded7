use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use playlist_edge::database::RedisDatabase;
use playlist_edge::server::services::rate_limit_services::{
    EdgeRateLimitService, RateLimitConfig, RateLimitResult, RateLimitServiceTrait,
};
use playlist_edge::server::utils::clock_utils::{Clock, ManualClock};

/// only runs against a real redis, e.g. `REDIS_URL=redis://127.0.0.1:6379 cargo test`
async fn redis() -> Option<RedisDatabase> {
    let url = std::env::var("REDIS_URL").ok()?;
    Some(RedisDatabase::connect(&url).await.unwrap())
}

fn gate(redis: RedisDatabase, max_requests: u32) -> (Arc<ManualClock>, EdgeRateLimitService) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));
    let service = EdgeRateLimitService::new(
        Arc::new(redis),
        RateLimitConfig {
            max_requests_per_window: max_requests,
            window: Duration::seconds(60),
            ban_duration: Duration::minutes(5),
        },
        clock.clone(),
    );
    (clock, service)
}

// keys outlive a run for their ttl, so every test gets identities nobody used before
fn fresh_identity() -> String {
    format!("test-{}", nanoid::nanoid!())
}

#[tokio::test]
async fn refuse_an_unreachable_redis() {
    assert!(RedisDatabase::connect("not a url").await.is_err());
    assert!(RedisDatabase::connect("redis://127.0.0.1:1").await.is_err());
}

#[tokio::test]
async fn answer_health_checks() {
    let Some(redis) = redis().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };

    assert!(redis.health_check().await.unwrap() >= 0.0);
}

#[tokio::test]
async fn ban_past_the_cap_until_the_ban_lapses() {
    let Some(redis) = redis().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };
    let (clock, gate) = gate(redis, 3);
    let identity = fresh_identity();

    for expected in 1..=3u32 {
        match gate.check_rate_limit(&identity).await {
            RateLimitResult::Allowed {
                requests_in_window,
                remaining,
                ..
            } => {
                assert_eq!(requests_in_window, expected);
                assert_eq!(remaining, 3 - expected);
            }
            other => panic!("request {} should pass, got {:?}", expected, other),
        }
    }

    assert_eq!(
        gate.check_rate_limit(&identity).await,
        RateLimitResult::Banned { retry_after: 300 }
    );

    clock.advance(Duration::seconds(299));
    assert_eq!(
        gate.check_rate_limit(&identity).await,
        RateLimitResult::Banned { retry_after: 1 }
    );

    clock.advance(Duration::seconds(1));
    match gate.check_rate_limit(&identity).await {
        RateLimitResult::Allowed {
            requests_in_window, ..
        } => assert_eq!(requests_in_window, 1),
        other => panic!("ban should have lapsed, got {:?}", other),
    }
}

#[tokio::test]
async fn start_a_new_window_once_the_old_one_ends() {
    let Some(redis) = redis().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };
    let (clock, gate) = gate(redis, 2);
    let identity = fresh_identity();
    let other = fresh_identity();

    assert!(gate.check_rate_limit(&identity).await.is_allowed());
    assert!(gate.check_rate_limit(&identity).await.is_allowed());
    // separate keys, separate budgets
    assert!(gate.check_rate_limit(&other).await.is_allowed());

    clock.advance(Duration::seconds(60));
    match gate.check_rate_limit(&identity).await {
        RateLimitResult::Allowed {
            requests_in_window,
            reset_at,
            ..
        } => {
            assert_eq!(requests_in_window, 1);
            assert_eq!(reset_at, clock.now() + Duration::seconds(60));
        }
        other => panic!("window should have reset, got {:?}", other),
    }
}

