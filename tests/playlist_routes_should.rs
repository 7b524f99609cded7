use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Path, Query},
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use flate2::read::GzDecoder;
use playlist_edge::config::AppConfig;
use playlist_edge::server::EdgeApplicationServer;
use playlist_edge::server::services::edge_services::EdgeServices;
use serde_json::{Value, json};
use tower::ServiceExt;

const UPSTREAM_MANIFEST: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00.000Z
#EXTINF:2.000,live
https://video-edge.example/content-1.ts
#EXTINF:2.000,Amazon|1234
https://video-edge.example/ad-1.ts
#EXT-X-TWITCH-PREFETCH:https://video-edge.example/prefetch.ts";

const FILTERED_MANIFEST: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00.000Z
#EXTINF:2.000,live
https://video-edge.example/content-1.ts";

// {"channel":"somechannel","user_ip":"10.9.9.9"}
const SOMECHANNEL_TOKEN: &str =
    "token=%7B%22channel%22%3A%22somechannel%22%2C%22user_ip%22%3A%2210.9.9.9%22%7D";

async fn gql(Json(body): Json<Value>) -> Json<Value> {
    let login = body["variables"]["login"].as_str().unwrap_or_default();
    let vod_id = body["variables"]["vodID"].as_str().unwrap_or_default();

    if login == "offline" {
        return Json(json!({ "data": { "streamPlaybackAccessToken": null } }));
    }

    if !vod_id.is_empty() {
        return Json(json!({
            "data": { "videoPlaybackAccessToken": { "value": "vod-token", "signature": "vod-sig" } }
        }));
    }

    let signature = if login == "restricted" { "stale-sig" } else { "live-sig" };

    Json(json!({
        "data": {
            "streamPlaybackAccessToken": {
                "value": format!("{{\"channel\":\"{}\"}}", login),
                "signature": signature
            }
        }
    }))
}

fn manifest_or_rejection(
    query: &HashMap<String, String>,
    expected_sig: &str,
    missing: bool,
) -> Response {
    if query.contains_key("auth") {
        return (StatusCode::BAD_REQUEST, "auth leaked upstream").into_response();
    }

    if query.get("sig").map(String::as_str) != Some(expected_sig) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!([{
                "url": "https://usher.example/secret-url",
                "error": "bad signature",
                "error_code": "unauthorized_entitlements"
            }])),
        )
            .into_response();
    }

    if missing {
        return StatusCode::NOT_FOUND.into_response();
    }

    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        UPSTREAM_MANIFEST,
    )
        .into_response()
}

async fn live_manifest(
    Path(file): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    manifest_or_rejection(&query, "live-sig", file == "missing.m3u8")
}

async fn vod_manifest(
    Path(_file): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if query.get("client_id").map(String::as_str) != Some("kimne78kx3ncx6brgo4mv6wki5h1ko") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    manifest_or_rejection(&query, "vod-sig", false)
}

async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/gql", post(gql))
        .route("/api/channel/hls/{file}", get(live_manifest))
        .route("/vod/{file}", get(vod_manifest));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

async fn services(configure: impl FnOnce(&mut AppConfig)) -> EdgeServices {
    let upstream = spawn_upstream().await;
    let mut config = AppConfig {
        gql_url: format!("{}/gql", upstream),
        usher_url: upstream,
        ..AppConfig::default()
    };
    configure(&mut config);

    EdgeServices::new(None, Arc::new(config), None).unwrap()
}

const PEER: &str = "198.51.100.7:40000";

/// what axum's connect info layer would attach for a real socket
fn request_from(peer: &str, uri: &str, forwarded_for: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(forwarded_for) = forwarded_for {
        builder = builder.header("x-forwarded-for", forwarded_for);
    }

    let mut request = builder.body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
    request
}

fn get_request(uri: &str) -> Request<Body> {
    request_from(PEER, uri, Some("10.0.0.1, 172.16.0.1"))
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn serve_a_filtered_stream_manifest() {
    let services = services(|_| {}).await;

    let response = EdgeApplicationServer::app(services)
        .oneshot(get_request(&format!(
            "/playlist?{}&auth=SECRET&allow_source=true",
            SOMECHANNEL_TOKEN
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    assert_eq!(body_text(response).await, FILTERED_MANIFEST);
}

#[tokio::test]
async fn accept_the_trailing_slash_the_extension_sends() {
    let services = services(|_| {}).await;

    let response = EdgeApplicationServer::app(services.clone())
        .oneshot(get_request(&format!("/playlist/?{}", SOMECHANNEL_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = EdgeApplicationServer::app(services)
        .oneshot(get_request("/playlist/vod/?vod_id=2000000000&auth=SECRET"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, FILTERED_MANIFEST);
}

#[tokio::test]
async fn gzip_the_manifest_when_asked() {
    let services = services(|_| {}).await;

    let request = Request::builder()
        .uri(format!("/playlist?{}", SOMECHANNEL_TOKEN))
        .header(header::ACCEPT_ENCODING, "gzip, deflate")
        .body(Body::empty())
        .unwrap();

    let response = EdgeApplicationServer::app(services)
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");

    let compressed = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut text = String::new();
    GzDecoder::new(&compressed[..])
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, FILTERED_MANIFEST);
}

#[tokio::test]
async fn pass_the_manifest_through_when_filtering_is_off() {
    let services = services(|config| {
        config.remove_ads = false;
        config.log_playlists = false;
    })
    .await;

    let response = EdgeApplicationServer::app(services)
        .oneshot(get_request(&format!("/playlist?{}", SOMECHANNEL_TOKEN)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(body_text(response).await, UPSTREAM_MANIFEST);
}

#[tokio::test]
async fn reject_requests_without_client_context() {
    let services = services(|_| {}).await;

    for uri in ["/playlist", "/playlist?quality=hd", "/playlist/vod?vod_id=abc"] {
        let response = EdgeApplicationServer::app(services.clone())
            .oneshot(get_request(uri))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn map_missing_channels_and_tokens_to_not_found() {
    let services = services(|_| {}).await;

    for channel in ["missing", "offline"] {
        let uri = format!(
            "/playlist?token=%7B%22channel%22%3A%22{}%22%7D",
            channel
        );
        let response = EdgeApplicationServer::app(services.clone())
            .oneshot(get_request(&uri))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", channel);
    }
}

#[tokio::test]
async fn keep_raw_upstream_errors_away_from_clients() {
    let services = services(|_| {}).await;

    // gql hands out a signature usher refuses for this channel
    let response = EdgeApplicationServer::app(services)
        .oneshot(get_request(
            "/playlist?token=%7B%22channel%22%3A%22restricted%22%7D",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(
        body["error"],
        "playlist not received: unauthorized_entitlements"
    );
    assert!(!body.to_string().contains("secret-url"));
}

#[tokio::test]
async fn ban_identities_that_exceed_the_cap() {
    let services = services(|config| {
        config.rate_limit_max_requests = 2;
    })
    .await;

    for _ in 0..2 {
        let response = EdgeApplicationServer::app(services.clone())
            .oneshot(get_request(&format!("/playlist?{}", SOMECHANNEL_TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = EdgeApplicationServer::app(services.clone())
        .oneshot(get_request(&format!("/playlist?{}", SOMECHANNEL_TOKEN)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "300");

    // another peer has its own budget
    let response = EdgeApplicationServer::app(services)
        .oneshot(request_from(
            "198.51.100.8:40000",
            &format!("/playlist?{}", SOMECHANNEL_TOKEN),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn keep_banning_a_peer_that_rotates_forwarded_headers() {
    let services = services(|config| {
        config.rate_limit_max_requests = 1;
    })
    .await;

    let mut statuses = Vec::new();
    for i in 1..=5 {
        let response = EdgeApplicationServer::app(services.clone())
            .oneshot(request_from(
                PEER,
                &format!("/playlist?{}", SOMECHANNEL_TOKEN),
                Some(&format!("203.0.113.{}", i)),
            ))
            .await
            .unwrap();
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, vec![200, 429, 429, 429, 429]);
}

#[tokio::test]
async fn count_the_address_the_trusted_proxy_saw() {
    let services = services(|config| {
        config.rate_limit_max_requests = 1;
        config.trusted_proxy_hops = 1;
    })
    .await;
    let proxy = "10.0.0.254:51000";
    let uri = format!("/playlist?{}", SOMECHANNEL_TOKEN);

    // entries left of the proxy's own are whatever the client sent
    let mut statuses = Vec::new();
    for i in 1..=3 {
        let response = EdgeApplicationServer::app(services.clone())
            .oneshot(request_from(
                proxy,
                &uri,
                Some(&format!("203.0.113.{}, 192.0.2.10", i)),
            ))
            .await
            .unwrap();
        statuses.push(response.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 429, 429]);

    let response = EdgeApplicationServer::app(services)
        .oneshot(request_from(proxy, &uri, Some("203.0.113.1, 192.0.2.11")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn report_health_without_redis() {
    let services = services(|_| {}).await;

    let response = EdgeApplicationServer::app(services.clone())
        .oneshot(get_request("/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "development");
    assert!(body["services"]["redis"].is_null());

    let response = EdgeApplicationServer::app(services)
        .oneshot(get_request("/metrics"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
