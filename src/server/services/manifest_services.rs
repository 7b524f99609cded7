use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use mockall::automock;
use reqwest::{StatusCode, header::HeaderMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::AppConfig,
    server::{
        dtos::playlist_dto::{PlaybackAccessToken, PlaylistKind},
        error::{AppResult, Error},
        utils::{
            browser_profile_utils::browser_headers,
            cancellation_utils::{map_transport_error, until_cancelled},
        },
    },
};

// client secret that must never leave this service
const AUTH_PARAM: &str = "auth";
// only meaningful to us
const VOD_ID_PARAM: &str = "vod_id";
const TOKEN_PARAM: &str = "token";
const SIG_PARAM: &str = "sig";
const CLIENT_ID_PARAM: &str = "client_id";

// error bodies are tiny json arrays, anything bigger isn't worth reading
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// a manifest whose headers arrived, body still on the wire
pub struct UpstreamManifest {
    pub content_type: Option<String>,
    body: BoxStream<'static, AppResult<Bytes>>,
}

impl fmt::Debug for UpstreamManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamManifest")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl UpstreamManifest {
    pub fn new(content_type: Option<String>, body: BoxStream<'static, AppResult<Bytes>>) -> Self {
        Self { content_type, body }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        let bytes = Bytes::from(text.into());
        Self::new(
            Some("application/vnd.apple.mpegurl".to_string()),
            futures::stream::once(async move { Ok(bytes) }).boxed(),
        )
    }

    pub fn into_body_stream(self) -> BoxStream<'static, AppResult<Bytes>> {
        self.body
    }

    /// buffers the body as utf-8, bounded by `max_bytes`
    pub async fn into_text(self, max_bytes: usize, cancel: &CancellationToken) -> AppResult<String> {
        let mut body = self.body;
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = cancel
            .run_until_cancelled(body.next())
            .await
            .ok_or(Error::Timeout)?
        {
            let chunk = chunk?;
            if buffer.len() + chunk.len() > max_bytes {
                return Err(Error::UnexpectedError(format!(
                    "manifest larger than {} bytes",
                    max_bytes
                )));
            }
            buffer.extend_from_slice(&chunk);
        }

        String::from_utf8(buffer)
            .map_err(|e| Error::UnexpectedError(format!("manifest is not utf-8: {}", e)))
    }
}

pub type DynManifestService = Arc<dyn ManifestServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait ManifestServiceTrait {
    async fn fetch_manifest(
        &self,
        kind: PlaylistKind,
        id: &str,
        incoming_query: &[(String, String)],
        token: &PlaybackAccessToken,
        cancel: &CancellationToken,
    ) -> AppResult<UpstreamManifest>;
}

/// signs and fetches manifests from the usher cdn
pub struct UsherManifestService {
    http: reqwest::Client,
    usher_url: String,
    client_id: String,
    headers: HeaderMap,
}

impl UsherManifestService {
    pub fn new(http: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            http,
            usher_url: config.usher_url.trim_end_matches('/').to_string(),
            client_id: config.twitch_client_id.clone(),
            headers: browser_headers(&config.twitch_client_id, config.device_id.as_deref()),
        }
    }

    /// Final signed manifest url.
    ///
    /// The client's parameters are forwarded as is except `auth` (and `vod_id` for vods),
    /// then `token`/`sig` are replaced by the fresh access token. Vods also carry the
    /// public `client_id`.
    pub fn manifest_url(
        &self,
        kind: PlaylistKind,
        id: &str,
        incoming_query: &[(String, String)],
        token: &PlaybackAccessToken,
    ) -> AppResult<Url> {
        let path = match kind {
            PlaylistKind::Stream => format!("{}/api/channel/hls/{}.m3u8", self.usher_url, id),
            PlaylistKind::Vod => format!("{}/vod/{}.m3u8", self.usher_url, id),
        };

        let mut url = Url::parse(&path)
            .map_err(|e| Error::UnexpectedError(format!("invalid manifest url {}: {}", path, e)))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();

            for (key, value) in incoming_query {
                let skip = match key.as_str() {
                    AUTH_PARAM | TOKEN_PARAM | SIG_PARAM => true,
                    VOD_ID_PARAM | CLIENT_ID_PARAM => kind == PlaylistKind::Vod,
                    _ => false,
                };
                if !skip {
                    pairs.append_pair(key, value);
                }
            }

            pairs.append_pair(TOKEN_PARAM, &token.value);
            pairs.append_pair(SIG_PARAM, &token.signature);

            if kind == PlaylistKind::Vod {
                pairs.append_pair(CLIENT_ID_PARAM, &self.client_id);
            }
        }

        Ok(url)
    }

    /// usher error bodies look like `[{"url": .., "error": .., "error_code": ..}]`, only the
    /// codes are safe to hand back
    pub fn summarize_error_body(body: &[u8]) -> String {
        let Ok(serde_json::Value::Array(entries)) = serde_json::from_slice(body) else {
            return String::new();
        };

        entries
            .iter()
            .filter_map(|entry| entry.get("error_code").and_then(|c| c.as_str()))
            .filter(|code| code.len() <= 64)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl ManifestServiceTrait for UsherManifestService {
    async fn fetch_manifest(
        &self,
        kind: PlaylistKind,
        id: &str,
        incoming_query: &[(String, String)],
        token: &PlaybackAccessToken,
        cancel: &CancellationToken,
    ) -> AppResult<UpstreamManifest> {
        let url = self.manifest_url(kind, id, incoming_query, token)?;

        debug!("fetching {} manifest for {}", kind.as_str(), id);

        // send() resolves once the headers are in, the body is streamed from here on
        let response = until_cancelled(cancel, async {
            self.http
                .get(url)
                .headers(self.headers.clone())
                .send()
                .await
                .map_err(|e| map_transport_error("manifest request failed", e))
        })
        .await?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(Error::StreamNotFound);
        }

        if !status.is_success() {
            let mut body = response.bytes_stream().boxed();
            let mut error_body: Vec<u8> = Vec::new();
            while error_body.len() < MAX_ERROR_BODY_BYTES {
                match cancel.run_until_cancelled(body.next()).await {
                    Some(Some(Ok(chunk))) => error_body.extend_from_slice(&chunk),
                    Some(None) | Some(Some(Err(_))) => break,
                    None => return Err(Error::Timeout),
                }
            }

            let detail = Self::summarize_error_body(&error_body);
            warn!(
                "usher answered {} for {} {} ({})",
                status,
                kind.as_str(),
                id,
                detail
            );
            return Err(Error::PlaylistNotReceived {
                status: status.as_u16(),
                detail,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| map_transport_error("failed to read manifest", e)))
            .boxed();

        Ok(UpstreamManifest::new(content_type, body))
    }
}
