use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    config::AppConfig,
    server::{
        dtos::{
            access_token_dto::{
                PlaybackAccessTokenRequest, PlaybackAccessTokenResponse,
                PlaybackAccessTokenVariables,
            },
            playlist_dto::{PlaybackAccessToken, PlaylistKind},
        },
        error::{AppResult, Error},
        utils::{
            browser_profile_utils::browser_headers,
            cancellation_utils::{map_transport_error, until_cancelled},
        },
    },
};

pub const OPERATION_NAME: &str = "PlaybackAccessToken_Template";

// both branches are always declared, the @include flags decide which one the server fills
pub const PLAYBACK_ACCESS_TOKEN_QUERY: &str = "query PlaybackAccessToken_Template($login: String!, $isLive: Boolean!, $vodID: ID!, $isVod: Boolean!, $playerType: String!, $platform: String!) {  streamPlaybackAccessToken(channelName: $login, params: {platform: $platform, playerBackend: \"mediaplayer\", playerType: $playerType}) @include(if: $isLive) {    value    signature   authorization { isForbidden forbiddenReasonCode }   __typename  }  videoPlaybackAccessToken(id: $vodID, params: {platform: $platform, playerBackend: \"mediaplayer\", playerType: $playerType}) @include(if: $isVod) {    value    signature   __typename  }}";

pub type DynAccessTokenService = Arc<dyn AccessTokenServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait AccessTokenServiceTrait {
    async fn get_stream_token(
        &self,
        channel: &str,
        cancel: &CancellationToken,
    ) -> AppResult<PlaybackAccessToken>;

    async fn get_vod_token(
        &self,
        vod_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<PlaybackAccessToken>;
}

/// exchanges a channel or vod id for a (token, signature) pair over gql
///
/// never retries, a missing token nearly always means the channel is offline or restricted
/// and hammering the endpoint only gets the server rate limited
pub struct GqlAccessTokenService {
    http: reqwest::Client,
    gql_url: String,
    headers: HeaderMap,
}

impl GqlAccessTokenService {
    pub fn new(http: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            http,
            gql_url: config.gql_url.clone(),
            headers: browser_headers(&config.twitch_client_id, config.device_id.as_deref()),
        }
    }

    pub fn token_request(kind: PlaylistKind, id: &str) -> PlaybackAccessTokenRequest {
        let is_live = kind == PlaylistKind::Stream;

        PlaybackAccessTokenRequest {
            operation_name: OPERATION_NAME,
            query: PLAYBACK_ACCESS_TOKEN_QUERY,
            variables: PlaybackAccessTokenVariables {
                is_live,
                login: if is_live { id.to_string() } else { String::new() },
                is_vod: !is_live,
                vod_id: if is_live { String::new() } else { id.to_string() },
                player_type: "site",
                platform: "web",
            },
        }
    }

    /// pulls value + signature out of a gql reply
    pub fn extract_token(kind: PlaylistKind, body: &[u8]) -> AppResult<PlaybackAccessToken> {
        let response: PlaybackAccessTokenResponse = serde_json::from_slice(body).map_err(|e| {
            Error::UnexpectedError(format!("failed to parse access token response: {}", e))
        })?;

        if let Some(errors) = &response.errors {
            let messages: Vec<&str> = errors.iter().filter_map(|e| e.message.as_deref()).collect();
            warn!("gql returned errors for {} token: {:?}", kind.as_str(), messages);
        }

        let raw = response.data.and_then(|data| match kind {
            PlaylistKind::Stream => data.stream_playback_access_token,
            PlaylistKind::Vod => data.video_playback_access_token,
        });

        match raw {
            Some(raw) => match (raw.value, raw.signature) {
                (Some(value), Some(signature)) if !value.is_empty() && !signature.is_empty() => {
                    Ok(PlaybackAccessToken { value, signature })
                }
                _ => Err(Error::ServerTokenNotFound),
            },
            None => Err(Error::ServerTokenNotFound),
        }
    }

    async fn request_token(
        &self,
        kind: PlaylistKind,
        id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<PlaybackAccessToken> {
        let request = Self::token_request(kind, id);

        let response = until_cancelled(cancel, async {
            self.http
                .post(&self.gql_url)
                .headers(self.headers.clone())
                .json(&request)
                .send()
                .await
                .map_err(|e| map_transport_error("access token request failed", e))
        })
        .await?;

        let status = response.status();

        let body = until_cancelled(cancel, async {
            response
                .bytes()
                .await
                .map_err(|e| map_transport_error("failed to read access token response", e))
        })
        .await?;

        if !status.is_success() {
            warn!("gql answered {} for {} {}", status, kind.as_str(), id);
        }

        let token = Self::extract_token(kind, &body);
        match &token {
            Ok(_) => debug!("got {} access token for {}", kind.as_str(), id),
            Err(Error::ServerTokenNotFound) => {
                error!(
                    "no [value, signature] in access token response for {} {}: {}",
                    kind.as_str(),
                    id,
                    String::from_utf8_lossy(&body)
                );
            }
            Err(_) => {}
        }

        token
    }
}

#[async_trait]
impl AccessTokenServiceTrait for GqlAccessTokenService {
    async fn get_stream_token(
        &self,
        channel: &str,
        cancel: &CancellationToken,
    ) -> AppResult<PlaybackAccessToken> {
        self.request_token(PlaylistKind::Stream, channel, cancel)
            .await
    }

    async fn get_vod_token(
        &self,
        vod_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<PlaybackAccessToken> {
        self.request_token(PlaylistKind::Vod, vod_id, cancel).await
    }
}
