use serde::{Deserialize, Serialize};

/// the bits of the gql `PlaybackAccessToken` reply we care about
///
/// everything is optional because the upstream happily answers 200 with `null`s when a
/// channel is offline, banned or doesn't exist
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackAccessTokenResponse {
    pub data: Option<PlaybackAccessTokenData>,
    pub errors: Option<Vec<GqlError>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackAccessTokenData {
    pub stream_playback_access_token: Option<RawPlaybackAccessToken>,
    pub video_playback_access_token: Option<RawPlaybackAccessToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPlaybackAccessToken {
    pub value: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GqlError {
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackAccessTokenRequest {
    pub operation_name: &'static str,
    pub query: &'static str,
    pub variables: PlaybackAccessTokenVariables,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackAccessTokenVariables {
    #[serde(rename = "isLive")]
    pub is_live: bool,
    pub login: String,
    #[serde(rename = "isVod")]
    pub is_vod: bool,
    #[serde(rename = "vodID")]
    pub vod_id: String,
    #[serde(rename = "playerType")]
    pub player_type: &'static str,
    pub platform: &'static str,
}
