use std::fmt;

use serde::Deserialize;

use crate::server::error::{AppResult, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Stream,
    Vod,
}

impl PlaylistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Vod => "vod",
        }
    }
}

/// short lived credential the cdn wants on every manifest request, never stored
#[derive(Clone, PartialEq, Eq)]
pub struct PlaybackAccessToken {
    pub value: String,
    pub signature: String,
}

// keep the token itself out of the logs
impl fmt::Debug for PlaybackAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackAccessToken")
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .field("signature", &format_args!("<{} bytes>", self.signature.len()))
            .finish()
    }
}

/// the platform's own token json the player sends along as `?token=`
#[derive(Debug, Clone, Deserialize)]
pub struct ClientTokenContext {
    pub channel: Option<String>,
    pub user_ip: Option<String>,
}

/// everything the orchestrator needs for one manifest request
#[derive(Debug, Clone)]
pub struct PlaylistRequest {
    pub kind: PlaylistKind,
    /// channel login for streams, numeric id for vods
    pub id: String,
    /// rate limit key, normally the client ip
    pub identity: String,
    /// the client's query, in order, still containing secrets
    pub query: Vec<(String, String)>,
}

impl PlaylistRequest {
    /// `GET /playlist?token=<json>&...`
    pub fn stream(raw_query: Option<&str>, identity: Option<String>) -> AppResult<Self> {
        let query = parse_query(raw_query)?;

        let token = query_value(&query, "token")
            .ok_or_else(|| Error::BadRequest("missing token".to_string()))?;

        let context: ClientTokenContext = serde_json::from_str(token)
            .map_err(|_| Error::BadRequest("malformed token".to_string()))?;

        let channel = context
            .channel
            .as_deref()
            .map(str::trim)
            .filter(|c| is_valid_channel(c))
            .ok_or_else(|| Error::BadRequest("missing or invalid channel".to_string()))?
            .to_ascii_lowercase();

        let identity = identity
            .or(context.user_ip)
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            kind: PlaylistKind::Stream,
            id: channel,
            identity,
            query,
        })
    }

    /// `GET /playlist/vod?vod_id=<id>&...`
    pub fn vod(raw_query: Option<&str>, identity: Option<String>) -> AppResult<Self> {
        let query = parse_query(raw_query)?;

        let vod_id = query_value(&query, "vod_id")
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.len() <= 20 && id.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| Error::BadRequest("missing or invalid vod_id".to_string()))?
            .to_string();

        Ok(Self {
            kind: PlaylistKind::Vod,
            id: vod_id,
            identity: identity
                .filter(|i| !i.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            query,
        })
    }
}

/// logins are ascii letters, digits and underscores, anything else would end up in the
/// upstream path
pub fn is_valid_channel(channel: &str) -> bool {
    !channel.is_empty()
        && channel.len() <= 64
        && channel
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn parse_query(raw_query: Option<&str>) -> AppResult<Vec<(String, String)>> {
    let raw_query = raw_query
        .filter(|q| !q.is_empty())
        .ok_or_else(|| Error::BadRequest("missing query".to_string()))?;

    Ok(url::form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect())
}

fn query_value<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
