use std::io::Write;

use axum::{
    Router,
    body::Body,
    extract::RawQuery,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use flate2::{Compression, write::GzEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span};

use crate::server::{
    dtos::playlist_dto::PlaylistRequest,
    error::{AppResult, Error},
    extractors::ClientIdentity,
    services::{
        edge_services::EdgeServices,
        manifest_services::UpstreamManifest,
        playlist_services::PlaylistBody,
    },
};

const M3U8_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Clone, Copy, PartialEq)]
enum ContentEncoding {
    Zstd,
    Gzip,
    Identity,
}

impl ContentEncoding {
    /// picks zstd over gzip, anything listed with q=0 is treated as refused
    /// hls.js and safari mostly send "gzip, deflate" or nothing at all
    fn from_accept_encoding(accept_encoding: Option<&str>) -> Self {
        let Some(accept_encoding) = accept_encoding else {
            return Self::Identity;
        };

        let accepted: Vec<&str> = accept_encoding
            .split(',')
            .filter_map(|entry| {
                let mut parts = entry.split(';').map(str::trim);
                let coding = parts.next()?;
                let refused = parts.any(|p| {
                    p.strip_prefix("q=")
                        .and_then(|q| q.parse::<f32>().ok())
                        .is_some_and(|q| q <= 0.0)
                });
                (!refused && !coding.is_empty()).then_some(coding)
            })
            .collect();

        if accepted.iter().any(|c| c.eq_ignore_ascii_case("zstd")) {
            Self::Zstd
        } else if accepted.iter().any(|c| c.eq_ignore_ascii_case("gzip")) {
            Self::Gzip
        } else {
            Self::Identity
        }
    }

    fn as_header_value(&self) -> Option<&'static str> {
        match self {
            Self::Zstd => Some("zstd"),
            Self::Gzip => Some("gzip"),
            Self::Identity => None,
        }
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Zstd => zstd::encode_all(data, 3),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::Identity => Ok(data.to_vec()),
        }
    }
}

pub struct PlaylistController;

impl PlaylistController {
    pub fn app() -> Router {
        Router::new()
            .route("/", get(Self::stream_playlist))
            .route("/vod", get(Self::vod_playlist))
    }

    async fn stream_playlist(
        ClientIdentity(identity, services): ClientIdentity,
        RawQuery(query): RawQuery,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let request = PlaylistRequest::stream(query.as_deref(), identity)?;
        Self::serve_playlist(services, request, &headers).await
    }

    async fn vod_playlist(
        ClientIdentity(identity, services): ClientIdentity,
        RawQuery(query): RawQuery,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let request = PlaylistRequest::vod(query.as_deref(), identity)?;
        Self::serve_playlist(services, request, &headers).await
    }

    async fn serve_playlist(
        services: EdgeServices,
        request: PlaylistRequest,
        headers: &HeaderMap,
    ) -> AppResult<Response> {
        let span = info_span!(
            "playlist",
            request_id = %nanoid::nanoid!(12),
            kind = request.kind.as_str(),
            id = %request.id,
        );

        async move {
            let cancel = CancellationToken::new();
            // axum drops this future when the client hangs up, which cancels everything upstream
            let _cancel_on_drop = cancel.clone().drop_guard();

            match services.playlists.get_playlist(&request, &cancel).await? {
                PlaylistBody::Text(manifest) => Self::build_m3u8_response(&manifest, headers),
                PlaylistBody::Stream(manifest) => Ok(Self::build_stream_response(manifest)),
            }
        }
        .instrument(span)
        .await
    }

    /// buffered manifest, compressed when the client allows it
    fn build_m3u8_response(manifest: &str, headers: &HeaderMap) -> AppResult<Response> {
        let encoding = ContentEncoding::from_accept_encoding(
            headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        let body = encoding.compress(manifest.as_bytes()).map_err(|e| {
            error!("Failed to compress manifest with {:?}: {}", encoding, e);
            Error::UnexpectedError("failed to compress manifest".to_string())
        })?;

        debug!(
            "sending manifest as {:?}, {} -> {} bytes",
            encoding,
            manifest.len(),
            body.len()
        );

        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(M3U8_CONTENT_TYPE));
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response_headers.insert(header::VARY, HeaderValue::from_static("accept-encoding"));

        if let Some(value) = encoding.as_header_value() {
            response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(value));
        }

        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        Ok((StatusCode::OK, response_headers, body).into_response())
    }

    /// upstream body piped through as it arrives
    fn build_stream_response(manifest: UpstreamManifest) -> Response {
        let content_type = manifest
            .content_type
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
            .unwrap_or(HeaderValue::from_static(M3U8_CONTENT_TYPE));

        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::CONTENT_TYPE, content_type);
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        (
            StatusCode::OK,
            response_headers,
            Body::from_stream(manifest.into_body_stream()),
        )
            .into_response()
    }
}
