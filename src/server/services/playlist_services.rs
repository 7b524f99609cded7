use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    database::{DynSettingsStore, LOGGING_PLAYLISTS, REMOVE_ADS},
    server::{
        dtos::playlist_dto::{PlaylistKind, PlaylistRequest},
        error::{AppResult, Error},
        services::{
            access_token_services::DynAccessTokenService,
            manifest_services::{DynManifestService, UpstreamManifest},
            rate_limit_services::{DynRateLimitService, RateLimitResult},
        },
        utils::ad_filter_utils::strip_ads_with_report,
    },
};

/// what goes back to the client
#[derive(Debug)]
pub enum PlaylistBody {
    /// buffered and possibly filtered manifest
    Text(String),
    /// untouched upstream body, only when nothing needs to read it
    Stream(UpstreamManifest),
}

/// rate check -> token -> manifest -> filter, every request runs the full chain
pub struct PlaylistService {
    rate_limit: DynRateLimitService,
    tokens: DynAccessTokenService,
    manifests: DynManifestService,
    settings: DynSettingsStore,
    deadline: Duration,
    max_manifest_bytes: usize,
}

impl PlaylistService {
    pub fn new(
        rate_limit: DynRateLimitService,
        tokens: DynAccessTokenService,
        manifests: DynManifestService,
        settings: DynSettingsStore,
        config: &AppConfig,
    ) -> Self {
        Self {
            rate_limit,
            tokens,
            manifests,
            settings,
            deadline: Duration::from_secs(config.upstream_timeout_seconds.max(1)),
            max_manifest_bytes: config.max_manifest_bytes,
        }
    }

    pub async fn get_playlist(
        &self,
        request: &PlaylistRequest,
        cancel: &CancellationToken,
    ) -> AppResult<PlaylistBody> {
        let kind = request.kind.as_str();
        metrics::counter!("playlist_requests_total", "kind" => kind).increment(1);

        let result = match tokio::time::timeout(self.deadline, self.run(request, cancel)).await {
            Ok(result) => result,
            Err(_) => {
                // anything still in flight upstream stops here too
                cancel.cancel();
                Err(Error::Timeout)
            }
        };

        if let Err(e) = &result {
            metrics::counter!(
                "playlist_failures_total",
                "kind" => kind,
                "error" => e.kind().as_str()
            )
            .increment(1);

            match e {
                Error::Timeout => debug!("{} {} timed out or was cancelled", kind, request.id),
                Error::UnexpectedError(_) => {}
                other => warn!("{} {} failed: {}", kind, request.id, other),
            }
        }

        result
    }

    async fn run(
        &self,
        request: &PlaylistRequest,
        cancel: &CancellationToken,
    ) -> AppResult<PlaylistBody> {
        if let RateLimitResult::Banned { retry_after } =
            self.rate_limit.check_rate_limit(&request.identity).await
        {
            return Err(Error::RateLimited { retry_after });
        }

        let token = match request.kind {
            PlaylistKind::Stream => self.tokens.get_stream_token(&request.id, cancel).await?,
            PlaylistKind::Vod => self.tokens.get_vod_token(&request.id, cancel).await?,
        };

        let manifest = self
            .manifests
            .fetch_manifest(request.kind, &request.id, &request.query, &token, cancel)
            .await?;

        let remove_ads = self.settings.get_bool_setting(REMOVE_ADS, true).await;
        let log_playlists = self.settings.get_bool_setting(LOGGING_PLAYLISTS, false).await;

        if !remove_ads && !log_playlists {
            return Ok(PlaylistBody::Stream(manifest));
        }

        let text = manifest.into_text(self.max_manifest_bytes, cancel).await?;

        if log_playlists {
            info!(
                kind = request.kind.as_str(),
                id = %request.id,
                "upstream manifest:\n{}",
                text
            );
        }

        if !remove_ads {
            return Ok(PlaylistBody::Text(text));
        }

        let report = strip_ads_with_report(&text);
        if report.removed_segments > 0 || report.removed_prefetch > 0 {
            debug!(
                "stripped {} ad segments and {} prefetch entries ({} ad ranges) from {} {}",
                report.removed_segments,
                report.removed_prefetch,
                report.ad_ranges,
                request.kind.as_str(),
                request.id
            );
        }

        Ok(PlaylistBody::Text(report.manifest))
    }
}
