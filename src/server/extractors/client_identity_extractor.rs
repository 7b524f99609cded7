use std::net::{IpAddr, SocketAddr};

use axum::Extension;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use tracing::debug;

use crate::server::error::Error;
use crate::server::services::edge_services::EdgeServices;

/// rate limit identity of the caller (none when nothing identifies it) plus the services
pub struct ClientIdentity(pub Option<String>, pub EdgeServices);

/// who the gate counts a request against. with no trusted proxies that's the socket peer and
/// forwarded headers are ignored, the client writes them. behind `trusted_hops` proxies it's the
/// X-Forwarded-For entry that many hops from the right (the address our outermost proxy saw),
/// then X-Real-IP, then the peer
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_hops: usize,
) -> Option<String> {
    let peer = peer.map(|addr| addr.ip());

    if trusted_hops == 0 {
        return peer.map(|ip| ip.to_string());
    }

    let forwarded: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    // a chain shorter than the configured hops was written entirely by our proxies
    let from_proxies = forwarded
        .get(forwarded.len().saturating_sub(trusted_hops))
        .and_then(|s| s.parse::<IpAddr>().ok());

    from_proxies
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        })
        .or(peer)
        .map(|ip| ip.to_string())
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(services): Extension<EdgeServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| Error::UnexpectedError(err.to_string()))?;

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);

        let identity = client_ip(&parts.headers, peer, services.config.trusted_proxy_hops);
        debug!("client identity: {:?}", identity);

        Ok(ClientIdentity(identity, services))
    }
}
