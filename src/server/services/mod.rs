pub mod access_token_services;
pub mod edge_services;
pub mod manifest_services;
pub mod playlist_services;
pub mod rate_limit_services;

pub use access_token_services::DynAccessTokenService;
pub use manifest_services::DynManifestService;
pub use rate_limit_services::DynRateLimitService;
