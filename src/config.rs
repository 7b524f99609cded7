#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // optional redis, without it settings come from the env and rate limits live in memory
    #[clap(long, env)]
    pub redis_url: Option<String>,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,

    // graphql endpoint that hands out playback access tokens
    #[clap(long, env, default_value = "https://gql.twitch.tv/gql")]
    pub gql_url: String,

    // cdn host serving the signed manifests
    #[clap(long, env, default_value = "https://usher.ttvnw.net")]
    pub usher_url: String,

    // public web client id, sent to gql and on vod manifest queries
    #[clap(long, env, default_value = "kimne78kx3ncx6brgo4mv6wki5h1ko")]
    pub twitch_client_id: String,

    #[clap(long, env)]
    pub device_id: Option<String>,

    // deadline for the whole token + manifest round trip
    #[clap(long, env, default_value = "10")]
    pub upstream_timeout_seconds: u64,

    #[clap(long, env, default_value = "8388608")]
    pub max_manifest_bytes: usize,

    #[clap(long, env, default_value = "100")]
    pub rate_limit_max_requests: u32,

    #[clap(long, env, default_value = "60")]
    pub rate_limit_window_seconds: u64,

    #[clap(long, env, default_value = "300")]
    pub rate_limit_ban_seconds: u64,

    // reverse proxies in front of the edge that append to X-Forwarded-For. 0 means the socket
    // peer is the client and forwarded headers are ignored
    #[clap(long, env, default_value = "0")]
    pub trusted_proxy_hops: usize,

    // fallbacks for the settings store, redis values win when it's configured
    #[clap(long, env, default_value = "true", action = clap::ArgAction::Set)]
    pub remove_ads: bool,

    #[clap(long, env, default_value = "false", action = clap::ArgAction::Set)]
    pub log_playlists: bool,
}

impl Default for AppConfig {
    // mostly used by tests, the real values come from clap
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 5000,
            redis_url: None,
            cors_origin: "*".to_string(),
            sentry_dsn: None,
            gql_url: "https://gql.twitch.tv/gql".to_string(),
            usher_url: "https://usher.ttvnw.net".to_string(),
            twitch_client_id: "kimne78kx3ncx6brgo4mv6wki5h1ko".to_string(),
            device_id: None,
            upstream_timeout_seconds: 10,
            max_manifest_bytes: 8 * 1024 * 1024,
            rate_limit_max_requests: 100,
            rate_limit_window_seconds: 60,
            rate_limit_ban_seconds: 300,
            trusted_proxy_hops: 0,
            remove_ads: true,
            log_playlists: false,
        }
    }
}
