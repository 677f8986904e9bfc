#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum CargoEnv {
    Development,
    Production,
}

/// where session state ends up, picked once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// managed REST key-value store (the one a vercel deployment hands you)
    Managed { url: String, token: String },
    /// plain redis / valkey
    Redis(String),
    /// process-local maps, everything is gone after a restart
    Memory,
}

#[derive(clap::Parser, Debug, Clone)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // port that the app will bind to, always on 0.0.0.0
    #[clap(long, env, default_value = "6760")]
    pub port: u16,

    // the origin players should use to reach us. If this isn't set the Host header of each
    // request is used with https in front of it
    #[clap(long, env)]
    pub public_origin: Option<String>,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // redis url for session caching, optional
    #[clap(long, env)]
    pub redis_url: Option<String>,

    // set by the platform on distributed deployments, selects the managed kv store below
    #[clap(long, env)]
    pub vercel: Option<String>,

    #[clap(long, env)]
    pub kv_rest_api_url: Option<String>,

    #[clap(long, env)]
    pub kv_rest_api_token: Option<String>,

    // session token negotiation endpoints for the one upstream that needs them
    #[clap(
        long,
        env,
        default_value = "https://secure.bigcoolersonline.top/init-session"
    )]
    pub session_init_url: String,

    #[clap(long, env, default_value = "https://secure.bigcoolersonline.top/check")]
    pub session_check_url: String,

    #[clap(long, env, default_value = "rr.vipstreams.in")]
    pub session_host: String,

    #[clap(long, env, default_value = "60")]
    pub fetch_timeout_secs: u64,

    #[clap(long, env, default_value = "7")]
    pub check_timeout_secs: u64,

    #[clap(long, env, default_value = "10")]
    pub max_redirects: usize,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    /// managed store wins when the deployment marker and both rest settings are around, then
    /// redis, then the in-memory fallback
    pub fn storage_backend(&self) -> StorageBackend {
        if self.vercel.is_some() {
            match (&self.kv_rest_api_url, &self.kv_rest_api_token) {
                (Some(url), Some(token)) => {
                    return StorageBackend::Managed {
                        url: url.clone(),
                        token: token.clone(),
                    };
                }
                _ => tracing::warn!(
                    "deployment marker set but KV_REST_API_URL / KV_REST_API_TOKEN missing, skipping managed store"
                ),
            }
        }

        match &self.redis_url {
            Some(url) if !url.trim().is_empty() => StorageBackend::Redis(url.clone()),
            _ => StorageBackend::Memory,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 6760,
            public_origin: None,
            cors_origin: "*".to_string(),
            redis_url: None,
            vercel: None,
            kv_rest_api_url: None,
            kv_rest_api_token: None,
            session_init_url: "https://secure.bigcoolersonline.top/init-session".to_string(),
            session_check_url: "https://secure.bigcoolersonline.top/check".to_string(),
            session_host: "rr.vipstreams.in".to_string(),
            fetch_timeout_secs: 60,
            check_timeout_secs: 7,
            max_redirects: 10,
            sentry_dsn: None,
        }
    }
}
