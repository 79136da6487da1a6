use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Activity sink backend. `None` disables persistence entirely.
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub pending_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PERISCOPE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4310),
            redis_url: env::var("REDIS_URL").ok(),
            jwt_secret: env::var("PERISCOPE_JWT_SECRET")
                .unwrap_or_else(|_| "periscope-dev-secret".to_string()),
            pending_timeout_ms: env::var("PERISCOPE_PENDING_TIMEOUT_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(30_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4310,
            redis_url: None,
            jwt_secret: "periscope-dev-secret".to_string(),
            pending_timeout_ms: 30_000,
        }
    }
}
