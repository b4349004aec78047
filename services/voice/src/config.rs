use tracing::Level;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";
pub const DEFAULT_REALTIME_BASE_URL: &str = "https://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2025-06-03";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Holds the voice client's configuration, loaded from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// The `wanda-api` process: credential minting and content.
    pub server_url: String,
    /// Realtime endpoint that answers session description offers.
    pub realtime_base_url: String,
    /// Used when the minted credential names no model.
    pub realtime_model: String,
    pub stun_url: String,
    pub log_level: Level,
}

fn http_url(var: &str, default: &str) -> Result<String, ConfigError> {
    let value = std::env::var(var).unwrap_or_else(|_| default.to_string());
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("'{}' is not an http(s) URL", value),
        ));
    }
    Ok(value.trim_end_matches('/').to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let server_url = http_url("WANDA_SERVER_URL", DEFAULT_SERVER_URL)?;
        let realtime_base_url = http_url("REALTIME_BASE_URL", DEFAULT_REALTIME_BASE_URL)?;
        let realtime_model =
            std::env::var("REALTIME_MODEL").unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string());

        let stun_url = std::env::var("STUN_URL").unwrap_or_else(|_| DEFAULT_STUN_URL.to_string());
        if !stun_url.starts_with("stun:") && !stun_url.starts_with("turn:") {
            return Err(ConfigError::InvalidValue(
                "STUN_URL".to_string(),
                format!("'{}' is not a stun: or turn: URL", stun_url),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "WARN".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            server_url,
            realtime_base_url,
            realtime_model,
            stun_url,
            log_level,
        })
    }
}
