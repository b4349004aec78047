use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2025-06-03";
pub const DEFAULT_REALTIME_VOICE: &str = "verse";
pub const DEFAULT_REALTIME_SESSIONS_URL: &str = "https://api.openai.com/v1/realtime/sessions";

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    /// Base URL of the Ask Wanda content API.
    pub wanda_api_url: String,
    pub wanda_api_token: Option<String>,
    pub realtime_sessions_url: String,
    pub realtime_model: String,
    pub realtime_voice: String,
    pub log_level: Level,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("wanda_api_url", &self.wanda_api_url)
            .field("realtime_sessions_url", &self.realtime_sessions_url)
            .field("realtime_model", &self.realtime_model)
            .field("realtime_voice", &self.realtime_voice)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let wanda_api_url = std::env::var("ASK_WANDA_API_URL")
            .map_err(|_| ConfigError::MissingVar("ASK_WANDA_API_URL".to_string()))?;
        if !wanda_api_url.starts_with("http://") && !wanda_api_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "ASK_WANDA_API_URL".to_string(),
                format!("'{}' is not an http(s) URL", wanda_api_url),
            ));
        }
        let wanda_api_url = wanda_api_url.trim_end_matches('/').to_string();
        let wanda_api_token = std::env::var("ASK_WANDA_API_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        let realtime_sessions_url = std::env::var("REALTIME_SESSIONS_URL")
            .unwrap_or_else(|_| DEFAULT_REALTIME_SESSIONS_URL.to_string());
        let realtime_model =
            std::env::var("REALTIME_MODEL").unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string());
        let realtime_voice =
            std::env::var("REALTIME_VOICE").unwrap_or_else(|_| DEFAULT_REALTIME_VOICE.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            wanda_api_url,
            wanda_api_token,
            realtime_sessions_url,
            realtime_model,
            realtime_voice,
            log_level,
        })
    }
}
