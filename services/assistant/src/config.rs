use openai_realtime::client::{DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL};
use openai_realtime::types::Voice;
use openai_realtime::{ClientConfig, KeepaliveConfig};
use secrecy::{ExposeSecret, SecretString};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful voice assistant. Keep answers short \
and conversational. Use the available tools when they help, and ask before deleting files.";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub openai_api_key: SecretString,
    pub realtime_url: String,
    pub realtime_model: String,
    pub voice: Voice,
    pub instructions: String,
    pub silence_threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub scratch_pad_dir: PathBuf,
    /// `None` when the runtime timing log is disabled.
    pub runtime_log_path: Option<PathBuf>,
    pub capture_queue_secs: f32,
    pub reconnect_delay: Duration,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = var_or(name, default);
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", raw, e)))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_url = var_or("REALTIME_URL", DEFAULT_REALTIME_URL);
        let realtime_model = var_or("REALTIME_MODEL", DEFAULT_REALTIME_MODEL);
        let voice = parse_var::<Voice>("REALTIME_VOICE", "alloy")?;
        let instructions = var_or("SESSION_INSTRUCTIONS", DEFAULT_INSTRUCTIONS);

        let silence_threshold = parse_var::<f32>("SILENCE_THRESHOLD", "0.5")?;
        if !(0.0..=1.0).contains(&silence_threshold) {
            return Err(ConfigError::InvalidValue(
                "SILENCE_THRESHOLD".to_string(),
                format!("{} is outside 0.0..=1.0", silence_threshold),
            ));
        }
        let prefix_padding_ms = parse_var::<u32>("PREFIX_PADDING_MS", "300")?;
        let silence_duration_ms = parse_var::<u32>("SILENCE_DURATION_MS", "400")?;

        let scratch_pad_dir = PathBuf::from(var_or("SCRATCH_PAD_DIR", "./scratchpad"));
        let runtime_log_path = Some(var_or("RUNTIME_LOG_PATH", "runtime_time_table.jsonl"))
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let capture_queue_secs = parse_var::<f32>("CAPTURE_QUEUE_SECS", "10")?;
        if capture_queue_secs.is_nan() || capture_queue_secs <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "CAPTURE_QUEUE_SECS".to_string(),
                format!("{} must be positive", capture_queue_secs),
            ));
        }
        let reconnect_delay =
            Duration::from_millis(parse_var::<u64>("RECONNECT_DELAY_MS", "1000")?);

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            openai_api_key,
            realtime_url,
            realtime_model,
            voice,
            instructions,
            silence_threshold,
            prefix_padding_ms,
            silence_duration_ms,
            scratch_pad_dir,
            runtime_log_path,
            capture_queue_secs,
            reconnect_delay,
            log_level,
        })
    }

    /// Connection settings for the realtime client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.realtime_url.clone(),
            model: self.realtime_model.clone(),
            api_key: SecretString::from(self.openai_api_key.expose_secret().to_string()),
            keepalive: KeepaliveConfig::default(),
        }
    }
}
