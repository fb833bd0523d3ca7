use config::{Config, Environment, File};
use percept_foundation::AppError;
use percept_link::DEFAULT_MODEL;
use serde::Deserialize;
use std::path::Path;

/// Runtime settings for the percept binary.
///
/// Sources, later overriding earlier: `config/default.toml` (or an explicit
/// path), then `PERCEPT_*` environment variables (`PERCEPT_DEVICE`,
/// `PERCEPT_CONNECT_TIMEOUT_MS`, ...). The service credential may also come
/// from the bare `API_KEY` variable, which wins only when nothing else set it.
#[derive(Debug, Deserialize)]
pub struct Settings {
    pub api_key: Option<String>,
    pub device: Option<String>,
    pub model: String,
    pub connect_timeout_ms: u64,
    pub video_poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_key: None,
            device: None,
            model: DEFAULT_MODEL.to_string(),
            connect_timeout_ms: 10_000,
            video_poll_interval_ms: 1_000,
        }
    }
}

impl Settings {
    /// Load settings from a specific config file path (for tests and --config)
    pub fn from_path(config_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let builder = Self::builder_with_defaults()
            .add_source(File::from(config_path.as_ref()).required(true));
        Self::finish(builder)
    }

    pub fn load() -> Result<Self, AppError> {
        let mut builder = Self::builder_with_defaults();

        let config_path = Path::new("config/default.toml");
        if config_path.exists() {
            tracing::info!("Loading configuration from: {}", config_path.display());
            builder = builder.add_source(File::from(config_path).required(true));
        } else {
            tracing::debug!(
                "No configuration file at 'config/default.toml'. Using defaults and environment variables."
            );
        }

        Self::finish(builder)
    }

    fn builder_with_defaults() -> config::ConfigBuilder<config::builder::DefaultState> {
        // Defaults for required fields so deserialization succeeds without a file.
        Config::builder()
            .set_default("model", DEFAULT_MODEL)
            .unwrap()
            .set_default("connect_timeout_ms", 10_000_u64)
            .unwrap()
            .set_default("video_poll_interval_ms", 1_000_u64)
            .unwrap()
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, AppError> {
        let builder = builder.add_source(Environment::with_prefix("PERCEPT").separator("__"));

        let config = builder
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build config: {}", e)))?;
        let mut settings: Settings = config
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to deserialize settings: {}", e)))?;

        if settings.api_key.is_none() {
            settings.api_key = std::env::var("API_KEY").ok();
        }
        settings.validate();
        Ok(settings)
    }

    /// Normalizes out-of-range values rather than failing startup.
    pub fn validate(&mut self) {
        if let Some(key) = &self.api_key {
            if key.is_empty() {
                self.api_key = None;
            }
        }
        if self.model.is_empty() {
            tracing::warn!("Empty model name. Defaulting to '{}'.", DEFAULT_MODEL);
            self.model = DEFAULT_MODEL.to_string();
        }
        if self.connect_timeout_ms == 0 {
            tracing::warn!("connect_timeout_ms must be >0. Defaulting to 10000.");
            self.connect_timeout_ms = 10_000;
        }
        if self.video_poll_interval_ms == 0 {
            tracing::warn!("video_poll_interval_ms must be >0. Defaulting to 1000.");
            self.video_poll_interval_ms = 1_000;
        }
    }
}

pub mod loopback;
pub mod session;
pub mod ui;
