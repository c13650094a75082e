use crate::error::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub backend: BackendPolicy,

    #[serde(default)]
    pub extension: ExtensionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Server-side backend settings. These come from the operator's config file
/// only and are never taken from extension parameters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BackendPolicy {
    #[serde(default = "default_backend_url")]
    pub url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    #[serde(default = "default_true")]
    pub use_vad: bool,

    #[serde(default = "default_send_last_n_segments")]
    pub send_last_n_segments: u32,

    #[serde(default = "default_no_speech_thresh")]
    pub no_speech_thresh: f32,
}

impl BackendPolicy {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

impl Default for BackendPolicy {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            model: default_model(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            batch_interval_ms: default_batch_interval_ms(),
            use_vad: default_true(),
            send_last_n_segments: default_send_last_n_segments(),
            no_speech_thresh: default_no_speech_thresh(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtensionConfig {
    #[serde(default = "default_extension_name")]
    pub name: String,

    #[serde(default = "default_result_buffer")]
    pub result_buffer: usize,

    /// Client-facing parameters handed to the extension factory as-is.
    #[serde(default = "empty_table")]
    pub params: toml::Value,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            name: default_extension_name(),
            result_buffer: default_result_buffer(),
            params: empty_table(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_backend_url() -> String {
    "ws://127.0.0.1:9090".to_string()
}

fn default_model() -> String {
    "small".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_batch_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_send_last_n_segments() -> u32 {
    10
}

fn default_no_speech_thresh() -> f32 {
    0.45
}

fn default_extension_name() -> String {
    "whisper".to_string()
}

fn default_result_buffer() -> usize {
    64
}

fn empty_table() -> toml::Value {
    toml::Value::Table(Default::default())
}

/// Interpolate `${VAR}` patterns with environment variable values.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let val = std::env::var(var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
        result = result.replace(&cap[0], &val);
    }

    Ok(result)
}

impl AppConfig {
    /// Load configuration from a TOML file, with environment variable interpolation.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(s)?;
        let config: AppConfig = toml::from_str(&interpolated)?;
        Ok(config)
    }
}
