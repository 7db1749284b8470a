use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bearer token for authentication (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_port() -> u16 {
    8090
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            auth_token: None,
        }
    }
}

/// Scheduler engine timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Upper bound for a single start/stop/status call.
    #[serde(default = "default_controller_timeout")]
    pub controller_timeout_secs: u64,
    /// Consecutive failed ticks before the engine logs at error level.
    #[serde(default = "default_escalate_after")]
    pub escalate_after: u32,
}

fn default_tick_interval() -> u64 {
    30
}

fn default_controller_timeout() -> u64 {
    5
}

fn default_escalate_after() -> u32 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            controller_timeout_secs: default_controller_timeout(),
            escalate_after: default_escalate_after(),
        }
    }
}

/// External capture process settings.
///
/// `args` may contain `{output}`, which is replaced with the path of the
/// file the capture should write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Directory recordings are written to. Defaults to `<config dir>/recordings`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// chrono format string for output file names.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    /// Line written to the process's stdin to ask it to finish cleanly.
    /// Empty means just close stdin.
    #[serde(default = "default_stop_input")]
    pub stop_input: String,
    /// Seconds to wait for a clean exit before the process is killed.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

fn default_program() -> String {
    "ffmpeg".to_string()
}

fn default_args() -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-i",
        "rtmp://127.0.0.1/live/stream",
        "-c",
        "copy",
        "{output}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_file_pattern() -> String {
    "recording_%Y%m%d_%H%M%S.mp4".to_string()
}

fn default_stop_input() -> String {
    "q".to_string()
}

fn default_stop_grace() -> u64 {
    3
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            output_dir: None,
            file_pattern: default_file_pattern(),
            stop_input: default_stop_input(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

/// Top-level streamrec configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamRecConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    /// SQLite database path. Defaults to `<config dir>/streamrec.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

impl StreamRecConfig {
    /// Reject settings that cannot work together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // The engine abandons a stop call after the controller timeout, which
        // would kill the capture before it finished writing.
        let timeout = self.scheduler.controller_timeout_secs.max(1);
        if self.recorder.stop_grace_secs >= timeout {
            return Err(ConfigError::Invalid(format!(
                "recorder.stop_grace_secs ({}) must be less than scheduler.controller_timeout_secs ({timeout})",
                self.recorder.stop_grace_secs
            )));
        }
        Ok(())
    }

    /// Resolve the database path, creating the config directory if needed.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(ensure_config_dir()?.join("streamrec.db")),
        }
    }

    /// Resolve the recording output directory.
    pub fn recordings_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.recorder.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_dir()?.join("recordings")),
        }
    }
}

/// Resolve the streamrec config directory (~/.streamrec/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".streamrec"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.streamrec/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<StreamRecConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<StreamRecConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(StreamRecConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: StreamRecConfig = json5::from_str(&content)?;
    config.validate()?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
