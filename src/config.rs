use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Service configuration, loaded from CLI/env and optionally a TOML file
///
/// Example configuration file content
/// # still-loop configuration
///
/// listen_on_port = 5000
/// workspace = "./data"
/// max_upload_size = 5242880     # bytes
/// request_timeout_secs = 120
/// permits = 0                   # 0 = no limit on concurrent encoders
/// ffmpeg_bin = "/usr/bin/ffmpeg"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Working directory holding `uploads/` and `temp/`
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Maximum accepted image size in bytes
    #[arg(long, default_value_t = 5 * 1024 * 1024)]
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 120)]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Number of concurrent encoder processes (0 = unlimited)
    #[arg(short, long, default_value_t = 0)]
    #[serde(default = "default_permits")]
    pub permits: usize,

    /// Encoder binary to invoke
    #[arg(long, default_value = "ffmpeg")]
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            workspace: default_workspace(),
            max_upload_size: default_max_upload_size(),
            request_timeout_secs: default_request_timeout_secs(),
            permits: default_permits(),
            ffmpeg_bin: default_ffmpeg_bin(),
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // A CLI value still at its default is treated as unset
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.max_upload_size == default_max_upload_size() {
            self.max_upload_size = file_config.max_upload_size;
        }
        if self.request_timeout_secs == default_request_timeout_secs() {
            self.request_timeout_secs = file_config.request_timeout_secs;
        }
        if self.permits == default_permits() {
            self.permits = file_config.permits;
        }
        if self.ffmpeg_bin == default_ffmpeg_bin() {
            self.ffmpeg_bin = file_config.ffmpeg_bin;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_size == 0 {
            return Err(anyhow::anyhow!("max_upload_size must be greater than 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "request_timeout_secs must be greater than 0"
            ));
        }
        if self.ffmpeg_bin.trim().is_empty() {
            return Err(anyhow::anyhow!("ffmpeg_bin cannot be empty"));
        }

        Ok(())
    }
}

// Default value functions
fn default_port() -> u16 {
    5000
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_max_upload_size() -> u64 {
    5 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_permits() -> usize {
    0
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}
