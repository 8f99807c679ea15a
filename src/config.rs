use crate::watch::PollConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure that can be loaded from CLI or config file
///
/// Example configuration file content
/// # Video Dispatch Configuration
///
/// # Server configuration
/// listen_on_port = 32150
/// workspace = "./data"
///
/// # GitHub API configuration
/// api_base = "https://api.github.com"
///
/// # Run watching configuration
/// locate_delay_ms = 3000
/// poll_interval_ms = 10000
/// poll_max_attempts = 30
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Port the form page and API listen on
    #[arg(short, long, default_value_t = 32150)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Working directory for persisted settings
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Configuration file path (overrides all other arguments)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Base URL of the GitHub REST API
    #[arg(long, default_value = "https://api.github.com")]
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Delay before the dispatched run is looked up, in milliseconds
    #[arg(long, default_value_t = 3_000)]
    #[serde(default = "default_locate_delay_ms")]
    pub locate_delay_ms: u64,

    /// Interval between run status checks, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of status checks before a run is declared timed out
    #[arg(long, default_value_t = 30)]
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            workspace: default_workspace(),
            config: None,
            api_base: default_api_base(),
            locate_delay_ms: default_locate_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_attempts: default_poll_max_attempts(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> anyhow::Result<Self> {
        // First parse CLI args
        let mut config = Config::parse();

        // If a config file is specified, load it and merge
        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.api_base == default_api_base() {
            self.api_base = file_config.api_base;
        }
        if self.locate_delay_ms == default_locate_delay_ms() {
            self.locate_delay_ms = file_config.locate_delay_ms;
        }
        if self.poll_interval_ms == default_poll_interval_ms() {
            self.poll_interval_ms = file_config.poll_interval_ms;
        }
        if self.poll_max_attempts == default_poll_max_attempts() {
            self.poll_max_attempts = file_config.poll_max_attempts;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_base.is_empty() {
            return Err(anyhow::anyhow!("GitHub API base URL cannot be empty"));
        }
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "GitHub API base URL must start with http:// or https://"
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("poll_interval_ms must be at least 1"));
        }
        if self.poll_max_attempts == 0 {
            return Err(anyhow::anyhow!("poll_max_attempts must be at least 1"));
        }

        Ok(())
    }

    /// Knobs for the watch task
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            locate_delay: Duration::from_millis(self.locate_delay_ms),
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.poll_max_attempts,
        }
    }
}

// Default value functions
fn default_port() -> u16 {
    32150
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_locate_delay_ms() -> u64 {
    3_000
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_poll_max_attempts() -> u32 {
    30
}
