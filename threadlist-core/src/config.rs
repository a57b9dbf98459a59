//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/threadlist/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/threadlist/` (~/.config/threadlist/)
//! - Data: `$XDG_DATA_HOME/threadlist/` (~/.local/share/threadlist/)
//! - State/Logs: `$XDG_STATE_HOME/threadlist/` (~/.local/state/threadlist/)

use crate::error::{Error, Result};
use crate::partition::Partition;
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Conversation-list paging configuration
    #[serde(default)]
    pub pager: PagerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Conversation-list paging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PagerConfig {
    /// Rows requested per page by list consumers
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Per-partition archived footer switches
    #[serde(default)]
    pub archived_footer: ArchivedFooterConfig,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            archived_footer: ArchivedFooterConfig::default(),
        }
    }
}

impl PagerConfig {
    /// Whether the given partition's list ends with an archived footer
    pub fn footer_enabled(&self, partition: Partition) -> bool {
        let footers = &self.archived_footer;
        match partition {
            Partition::Open => footers.open,
            Partition::Invited => footers.invited,
            Partition::Left => footers.left,
            Partition::Guardian => footers.guardian,
            Partition::Archived => false,
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config(
                "pager.page_size must be greater than 0".to_string(),
            ));
        }
        if self.archived_footer.archived {
            return Err(Error::Config(
                "pager.archived_footer.archived cannot be enabled: the archived list has no footer"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn default_page_size() -> usize {
    50
}

/// Archived footer switches. All disabled unless configured.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ArchivedFooterConfig {
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub invited: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub guardian: bool,
    /// Accepted only so that `validate` can reject it with a clear message
    #[serde(default)]
    pub archived: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.pager.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/threadlist/config.toml` (~/.config/threadlist/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("threadlist").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/threadlist/` (~/.local/share/threadlist/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("threadlist")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/threadlist/` (~/.local/state/threadlist/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("threadlist")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/threadlist/threads.db` (~/.local/share/threadlist/threads.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("threads.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/threadlist/threadlist.log` (~/.local/state/threadlist/threadlist.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("threadlist.log")
    }
}
