//! Server configuration
//!
//! JSON file with a default for every field, looked up under the user config
//! directory when no path is given on the command line.

use crate::logwatch::{
    MAX_TAIL_WINDOW, PollSettings, TimestampParser, DEFAULT_BASE_EPOCH, DEFAULT_POLL_ATTEMPTS,
};
use crate::reindex::{CompletionPolicy, IndexerCommand, ReindexOptions, ROTATION_DONE_MARKER};
use crate::server::KeepAlive;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "searchd-reindexer";
const CONFIG_FILE: &str = "config.json";

/// Server configuration
///
/// Every field has a default, so an empty `{}` file (or no file at all)
/// reproduces the stock Sphinx layout on port 5018.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// External indexer invocation
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Where and how to look for rotation completion
    #[serde(default)]
    pub searchd: SearchdConfig,

    /// Poll budget and pacing
    #[serde(default)]
    pub poll: PollConfig,

    /// Run at most one rebuild at a time
    #[serde(default)]
    pub serialize_reindex: bool,

    /// Keep-alive schedule for accepted connections
    #[serde(default)]
    pub keepalive: KeepAlive,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5018
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            indexer: IndexerConfig::default(),
            searchd: SearchdConfig::default(),
            poll: PollConfig::default(),
            serialize_reindex: false,
            keepalive: KeepAlive::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Indexer executable
    #[serde(default = "default_indexer_bin")]
    pub bin: PathBuf,

    /// Sphinx configuration passed with `--config`
    #[serde(default = "default_indexer_config")]
    pub config: PathBuf,

    /// Flags between `--config <path>` and the index name
    #[serde(default = "default_indexer_args")]
    pub args: Vec<String>,

    /// File that receives the indexer's stdout and stderr
    #[serde(default = "default_indexer_log")]
    pub log: Option<PathBuf>,
}

fn default_indexer_bin() -> PathBuf {
    PathBuf::from("/usr/bin/indexer")
}

fn default_indexer_config() -> PathBuf {
    PathBuf::from("/etc/sphinxsearch/sphinx.conf")
}

fn default_indexer_args() -> Vec<String> {
    vec!["--rotate".to_string(), "--quiet".to_string()]
}

fn default_indexer_log() -> Option<PathBuf> {
    Some(PathBuf::from("/var/log/sphinxindexer.log"))
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            bin: default_indexer_bin(),
            config: default_indexer_config(),
            args: default_indexer_args(),
            log: default_indexer_log(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchdConfig {
    /// searchd log that reports rotations
    #[serde(default = "default_searchd_log")]
    pub log: PathBuf,

    /// Text that marks a finished rotation
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Watermark for an empty log, `Fri Sep 7 10:00:00 2012` layout
    #[serde(default = "default_base_epoch")]
    pub base_epoch: String,

    /// Bytes read from the end of the log per poll
    #[serde(default = "default_tail_window")]
    pub tail_window: u64,
}

fn default_searchd_log() -> PathBuf {
    PathBuf::from("/var/log/sphinxsearch/searchd.log")
}

fn default_marker() -> String {
    ROTATION_DONE_MARKER.to_string()
}

fn default_base_epoch() -> String {
    DEFAULT_BASE_EPOCH.to_string()
}

fn default_tail_window() -> u64 {
    MAX_TAIL_WINDOW
}

impl Default for SearchdConfig {
    fn default() -> Self {
        Self {
            log: default_searchd_log(),
            marker: default_marker(),
            base_epoch: default_base_epoch(),
            tail_window: default_tail_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Tail reads before giving up
    #[serde(default = "default_poll_attempts")]
    pub attempts: u32,

    /// Pause between reads in milliseconds (0 = back to back)
    #[serde(default)]
    pub interval_ms: u64,

    /// Overall bound in milliseconds; reaching it fails the rebuild
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    /// Whether an exhausted budget still counts as success
    #[serde(default)]
    pub policy: CompletionPolicy,
}

fn default_poll_attempts() -> u32 {
    DEFAULT_POLL_ATTEMPTS
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: default_poll_attempts(),
            interval_ms: 0,
            deadline_ms: None,
            policy: CompletionPolicy::default(),
        }
    }
}

impl PollConfig {
    pub fn settings(&self) -> PollSettings {
        PollSettings {
            attempts: self.attempts,
            interval: Duration::from_millis(self.interval_ms),
            deadline: self.deadline_ms.map(Duration::from_millis),
        }
    }
}

impl ServerConfig {
    /// Load config from `path`, or from the app config directory when no path
    /// is given, or fall back to defaults if neither exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match get_config_path() {
                Some(default_path) if default_path.exists() => Self::from_file(&default_path)?,
                _ => Self::default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ServerConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings the poller cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.searchd.tail_window == 0 || self.searchd.tail_window > MAX_TAIL_WINDOW {
            anyhow::bail!(
                "searchd.tail_window must be between 1 and {} bytes, got {}",
                MAX_TAIL_WINDOW,
                self.searchd.tail_window
            );
        }
        if self.poll.attempts == 0 {
            anyhow::bail!("poll.attempts must be at least 1");
        }
        if self.searchd.marker.is_empty() {
            anyhow::bail!("searchd.marker must not be empty");
        }
        Ok(())
    }

    /// `host:port` for binding
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the shared timestamp parser
    pub fn timestamp_parser(&self) -> Result<TimestampParser> {
        TimestampParser::with_base_epoch(&self.searchd.base_epoch)
            .with_context(|| format!("Invalid searchd.base_epoch {:?}", self.searchd.base_epoch))
    }

    /// Indexer invocation described by this config
    pub fn indexer_command(&self) -> IndexerCommand {
        IndexerCommand::new(&self.indexer.bin, &self.indexer.config)
            .with_extra_args(self.indexer.args.clone())
            .with_output_log(self.indexer.log.clone())
    }

    pub fn reindex_options(&self) -> ReindexOptions {
        ReindexOptions {
            searchd_log: self.searchd.log.clone(),
            marker: self.searchd.marker.clone(),
            tail_window: self.searchd.tail_window,
            poll: self.poll.settings(),
            policy: self.poll.policy,
            serialize: self.serialize_reindex,
        }
    }
}

/// Default config location (`~/.config/searchd-reindexer/config.json` on Linux)
pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
}
