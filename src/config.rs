//! Config module - Manages notesync configuration (notesync.toml).
//!
//! Configuration file contains:
//! - Remote repository target (owner, repo, branch, paths)
//! - Auto-sync settings
//! - Local data directory

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote repository target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Repository owner (user or organization)
    pub owner: Option<String>,
    /// Repository name
    pub repo: Option<String>,
    /// Branch all reads and writes are scoped to
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory holding one file per note
    #[serde(default = "default_notes_dir")]
    pub notes_dir: String,
    /// Well-known path of the aggregate document
    #[serde(default = "default_document_path")]
    pub document_path: String,
    /// API base URL (overridable for GitHub Enterprise)
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_notes_dir() -> String {
    "notes".to_string()
}

fn default_document_path() -> String {
    "releases/weekly.md".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            owner: None,
            repo: None,
            branch: default_branch(),
            notes_dir: default_notes_dir(),
            document_path: default_document_path(),
            api_base: default_api_base(),
        }
    }
}

/// Auto-sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Run sync on a timer while reachable
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,
    /// Seconds between auto-sync cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// host:port probed to decide reachability
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    /// Seconds between reachability probes
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

fn default_auto_sync() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

fn default_probe_host() -> String {
    "api.github.com:443".to_string()
}

fn default_probe_interval_secs() -> u64 {
    30
}

impl SyncConfig {
    /// Timer period for auto-sync, or `None` when auto-sync is turned off.
    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.auto_sync
            .then(|| Duration::from_secs(self.interval_secs.max(1)))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: default_auto_sync(),
            interval_secs: default_interval_secs(),
            probe_host: default_probe_host(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

/// Main notesync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config version (for future migrations)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding notes.json, queue.json and sync_state.json
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// Default local data directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("notesync"))
        .unwrap_or_else(|| PathBuf::from("./notesync-data"))
}

/// Default config directory (~/.config/notesync/).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("notesync"))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("notesync.toml")
}

/// Fallback credentials file, used when no system keyring is available.
pub fn default_credentials_path() -> PathBuf {
    default_config_dir().join(".credentials.json")
}

impl Config {
    /// Load config from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Cannot parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from `path`, or defaults when the file does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).with_context(|| "Cannot serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Cannot write config file: {}", path.display()))?;

        Ok(())
    }

    /// Owner and repo are both set.
    pub fn is_repo_configured(&self) -> bool {
        self.remote.owner.is_some() && self.remote.repo.is_some()
    }

    /// Set the remote target from an `owner/repo` slug.
    pub fn set_repository(&mut self, slug: &str) -> Result<()> {
        let (owner, repo) = slug
            .trim()
            .trim_end_matches(".git")
            .split_once('/')
            .with_context(|| format!("Expected owner/repo, got '{}'", slug))?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            anyhow::bail!("Expected owner/repo, got '{}'", slug);
        }
        self.remote.owner = Some(owner.to_string());
        self.remote.repo = Some(repo.to_string());
        Ok(())
    }

    pub fn notes_file(&self) -> PathBuf {
        self.data_dir.join("notes.json")
    }

    pub fn queue_file(&self) -> PathBuf {
        self.data_dir.join("queue.json")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.data_dir.join("sync_state.json")
    }
}
