use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration;

/// Default cache TTL (30 minutes).
fn default_cache_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

/// Default lockout window (5 minutes).
fn default_lockout_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_lockout_threshold() -> u32 {
    5
}

/// Lockout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Consecutive failed resolutions before an identifier is locked.
    pub threshold: u32,

    /// How long a lock lasts, e.g. "5m".
    #[serde(
        default = "default_lockout_window",
        deserialize_with = "deserialize_duration",
        skip_serializing
    )]
    pub window: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: default_lockout_threshold(),
            window: default_lockout_window(),
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a resolved secret stays cached, e.g. "30m".
    #[serde(
        default = "default_cache_ttl",
        deserialize_with = "deserialize_duration",
        skip_serializing
    )]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the data directory holding the encrypted store, cache,
    /// lockout counters, and audit log. If relative, resolved from the
    /// config file location. Defaults to the per-user config directory.
    pub data_dir: Option<PathBuf>,

    /// Lockout settings.
    #[serde(default)]
    pub lockout: LockoutConfig,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Optional per-deployment fallback secret for low-security first-run
    /// flows. Leave unset to disable the fallback source entirely.
    pub default_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            lockout: LockoutConfig::default(),
            cache: CacheConfig::default(),
            default_secret: None,
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to
    /// `config_dir`. If unset, falls back to the per-user config directory.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => default_data_dir(),
        }
    }
}

/// Per-user data directory: `~/.config/chainpass` (or platform equivalent).
pub fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chainpass")
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./chainpass.toml` if it exists in current directory
/// 2. `<config dir>/chainpass/chainpass.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("chainpass.toml");
    if local_config.exists() {
        return local_config;
    }
    default_data_dir().join("chainpass.toml")
}

/// Loaded configuration with resolved paths and typed secrets.
#[derive(Clone)]
pub struct ResolvedConfig {
    /// The resolved data directory path.
    pub data_dir: PathBuf,

    /// Consecutive failures before lockout.
    pub lockout_threshold: u32,

    /// Lock duration once the threshold is reached.
    pub lockout_window: Duration,

    /// Cache entry lifetime.
    pub cache_ttl: Duration,

    /// Optional configured fallback secret.
    pub default_secret: Option<SecretString>,
}

impl ResolvedConfig {
    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        Ok(Self::from_config(config, config_dir))
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            Ok(Self::from_config(Config::default(), Path::new(".")))
        }
    }

    fn from_config(config: Config, config_dir: &Path) -> Self {
        let data_dir = config.resolve_data_dir(config_dir);
        Self {
            data_dir,
            lockout_threshold: config.lockout.threshold,
            lockout_window: config.lockout.window,
            cache_ttl: config.cache.ttl,
            default_secret: config.default_secret.map(SecretString::from),
        }
    }
}
