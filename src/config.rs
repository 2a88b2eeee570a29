use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::Environment;
use crate::cache::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ITEMS, DEFAULT_PERCENT_TO_CLEAN};
use crate::context::{DEFAULT_TIMEOUT, DEFAULT_WORKERS};
use crate::location::Location;
use crate::request::{ParamsEncoding, DEFAULT_TTL_SECS};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  /// Fixed location sent with location-aware requests
  pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
  /// production, edge or staging
  #[serde(default)]
  pub environment: Environment,
  /// Overrides `environment` when set (e.g. a local mock server)
  pub base_url: Option<String>,
  pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_max_items")]
  pub max_items: usize,
  #[serde(default = "default_max_bytes")]
  pub max_bytes: usize,
  #[serde(default = "default_percent_to_clean")]
  pub percent_to_clean: u8,
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_items: DEFAULT_MAX_ITEMS,
      max_bytes: DEFAULT_MAX_BYTES,
      percent_to_clean: DEFAULT_PERCENT_TO_CLEAN,
      ttl_secs: DEFAULT_TTL_SECS,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  #[serde(default = "default_workers")]
  pub workers: usize,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Charset for urlencoded request bodies: utf-8 or iso-8859-1
  #[serde(default)]
  pub encoding: ParamsEncoding,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      workers: DEFAULT_WORKERS,
      timeout_secs: DEFAULT_TIMEOUT.as_secs(),
      encoding: ParamsEncoding::default(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_max_items() -> usize {
  DEFAULT_MAX_ITEMS
}

fn default_max_bytes() -> usize {
  DEFAULT_MAX_BYTES
}

fn default_percent_to_clean() -> u8 {
  DEFAULT_PERCENT_TO_CLEAN
}

fn default_ttl_secs() -> i64 {
  DEFAULT_TTL_SECS
}

fn default_workers() -> usize {
  DEFAULT_WORKERS
}

fn default_timeout_secs() -> u64 {
  DEFAULT_TIMEOUT.as_secs()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sgn.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sgn/config.yaml
  ///
  /// Without any file the defaults are used (production, no api key).
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("sgn.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("sgn").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if !(1..=99).contains(&config.cache.percent_to_clean) {
      return Err(eyre!(
        "cache.percent_to_clean must be between 1 and 99, got {}",
        config.cache.percent_to_clean
      ));
    }
    Ok(config)
  }

  /// The environment requests resolve against, honoring `api.base_url`.
  pub fn environment(&self) -> Environment {
    match &self.api.base_url {
      Some(url) => Environment::Custom(url.clone()),
      None => self.api.environment.clone(),
    }
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.queue.timeout_secs)
  }

  /// Get the API secret used to sign session tokens.
  ///
  /// Reads SGN_API_SECRET; requests go unsigned without it.
  pub fn get_api_secret() -> Option<String> {
    std::env::var("SGN_API_SECRET").ok()
  }

  /// Get a session token to resume from environment variables.
  ///
  /// Checks SGN_TOKEN.
  pub fn get_token() -> Option<String> {
    std::env::var("SGN_TOKEN").ok()
  }
}
