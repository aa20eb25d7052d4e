use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::SessionId;
use crate::worker::DEFAULT_WORKER_TIMEOUT;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub parser: ParserConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

/// Remote parse service used when the local parse cannot handle a file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub base_url: String,
  /// Per-attempt timeout of an upload
  pub timeout_ms: u64,
  pub max_retries: u32,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      base_url: "http://127.0.0.1:8080".to_string(),
      timeout_ms: 60_000,
      max_retries: 3,
    }
  }
}

impl ServerConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
  pub worker_timeout_ms: u64,
  /// Upload to the server when the local parse fails (password errors excepted)
  pub allow_server_fallback: bool,
  /// Preferred product language, e.g. "de-DE"
  pub preferred_language: Option<String>,
}

impl Default for ParserConfig {
  fn default() -> Self {
    Self {
      worker_timeout_ms: 120_000,
      allow_server_fallback: true,
      preferred_language: None,
    }
  }
}

impl ParserConfig {
  /// Zero falls back to the default timeout.
  pub fn worker_timeout(&self) -> Duration {
    match self.worker_timeout_ms {
      0 => DEFAULT_WORKER_TIMEOUT,
      ms => Duration::from_millis(ms),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// Directory for cache databases and logs (default: $XDG_DATA_HOME/knxload)
  pub data_dir: Option<PathBuf>,
  /// Fixed cache session; defaults to one session per build
  pub session: Option<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      data_dir: None,
      session: None,
    }
  }
}

impl CacheConfig {
  pub fn session_id(&self) -> SessionId {
    match &self.session {
      Some(session) => SessionId::new(session.clone()),
      None => SessionId::for_build(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./knxload.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/knxload/config.yaml
  ///
  /// Without a config file every setting takes its default.
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
    // Check current directory
    let local = PathBuf::from("knxload.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("knxload").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Directory holding cache databases and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.data_dir {
      return Ok(dir.clone());
    }
    dirs::data_dir()
      .map(|dir| dir.join("knxload"))
      .ok_or_else(|| eyre!("Could not determine data directory; set cache.data_dir"))
  }

  /// Get the project password from the environment.
  ///
  /// Checks KNXLOAD_PROJECT_PASSWORD.
  pub fn get_password() -> Option<String> {
    std::env::var("KNXLOAD_PROJECT_PASSWORD")
      .ok()
      .filter(|p| !p.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config.server.timeout_ms, 60_000);
    assert_eq!(config.server.max_retries, 3);
    assert_eq!(config.parser.worker_timeout(), Duration::from_secs(120));
    assert!(config.parser.allow_server_fallback);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.session_id(), SessionId::for_build());
  }

  #[test]
  fn test_partial_sections_keep_defaults() {
    let yaml = "server:\n  base_url: https://parse.example.com\nparser:\n  allow_server_fallback: false\ncache:\n  data_dir: /tmp/knx\n  session: fixed\n";
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.server.base_url, "https://parse.example.com");
    assert_eq!(config.server.max_retries, 3);
    assert!(!config.parser.allow_server_fallback);
    assert_eq!(config.parser.worker_timeout_ms, 120_000);
    assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/knx"));
    assert_eq!(config.cache.session_id(), SessionId::new("fixed"));
  }

  #[test]
  fn test_zero_worker_timeout_uses_default() {
    let config = Config::from_yaml("parser:\n  worker_timeout_ms: 0\n").unwrap();
    assert_eq!(config.parser.worker_timeout(), DEFAULT_WORKER_TIMEOUT);

    let config = Config::from_yaml("parser:\n  worker_timeout_ms: 5000\n").unwrap();
    assert_eq!(config.parser.worker_timeout(), Duration::from_secs(5));
  }

  #[test]
  fn test_load_missing_explicit_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("knxload.yaml");
    std::fs::write(&path, "server:\n  max_retries: 5\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.server.max_retries, 5);
  }
}
