use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Assets cached at install time. Relative entries are resolved against `origin`.
pub const DEFAULT_STATIC_ASSETS: &[&str] = &[
  "/",
  "/index.html",
  "/main.js",
  "/styles.css",
  "/manifest.json",
  "https://fonts.googleapis.com/icon?family=Material+Icons",
  "https://fonts.gstatic.com/s/materialicons/v140/flUhRq6tzZclQEJ-Vdg-IuiaDsNc.woff2",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Prefix for cache partition names (`<app_name>-<version>-static`)
  pub app_name: String,
  /// Origin the application is served from; decides same-origin routing
  pub origin: String,
  /// Current cache version; partitions of any other version are collected on activate
  pub cache_version: String,
  /// Document served when a navigation can't be satisfied
  pub root_document: String,
  pub static_assets: Vec<String>,
  /// Overrides the platform data directory
  pub data_dir: Option<PathBuf>,
  pub start_offline: bool,
  pub log_level: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app_name: "fittracker".to_string(),
      origin: "http://localhost:4200".to_string(),
      cache_version: "v1".to_string(),
      root_document: "/index.html".to_string(),
      static_assets: DEFAULT_STATIC_ASSETS.iter().map(|s| s.to_string()).collect(),
      data_dir: None,
      start_offline: false,
      log_level: "info".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fittracker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fittracker/config.yaml
  ///
  /// Nothing here is mandatory, so a missing file yields the defaults.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if std::env::var("FITTRACKER_OFFLINE").is_ok_and(|v| v == "1" || v == "true") {
      config.start_offline = true;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fittracker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fittracker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    url::Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", config.origin, e))?;
    Ok(config)
  }

  /// Directory holding the key-value mirror, both databases and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(&self.app_name))
  }

  pub fn static_cache_name(&self) -> String {
    format!("{}-{}-static", self.app_name, self.cache_version)
  }

  pub fn dynamic_cache_name(&self) -> String {
    format!("{}-{}-dynamic", self.app_name, self.cache_version)
  }
}
