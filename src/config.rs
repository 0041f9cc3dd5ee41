use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Agent configuration.
///
/// One immutable object carries everything the agent needs: origin, version
/// tag, manifest, fallback path, timeout, notification defaults. Nothing is
/// read from module-level constants, so tests can substitute configurations
/// freely.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the agent serves, e.g. "https://app.example.com". Requests to
  /// any other origin pass through uncached.
  pub origin: String,
  /// Version tag of this agent generation. Store names derive from it, and
  /// stores carrying any other tag are retired at activation.
  pub version: String,
  /// Paths that must be attempted into the static store during install.
  pub manifest: Vec<String>,
  /// Path of the pre-cached page served when a navigation fails offline.
  #[serde(default = "default_offline_path")]
  pub offline_path: String,
  /// Seconds before a network fetch is abandoned in favor of the fallback.
  #[serde(default = "default_fetch_timeout_secs")]
  pub fetch_timeout_secs: u64,
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// Deferred-work tags the agent maps to a store-refresh handler.
  #[serde(default)]
  pub sync_tags: Vec<String>,
}

fn default_offline_path() -> String {
  "/offline".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body shown when a push payload carries no text of its own.
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Path opened (relative to the origin) when the "open" action is chosen.
  pub target_path: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "offramp".to_string(),
      default_body: "New content is available.".to_string(),
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/badge.png".to_string(),
      target_path: "/".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offramp.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offramp/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offramp/config.yaml\n\
                 See offramp.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offramp.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offramp").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Parse the configured origin into a URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// Name of the static store for this agent generation.
  pub fn static_store_name(&self) -> String {
    format!("static-{}", self.version)
  }

  /// Name of the dynamic store for this agent generation.
  pub fn dynamic_store_name(&self) -> String {
    format!("dynamic-{}", self.version)
  }

  /// The two store names the current generation recognizes; anything else
  /// is stale and gets pruned at activation.
  pub fn current_store_names(&self) -> [String; 2] {
    [self.static_store_name(), self.dynamic_store_name()]
  }
}
