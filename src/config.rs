//! Configuration module for Murmur

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::path::PathBuf;

use crate::paths;

/// Environment variable overriding [`GatewayConfig::url`]
pub const ENV_GATEWAY_URL: &str = "MURMUR_GATEWAY_URL";

/// Environment variable overriding [`GatewayConfig::anon_key`]
pub const ENV_ANON_KEY: &str = "MURMUR_ANON_KEY";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Hosted backend connection
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Maximum number of rows requested by the base feed query
    #[serde(default = "default_feed_limit")]
    pub feed_limit: usize,

    /// Display-only fallback image sources
    #[serde(default)]
    pub placeholders: PlaceholderConfig,
}

/// Hosted backend (database, auth, storage) connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    #[serde(default)]
    pub url: String,

    /// Publishable (anon) API key
    #[serde(default)]
    pub anon_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Base URLs for generated placeholder images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderConfig {
    /// Avatar service, keyed with `?u=<id>`
    #[serde(default = "default_avatar_base")]
    pub avatar_base: String,

    /// Banner image service, keyed with `/<id>/800/300`
    #[serde(default = "default_seed_base")]
    pub banner_base: String,

    /// Podcast cover service, keyed with `/<id>/800/450`
    #[serde(default = "default_seed_base")]
    pub cover_base: String,
}

fn default_feed_limit() -> usize {
    50
}

fn default_timeout() -> u64 {
    30
}

fn default_avatar_base() -> String {
    "https://i.pravatar.cc/100".to_string()
}

fn default_seed_base() -> String {
    "https://picsum.photos/seed".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            feed_limit: default_feed_limit(),
            placeholders: PlaceholderConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            avatar_base: default_avatar_base(),
            banner_base: default_seed_base(),
            cover_base: default_seed_base(),
        }
    }
}

impl GatewayConfig {
    /// Whether both the URL and the key are set
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        paths::config_path()
    }

    /// Load config from the default path or create default, then apply env overrides
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Overlay connection settings from the environment.
    ///
    /// Takes a lookup function so tests don't have to mutate the process env.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_GATEWAY_URL).filter(|v| !v.trim().is_empty()) {
            self.gateway.url = url;
        }
        if let Some(key) = lookup(ENV_ANON_KEY).filter(|v| !v.trim().is_empty()) {
            self.gateway.anon_key = key;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.feed_limit, 50);
        assert!(!config.gateway.is_configured());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.gateway.url = "https://example.supabase.co".to_string();
        config.gateway.anon_key = "anon".to_string();
        config.feed_limit = 10;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.gateway.is_configured());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "feed_limit = 5\n[gateway]\nurl = \"https://a.b\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.feed_limit, 5);
        assert_eq!(config.gateway.url, "https://a.b");
        assert_eq!(config.gateway.timeout_secs, 30);
        assert_eq!(config.placeholders.avatar_base, "https://i.pravatar.cc/100");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            ENV_GATEWAY_URL => Some("https://env.example".to_string()),
            ENV_ANON_KEY => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config.gateway.url, "https://env.example");
        assert!(config.gateway.anon_key.is_empty());
    }
}
