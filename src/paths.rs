//! Common paths for Murmur data storage
//!
//! All Murmur data is stored under ~/.config/murmur/ on all platforms:
//! - config.toml - User configuration
//! - session.enc - Encrypted persisted session

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Get the Murmur data directory (~/.config/murmur/)
pub fn murmur_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let murmur_dir = home.join(".config").join("murmur");
    fs::create_dir_all(&murmur_dir).context("Failed to create murmur directory")?;
    Ok(murmur_dir)
}

/// Get the config file path (~/.config/murmur/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(murmur_dir()?.join("config.toml"))
}

/// Get the persisted session path (~/.config/murmur/session.enc)
pub fn session_path() -> Result<PathBuf> {
    Ok(murmur_dir()?.join("session.enc"))
}
