//! Usage: Resolve XDG config/data locations for the config and credential files.

use crate::shared::error::ConfigError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "oauth2ms";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const CREDENTIALS_FILE_NAME: &str = "credentials.bin";

const ENV_XDG_CONFIG_HOME: &str = "XDG_CONFIG_HOME";
const ENV_XDG_CONFIG_DIRS: &str = "XDG_CONFIG_DIRS";
const ENV_XDG_DATA_HOME: &str = "XDG_DATA_HOME";
const DEFAULT_XDG_CONFIG_DIRS: &str = "/etc/xdg";

fn non_empty_env(key: &str) -> Option<OsString> {
    std::env::var_os(key).filter(|v| !v.is_empty())
}

fn home_dir() -> Option<PathBuf> {
    non_empty_env("HOME")
        .or_else(|| non_empty_env("USERPROFILE"))
        .map(PathBuf::from)
}

/// Relative XDG values are ignored.
fn absolute_env_dir(key: &str) -> Option<PathBuf> {
    non_empty_env(key)
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
}

fn config_home() -> Option<PathBuf> {
    absolute_env_dir(ENV_XDG_CONFIG_HOME).or_else(|| home_dir().map(|h| h.join(".config")))
}

fn data_home() -> Option<PathBuf> {
    absolute_env_dir(ENV_XDG_DATA_HOME)
        .or_else(|| home_dir().map(|h| h.join(".local").join("share")))
}

/// Candidate config files in lookup order: `$XDG_CONFIG_HOME`, then each `$XDG_CONFIG_DIRS` entry.
pub fn config_file_candidates() -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    if let Some(home) = config_home() {
        out.push(home.join(APP_NAME).join(CONFIG_FILE_NAME));
    }
    let dirs = non_empty_env(ENV_XDG_CONFIG_DIRS)
        .unwrap_or_else(|| OsString::from(DEFAULT_XDG_CONFIG_DIRS));
    for dir in std::env::split_paths(&dirs) {
        if dir.is_absolute() {
            out.push(dir.join(APP_NAME).join(CONFIG_FILE_NAME));
        }
    }
    out
}

/// First existing config file, or `ConfigError::Missing` naming where it was expected.
pub fn find_config_file() -> Result<PathBuf, ConfigError> {
    let candidates = config_file_candidates();
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }
    let expected = candidates
        .into_iter()
        .next()
        .unwrap_or_else(|| Path::new("$XDG_CONFIG_HOME").join(APP_NAME).join(CONFIG_FILE_NAME));
    Err(missing_config(expected))
}

pub fn missing_config(expected: PathBuf) -> ConfigError {
    ConfigError::Missing {
        expected,
        xdg_config_home: std::env::var(ENV_XDG_CONFIG_HOME).unwrap_or_else(|_| "None".to_string()),
    }
}

/// `$XDG_DATA_HOME/oauth2ms/credentials.bin`. The directory is created on save, not here.
pub fn default_credentials_file() -> Option<PathBuf> {
    data_home().map(|d| d.join(APP_NAME).join(CREDENTIALS_FILE_NAME))
}
