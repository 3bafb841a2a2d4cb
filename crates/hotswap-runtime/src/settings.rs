//! File-based swapper settings
//!
//! Settings are read from TOML, YAML or JSON (picked by file extension).
//! `${VAR}` and `$VAR` references are replaced with environment values
//! before parsing; `load_settings_with_env` additionally layers
//! `PREFIX_*` environment variables on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as Cfg, Environment, File, FileFormat};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::swapper::{DEFAULT_FREE_DELAY, SwapperConfig};

/// Settings loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Swapper settings as written in a settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotswapSettings {
    /// Directory scanned for plugin artifacts
    pub plugin_dir: PathBuf,
    /// Seconds before a superseded generation is released
    pub free_delay_secs: u64,
    /// Plugins to load; empty loads everything
    pub whitelist: Vec<String>,
}

impl Default for HotswapSettings {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("plugins"),
            free_delay_secs: DEFAULT_FREE_DELAY.as_secs(),
            whitelist: Vec::new(),
        }
    }
}

impl HotswapSettings {
    pub fn free_delay(&self) -> Duration {
        Duration::from_secs(self.free_delay_secs)
    }

    /// Build a swapper configuration for a directory source.
    pub fn into_config(self) -> SwapperConfig {
        let delay = self.free_delay();
        SwapperConfig::new(self.plugin_dir)
            .with_free_delay(delay)
            .with_whitelist(self.whitelist)
    }
}

/// Detect the settings format from the file extension.
pub fn detect_format(path: &Path) -> SettingsResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| SettingsError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(SettingsError::UnsupportedFormat(ext.to_string())),
    }
}

/// Replace `${VAR}` and `$VAR` with environment values. Unset variables
/// are left as written.
pub fn substitute_env_vars(content: &str) -> SettingsResult<String> {
    let braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| SettingsError::Parse(e.to_string()))?;
    let result = braced.replace_all(content, env_value).into_owned();

    let simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b")
        .map_err(|e| SettingsError::Parse(e.to_string()))?;
    Ok(simple.replace_all(&result, env_value).into_owned())
}

fn env_value(caps: &Captures<'_>) -> String {
    std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
}

/// Parse settings from a string in the given format.
pub fn settings_from_str(content: &str, format: FileFormat) -> SettingsResult<HotswapSettings> {
    let substituted = substitute_env_vars(content)?;
    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| SettingsError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| SettingsError::Deserialization(e.to_string()))
}

/// Load settings from a file.
pub fn load_settings(path: impl AsRef<Path>) -> SettingsResult<HotswapSettings> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    settings_from_str(&content, format)
}

/// Load settings from a file, overridden by `PREFIX_*` environment
/// variables (`PREFIX_FREE_DELAY_SECS=30`).
pub fn load_settings_with_env(
    path: impl AsRef<Path>,
    env_prefix: &str,
) -> SettingsResult<HotswapSettings> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content)?;

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("whitelist"),
        )
        .build()
        .map_err(|e| SettingsError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| SettingsError::Deserialization(e.to_string()))
}
