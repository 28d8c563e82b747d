use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULTS: &str = include_str!("../../config/default.toml");

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub gateway: GatewayConfig,
    pub devices: DevicesConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub browse_root: String,
    pub staging_dir: String,
    pub tick_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMode {
    Copy,
    Emulated,
}

#[derive(Debug, Deserialize)]
pub struct DevicesConfig {
    pub root: String,
    pub enumerate: Vec<String>,
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config.
    pub fn load() -> Result<Self> {
        let user = directories::ProjectDirs::from("", "", "spool")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .filter(|path| path.exists())
            .map(fs::read_to_string)
            .transpose()?;

        let mut config = Self::from_layers(user.as_deref())?;
        config.expand_paths()?;
        Ok(config)
    }

    /// Parses the defaults and deep-merges an optional user document over them.
    fn from_layers(user: Option<&str>) -> Result<Self> {
        let mut merged: toml::Value = toml::from_str(DEFAULTS)?;
        if let Some(user) = user {
            let overrides: toml::Value = toml::from_str(user)?;
            merge(&mut merged, overrides);
        }
        Ok(Self::deserialize(merged)?)
    }

    fn expand_paths(&mut self) -> Result<()> {
        self.general.browse_root = expand_tilde(&self.general.browse_root)?;
        self.general.staging_dir = expand_tilde(&self.general.staging_dir)?;
        self.devices.root = expand_tilde(&self.devices.root)?;
        Ok(())
    }

    pub fn browse_root(&self) -> PathBuf {
        PathBuf::from(&self.general.browse_root)
    }

    pub fn staging_dir(&self) -> PathBuf {
        or_data_dir(&self.general.staging_dir, "staging")
    }

    pub fn devices_root(&self) -> PathBuf {
        or_data_dir(&self.devices.root, "devices")
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.general.tick_ms.clamp(20, 1000))
    }
}

pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "spool")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/tmp/spool"))
}

fn or_data_dir(configured: &str, fallback: &str) -> PathBuf {
    if configured.is_empty() {
        data_dir().join(fallback)
    } else {
        PathBuf::from(configured)
    }
}

fn merge(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base), toml::Value::Table(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, value) => *base = value,
    }
}

fn expand_tilde(raw: &str) -> Result<String> {
    if !raw.starts_with('~') {
        return Ok(raw.to_string());
    }
    let home = dirs_home().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(raw.replacen('~', &home.to_string_lossy(), 1))
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
