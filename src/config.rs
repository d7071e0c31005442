use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveTime;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const APP_DIR: &str = ".Shelfmark";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_REBUILD_TIME: &str = "03:15";
pub const MAX_DISPATCH_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub api_port: u16,
    pub dispatch_interval_seconds: u64,
    pub dispatch_batch_size: usize,
    pub default_display_name: String,
    pub rebuild_enabled: bool,
    /// HH:MM, interpreted in UTC.
    pub rebuild_time: String,
    pub retention_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_root_dir().join("db").join("shelfmark.db"),
            api_port: 7891,
            dispatch_interval_seconds: 5,
            dispatch_batch_size: 200,
            default_display_name: "Reader".to_string(),
            rebuild_enabled: true,
            rebuild_time: DEFAULT_REBUILD_TIME.to_string(),
            retention_days: 30,
        }
    }
}

impl Config {
    pub fn root_dir() -> Result<PathBuf> {
        Ok(default_root_dir())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(default_root_dir().join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.clamp();

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        set_mode_600(&config_path)?;

        Ok(())
    }

    pub fn ensure_bootstrap_files(&self) -> Result<()> {
        let root = Self::root_dir()?;
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create root directory: {}", root.display()))?;

        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        Ok(())
    }

    pub fn parse_rebuild_time(&self) -> Result<NaiveTime> {
        parse_hhmm(&self.rebuild_time)
    }

    /// Hand-edited files may carry out-of-range values.
    fn clamp(&mut self) {
        self.dispatch_interval_seconds = self.dispatch_interval_seconds.max(1);
        self.dispatch_batch_size = self.dispatch_batch_size.clamp(1, MAX_DISPATCH_BATCH_SIZE);
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match normalize_config_key(key) {
            "db_path" => {
                if value.trim().is_empty() {
                    bail!("db_path must not be empty");
                }
                self.db_path = expand_home(value.trim());
            }
            "api_port" => {
                self.api_port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("api_port must be a number"))?;
            }
            "dispatch_interval_seconds" => {
                self.dispatch_interval_seconds = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("dispatch_interval_seconds must be a number"))?
                    .max(1);
            }
            "dispatch_batch_size" => {
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("dispatch_batch_size must be a number"))?;
                if !(1..=MAX_DISPATCH_BATCH_SIZE).contains(&parsed) {
                    bail!("dispatch_batch_size must be between 1 and {MAX_DISPATCH_BATCH_SIZE}");
                }
                self.dispatch_batch_size = parsed;
            }
            "default_display_name" => {
                let name = value.trim();
                if name.is_empty() {
                    bail!("default_display_name must not be empty");
                }
                self.default_display_name = name.to_string();
            }
            "rebuild_enabled" => {
                self.rebuild_enabled = value
                    .parse::<bool>()
                    .map_err(|_| anyhow!("rebuild_enabled must be true/false"))?;
            }
            "rebuild_time" => {
                parse_hhmm(value)?;
                self.rebuild_time = value.to_string();
            }
            "retention_days" => {
                self.retention_days = value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("retention_days must be a number"))?;
            }
            _ => {
                bail!(
                    "Unsupported config key: {key}. Supported keys: db_path|db.path, api_port|api.port, dispatch_interval_seconds|dispatch.interval_seconds, dispatch_batch_size|dispatch.batch_size, default_display_name|profile.default_display_name, rebuild_enabled|rebuild.enabled, rebuild_time|rebuild.time, retention_days|retention.days"
                );
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        match normalize_config_key(key) {
            "db_path" => Some(self.db_path.display().to_string()),
            "api_port" => Some(self.api_port.to_string()),
            "dispatch_interval_seconds" => Some(self.dispatch_interval_seconds.to_string()),
            "dispatch_batch_size" => Some(self.dispatch_batch_size.to_string()),
            "default_display_name" => Some(self.default_display_name.clone()),
            "rebuild_enabled" => Some(self.rebuild_enabled.to_string()),
            "rebuild_time" => Some(self.rebuild_time.clone()),
            "retention_days" => Some(self.retention_days.to_string()),
            _ => None,
        }
    }
}

fn normalize_config_key(key: &str) -> &str {
    match key {
        "db_path" | "db.path" => "db_path",
        "api_port" | "api.port" => "api_port",
        "dispatch_interval_seconds" | "dispatch.interval_seconds" => "dispatch_interval_seconds",
        "dispatch_batch_size" | "dispatch.batch_size" => "dispatch_batch_size",
        "default_display_name" | "profile.default_display_name" => "default_display_name",
        "rebuild_enabled" | "rebuild.enabled" => "rebuild_enabled",
        "rebuild_time" | "rebuild.time" => "rebuild_time",
        "retention_days" | "retention.days" => "retention_days",
        _ => key,
    }
}

pub fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .with_context(|| format!("Invalid time format: {value}. Example: 03:15 (24-hour format, UTC)",))
}

pub fn expand_home(raw: &str) -> PathBuf {
    raw.strip_prefix("~/")
        .and_then(|stripped| home_dir().map(|home| home.join(stripped)))
        .unwrap_or_else(|| PathBuf::from(raw))
}

fn default_root_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn set_mode_600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set file permissions: {}", path.display()))?;
    }

    Ok(())
}
