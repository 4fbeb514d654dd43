//! launcherctl configuration management

use anyhow::{Context, Result, anyhow};
use launcher::{ControllerOptions, MAX_POLL_RATE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherctlConfig {
    pub general: GeneralSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub log_level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Seconds between scans (1-120, 0 for the library default)
    #[serde(default)]
    pub poll_rate_secs: u8,
    /// Start background polling for every command, not just `watch`
    #[serde(default)]
    pub auto_start: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "RegistrySettings::default_initial_capacity")]
    pub initial_capacity: usize,
    /// Hard limit on tracked launchers, 0 for unlimited
    #[serde(default = "RegistrySettings::default_max_capacity")]
    pub max_capacity: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            initial_capacity: Self::default_initial_capacity(),
            max_capacity: Self::default_max_capacity(),
        }
    }
}

impl RegistrySettings {
    fn default_initial_capacity() -> usize {
        8
    }

    fn default_max_capacity() -> usize {
        128
    }
}

impl Default for LauncherctlConfig {
    fn default() -> Self {
        Self {
            general: GeneralSettings {
                log_level: "info".to_string(),
            },
            polling: PollingSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

impl LauncherctlConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/launcher/launcherctl.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: LauncherctlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("launcher").join("launcherctl.toml")
        } else {
            PathBuf::from(".config/launcher/launcherctl.toml")
        }
    }

    /// Controller settings described by this configuration
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            initial_capacity: self.registry.initial_capacity,
            max_capacity: match self.registry.max_capacity {
                0 => None,
                max => Some(max),
            },
            poll_rate: self.polling.poll_rate_secs,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.polling.poll_rate_secs > MAX_POLL_RATE {
            return Err(anyhow!(
                "Invalid poll_rate_secs {}, must be 1-{} or 0 for the default",
                self.polling.poll_rate_secs,
                MAX_POLL_RATE
            ));
        }

        if self.registry.initial_capacity == 0 {
            return Err(anyhow!("initial_capacity must be greater than 0"));
        }
        let max = self.registry.max_capacity;
        if max != 0 && max < self.registry.initial_capacity {
            return Err(anyhow!(
                "max_capacity {} is below initial_capacity {}",
                max,
                self.registry.initial_capacity
            ));
        }

        Ok(())
    }
}

/// Load configuration from a user-supplied path, expanding `~`
pub fn load_config(path: &str) -> Result<LauncherctlConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    LauncherctlConfig::load(Some(path_buf))
}
