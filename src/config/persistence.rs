// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration persistence (save/load).

use crate::config::AppConfig;
use directories::ProjectDirs;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Manages configuration file persistence.
pub struct ConfigManager {
    config_dir: PathBuf,
    settings_dir: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager, initializing directories.
    pub fn new() -> Result<Self, ConfigError> {
        let project_dirs =
            ProjectDirs::from("", "", "audiometer").ok_or(ConfigError::NoConfigDir)?;

        let config_dir = project_dirs.config_dir().to_path_buf();
        let state_dir = project_dirs
            .state_dir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| config_dir.join("state"));

        Self::with_dirs(config_dir, &state_dir)
    }

    /// Config manager rooted at explicit directories.
    pub fn with_dirs(config_dir: PathBuf, state_dir: &Path) -> Result<Self, ConfigError> {
        let settings_dir = state_dir.join("settings");
        fs::create_dir_all(&config_dir)?;
        fs::create_dir_all(&settings_dir)?;

        Ok(Self {
            config_dir,
            settings_dir,
        })
    }

    /// Get the path to the main config file.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Load the runner config. Actions written without an id get one, and
    /// the file is rewritten so their saved settings are found next run.
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&path)?;
        let mut config = AppConfig::from_toml(&content)?;
        let assigned = config.assign_missing_ids();
        if assigned > 0 {
            info!("Assigned ids to {} action(s), saving config", assigned);
            self.save_config(&config)?;
        }
        Ok(config)
    }

    /// Save the runner config.
    pub fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = config.to_toml()?;
        fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Path of the persisted settings blob of one action.
    pub fn action_settings_path(&self, id: Uuid) -> PathBuf {
        self.settings_dir.join(format!("{}.json", id))
    }

    /// Load the settings blob saved for an action, if any.
    pub fn load_action_settings(&self, id: Uuid) -> Result<Option<Value>, ConfigError> {
        let path = self.action_settings_path(id);
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            Ok(Some(serde_json::from_str(&content)?))
        } else {
            Ok(None)
        }
    }

    /// Save an action's settings blob.
    pub fn save_action_settings(&self, id: Uuid, settings: &Value) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.action_settings_path(id), content)?;
        Ok(())
    }
}
