// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Runner configuration (canvas size, timing, configured actions).

use audiometer_ipc::{ActionKind, SurfaceKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Timing and canvas settings shared by every action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Square canvas edge in pixels.
    pub key_size: u32,
    /// Poll interval of audio meters.
    pub tick_interval_ms: u64,
    /// Poll interval while an audio endpoint is being resolved.
    pub backoff_interval_ms: u64,
    /// Minimum spacing of intermediate MIDI renders.
    pub debounce_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            key_size: 144,
            tick_interval_ms: 200,
            backoff_interval_ms: 30_000,
            debounce_ms: 200,
        }
    }
}

impl GeneralConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn backoff_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_interval_ms.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// One action placed on the surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Key of the action's persisted settings. Nil until assigned.
    #[serde(default = "Uuid::nil")]
    pub id: Uuid,
    pub kind: ActionKind,
    #[serde(default)]
    pub surface: SurfaceKind,
    /// Initial settings blob, using the host wire names.
    #[serde(default)]
    pub settings: toml::Table,
}

impl ActionConfig {
    pub fn new(kind: ActionKind, surface: SurfaceKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            surface,
            settings: toml::Table::new(),
        }
    }

    /// The settings seed as a JSON blob.
    pub fn settings_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.settings).unwrap_or_default()
    }
}

/// Complete runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

impl AppConfig {
    /// Load config from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Give every action without an id a fresh one. Returns how many were
    /// assigned; the config must be saved for them to stick.
    pub fn assign_missing_ids(&mut self) -> usize {
        let mut assigned = 0;
        for action in self.actions.iter_mut().filter(|a| a.id.is_nil()) {
            action.id = Uuid::new_v4();
            assigned += 1;
        }
        assigned
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
