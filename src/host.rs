// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Output side of an action: where rendered meters and settings go.

use crate::config::ConfigManager;
use crate::render::RgbaImage;
use audiometer_ipc::{FEEDBACK_CANVAS, FEEDBACK_TITLE};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

/// The control a meter draws on, as provided by the host runtime.
pub trait HostSurface: Send + Sync {
    /// Replace the key image.
    fn set_image(&self, image: &RgbaImage);

    /// Update a dial's touch-strip canvas and title.
    fn set_feedback(&self, canvas: &RgbaImage, title: &str);

    /// Set or clear the key title.
    fn set_title(&self, title: Option<&str>);

    /// Persist the action's settings blob.
    fn save_settings(&self, settings: &Value);
}

/// Dial feedback as the host expects it. The canvas travels as its geometry;
/// encoding the pixels is the transport's job.
pub fn feedback_payload(canvas: &RgbaImage, title: &str) -> Value {
    json!({
        FEEDBACK_CANVAS: { "width": canvas.width(), "height": canvas.height() },
        FEEDBACK_TITLE: title,
    })
}

/// Surface for the standalone runner: logs what would be drawn and writes
/// settings through the [`ConfigManager`].
pub struct PersistingSurface {
    action_id: Uuid,
    config: Arc<ConfigManager>,
    last_title: Mutex<Option<String>>,
}

impl PersistingSurface {
    pub fn new(action_id: Uuid, config: Arc<ConfigManager>) -> Self {
        Self {
            action_id,
            config,
            last_title: Mutex::new(None),
        }
    }
}

impl HostSurface for PersistingSurface {
    fn set_image(&self, image: &RgbaImage) {
        trace!(
            "[{}] image {}x{}",
            self.action_id,
            image.width(),
            image.height()
        );
    }

    fn set_feedback(&self, canvas: &RgbaImage, title: &str) {
        trace!("[{}] feedback {}", self.action_id, feedback_payload(canvas, title));
    }

    fn set_title(&self, title: Option<&str>) {
        let mut last = self.last_title.lock();
        if last.as_deref() != title {
            debug!("[{}] title {:?}", self.action_id, title);
            *last = title.map(str::to_string);
        }
    }

    fn save_settings(&self, settings: &Value) {
        match self.config.save_action_settings(self.action_id, settings) {
            Ok(()) => info!("[{}] settings saved", self.action_id),
            Err(e) => error!("[{}] failed to save settings: {}", self.action_id, e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Rgb;

    #[test]
    fn test_feedback_payload_keys() {
        let canvas = crate::render::raster::solid(200, 100, Rgb::BLACK);
        let payload = feedback_payload(&canvas, "Speakers");
        assert_eq!(payload["title"], "Speakers");
        assert_eq!(payload["canvas"]["width"], 200);
        assert_eq!(payload["canvas"]["height"], 100);
    }

    #[test]
    fn test_persisting_surface_writes_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(
            ConfigManager::with_dirs(dir.path().join("config"), &dir.path().join("state"))
                .unwrap(),
        );
        let id = Uuid::new_v4();
        let surface = PersistingSurface::new(id, Arc::clone(&config));

        surface.set_title(Some("50"));
        surface.save_settings(&json!({ "midiDevice": "Alpha" }));
        assert_eq!(
            config.load_action_settings(id).unwrap(),
            Some(json!({ "midiDevice": "Alpha" }))
        );
    }
}
