// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Render rate limiting for push meters.

use std::time::{Duration, Instant};

/// Drops intermediate levels that arrive within `window` of the last
/// accepted one. Zero and full scale always pass so the meter never sticks
/// short of an end stop. Dropped levels are not replayed.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    /// Whether `level` (out of `max`) should be rendered at `now`.
    pub fn admit(&mut self, level: u32, max: u32, now: Instant) -> bool {
        let edge = level == 0 || level >= max;
        if !edge {
            if let Some(last) = self.last_accepted {
                if now.saturating_duration_since(last) < self.window {
                    return false;
                }
            }
        }
        self.last_accepted = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}
