// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lock-free peak level shared between a capture thread and readers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Latest peak of one endpoint.
///
/// The f32 is stored as its bit pattern so writers never block.
#[derive(Debug, Default)]
pub struct AtomicMeterLevels {
    peak: AtomicU32,
    /// Set once any sample arrived.
    active: AtomicBool,
}

impl AtomicMeterLevels {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn store(&self, peak: f32) {
        self.peak.store(peak.to_bits(), Ordering::Relaxed);
        self.active.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.peak.store(0, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_load_reset() {
        let levels = AtomicMeterLevels::new();
        assert!(!levels.is_active());
        assert_eq!(levels.load(), 0.0);

        levels.store(0.42);
        assert!(levels.is_active());
        assert_eq!(levels.load(), 0.42);

        levels.reset();
        assert!(!levels.is_active());
        assert_eq!(levels.load(), 0.0);
    }
}
