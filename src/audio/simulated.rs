// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Simulated audio endpoints.
//!
//! Levels follow a slow sine animation unless pinned with
//! [`SimulatedEndpoints::set_peak`]. Used by the runner when no audio backend
//! is compiled in, and by tests.

use crate::audio::{AtomicMeterLevels, AudioEndpoints, AudioError};
use crate::device::DeviceDescriptor;
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Animation speed in radians per second.
const PHASE_RATE: f32 = 3.0;
const BASE_ACTIVITY: f32 = 0.55;
const VARIATION: f32 = 0.35;

struct SimulatedEndpoint {
    name: String,
    muted: bool,
    /// Pinned level; animated while inactive.
    levels: AtomicMeterLevels,
    phase_offset: f32,
}

/// A fixed set of fake endpoints.
pub struct SimulatedEndpoints {
    endpoints: Mutex<Vec<SimulatedEndpoint>>,
    started: Instant,
    fail_enumeration: AtomicBool,
}

impl SimulatedEndpoints {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(Vec::new()),
            started: Instant::now(),
            fail_enumeration: AtomicBool::new(false),
        }
    }

    pub fn with_endpoints<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sim = Self::new();
        for name in names {
            sim.add(name);
        }
        sim
    }

    pub fn add(&self, name: impl Into<String>) {
        let name = name.into();
        let mut endpoints = self.endpoints.lock();
        if endpoints.iter().any(|e| e.name == name) {
            return;
        }
        // Spread the animations so endpoints do not move in lockstep.
        let phase_offset = endpoints.len() as f32 * TAU / 7.0;
        endpoints.push(SimulatedEndpoint {
            name,
            muted: false,
            levels: AtomicMeterLevels::new(),
            phase_offset,
        });
    }

    pub fn remove(&self, name: &str) {
        self.endpoints.lock().retain(|e| e.name != name);
    }

    /// Pin the peak of `name`, stopping its animation.
    pub fn set_peak(&self, name: &str, peak: f32) {
        if let Some(endpoint) = self.endpoints.lock().iter().find(|e| e.name == name) {
            endpoint.levels.store(peak);
        }
    }

    pub fn set_muted(&self, name: &str, muted: bool) {
        if let Some(endpoint) = self.endpoints.lock().iter_mut().find(|e| e.name == name) {
            endpoint.muted = muted;
        }
    }

    pub fn set_fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    fn animated_level(&self, phase_offset: f32) -> f32 {
        let phase = self.started.elapsed().as_secs_f32() * PHASE_RATE + phase_offset;
        (BASE_ACTIVITY + VARIATION * phase.sin()).clamp(0.0, 1.0)
    }
}

impl Default for SimulatedEndpoints {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEndpoints for SimulatedEndpoints {
    fn enumerate_endpoints(&self) -> Result<Vec<DeviceDescriptor>, AudioError> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(AudioError::Unavailable("simulated failure".into()));
        }
        let mut devices: Vec<DeviceDescriptor> = self
            .endpoints
            .lock()
            .iter()
            .map(|e| DeviceDescriptor::audio_endpoint(e.name.clone()))
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    fn is_muted(&self, name: &str) -> Result<bool, AudioError> {
        self.endpoints
            .lock()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.muted)
            .ok_or_else(|| AudioError::EndpointNotFound(name.to_string()))
    }

    fn toggle_mute(&self, name: &str) -> Result<bool, AudioError> {
        let mut endpoints = self.endpoints.lock();
        let endpoint = endpoints
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| AudioError::EndpointNotFound(name.to_string()))?;
        endpoint.muted = !endpoint.muted;
        Ok(endpoint.muted)
    }

    fn peak_level(&self, name: &str) -> Result<f32, AudioError> {
        let endpoints = self.endpoints.lock();
        let endpoint = endpoints
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| AudioError::EndpointNotFound(name.to_string()))?;
        if endpoint.muted {
            return Ok(0.0);
        }
        if endpoint.levels.is_active() {
            Ok(endpoint.levels.load().clamp(0.0, 1.0))
        } else {
            Ok(self.animated_level(endpoint.phase_offset))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_sorted() {
        let sim = SimulatedEndpoints::with_endpoints(["Speakers", "Headphones", "Speakers"]);
        let names: Vec<String> = sim
            .enumerate_endpoints()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["Headphones", "Speakers"]);
    }

    #[test]
    fn test_pinned_and_animated_levels() {
        let sim = SimulatedEndpoints::with_endpoints(["Speakers", "Mic"]);
        sim.set_peak("Speakers", 0.37);
        assert_eq!(sim.peak_level("Speakers").unwrap(), 0.37);

        let animated = sim.peak_level("Mic").unwrap();
        assert!((0.0..=1.0).contains(&animated));
    }

    #[test]
    fn test_mute_toggle() {
        let sim = SimulatedEndpoints::with_endpoints(["Speakers"]);
        sim.set_peak("Speakers", 0.8);
        assert!(!sim.is_muted("Speakers").unwrap());
        assert!(sim.toggle_mute("Speakers").unwrap());
        assert!(sim.is_muted("Speakers").unwrap());
        assert_eq!(sim.peak_level("Speakers").unwrap(), 0.0);
        assert!(!sim.toggle_mute("Speakers").unwrap());
    }

    #[test]
    fn test_unknown_endpoint_errors() {
        let sim = SimulatedEndpoints::new();
        assert!(matches!(
            sim.peak_level("nope"),
            Err(AudioError::EndpointNotFound(_))
        ));
        assert!(sim.toggle_mute("nope").is_err());

        sim.set_fail_enumeration(true);
        assert!(sim.enumerate_endpoints().is_err());
    }
}
