// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! System audio endpoints: enumeration, mute state and peak levels.

pub mod levels;
#[cfg(feature = "pulse")]
pub mod pulse;
pub mod simulated;

pub use levels::AtomicMeterLevels;
#[cfg(feature = "pulse")]
pub use pulse::PulseEndpoints;
pub use simulated::SimulatedEndpoints;

use crate::device::DeviceDescriptor;
use thiserror::Error;

/// Errors from audio endpoint backends.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio backend unavailable: {0}")]
    Unavailable(String),
    #[error("Audio endpoint not found: {0}")]
    EndpointNotFound(String),
    #[error("Audio backend operation failed: {0}")]
    Operation(String),
}

/// Access to the system's audio endpoints.
///
/// Endpoints are addressed by their display name, exactly as enumerated.
pub trait AudioEndpoints: Send + Sync {
    /// Active endpoints, both playback and capture.
    fn enumerate_endpoints(&self) -> Result<Vec<DeviceDescriptor>, AudioError>;

    fn is_muted(&self, name: &str) -> Result<bool, AudioError>;

    /// Flip the mute state; returns the new state.
    fn toggle_mute(&self, name: &str) -> Result<bool, AudioError>;

    /// Instantaneous peak in `[0.0, 1.0]`.
    fn peak_level(&self, name: &str) -> Result<f32, AudioError>;
}

/// Find the endpoint called exactly `name`.
pub fn resolve_endpoint(
    endpoints: &dyn AudioEndpoints,
    name: &str,
) -> Result<Option<DeviceDescriptor>, AudioError> {
    Ok(endpoints
        .enumerate_endpoints()?
        .into_iter()
        .find(|d| d.is_named(name)))
}

/// Peak as an integer percentage, truncated.
pub fn peak_to_percent(peak: f32) -> u32 {
    if !peak.is_finite() {
        return 0;
    }
    (peak.clamp(0.0, 1.0) * 100.0) as u32
}
