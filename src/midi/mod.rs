// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! MIDI control-change input.
//!
//! Only control-change messages are decoded; everything else a device sends
//! is dropped at the callback.

pub mod backend;
pub mod manager;
#[cfg(feature = "midi")]
pub mod midir_backend;
pub mod virtual_backend;

pub use backend::{ControlInputBackend, InputCallback, InputConnection};
pub use manager::{DeviceConnectionManager, EventCallback, Subscription};
#[cfg(feature = "midi")]
pub use midir_backend::MidirBackend;
pub use virtual_backend::VirtualMidiBackend;

use thiserror::Error;

/// Highest value a 7-bit control-change message carries.
pub const MIDI_VALUE_MAX: u32 = 127;

const STATUS_CONTROL_CHANGE: u8 = 0xB0;

/// Errors from MIDI backends.
#[derive(Debug, Error)]
pub enum MidiError {
    #[error("MIDI backend initialization failed: {0}")]
    Init(String),
    #[error("MIDI input enumeration failed: {0}")]
    Enumerate(String),
    #[error("MIDI input not found: {0}")]
    NotFound(String),
    #[error("Failed to open MIDI input {name}: {reason}")]
    Open { name: String, reason: String },
}

/// One control-change value received from an input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueUpdateEvent {
    pub device_name: String,
    /// 1-based channel.
    pub channel: u8,
    pub control_number: u8,
    pub raw_value: u8,
}

impl ValueUpdateEvent {
    /// Encode back to the three wire bytes.
    pub fn to_bytes(&self) -> [u8; 3] {
        [
            STATUS_CONTROL_CHANGE | (self.channel.saturating_sub(1) & 0x0F),
            self.control_number & 0x7F,
            self.raw_value & 0x7F,
        ]
    }
}

/// Decode a raw MIDI message; `None` unless it is a control change.
pub fn parse_control_change(device_name: &str, bytes: &[u8]) -> Option<ValueUpdateEvent> {
    let (&status, rest) = bytes.split_first()?;
    if status & 0xF0 != STATUS_CONTROL_CHANGE || rest.len() < 2 {
        return None;
    }
    Some(ValueUpdateEvent {
        device_name: device_name.to_string(),
        channel: (status & 0x0F) + 1,
        control_number: rest[0] & 0x7F,
        raw_value: rest[1] & 0x7F,
    })
}

/// Map `raw` from `[0, raw_max]` onto `[0, new_max]`, truncating.
pub fn rescale(raw: u32, raw_max: u32, new_max: u32) -> u32 {
    if raw_max == 0 {
        return 0;
    }
    let scaled = raw.min(raw_max) as u64 * new_max as u64 / raw_max as u64;
    scaled as u32
}
