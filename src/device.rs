// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device descriptors shared by the audio and MIDI sides.

use audiometer_ipc::DeviceEntry;

/// What kind of device a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// An operating-system audio endpoint (sink or source).
    AudioEndpoint,
    /// A MIDI input port.
    ControlInput,
}

/// Immutable snapshot of an enumerable device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    pub name: String,
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    pub fn audio_endpoint(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DeviceKind::AudioEndpoint,
        }
    }

    pub fn control_input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DeviceKind::ControlInput,
        }
    }

    /// Identity check: exact for audio endpoints, case-insensitive for MIDI inputs.
    pub fn is_named(&self, name: &str) -> bool {
        match self.kind {
            DeviceKind::AudioEndpoint => self.name == name,
            DeviceKind::ControlInput => self.name.eq_ignore_ascii_case(name),
        }
    }

    /// Property inspector entry for this device.
    pub fn to_entry(&self) -> DeviceEntry {
        DeviceEntry::new(self.name.clone())
    }
}
