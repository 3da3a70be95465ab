// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! AudioMeter - live audio peak and MIDI control-change meters for
//! control-surface keys and dials.
//!
//! Audio meters poll an endpoint's peak level; MIDI meters follow one
//! control-change controller through a shared [`midi::DeviceConnectionManager`].
//! Both render through the pure color model in [`render`] and push the
//! result to a [`host::HostSurface`].

pub mod audio;
pub mod config;
pub mod controller;
pub mod device;
pub mod host;
pub mod midi;
pub mod render;

pub use controller::{ControllerOptions, ControllerStatus, MeterController, MeterSource};
