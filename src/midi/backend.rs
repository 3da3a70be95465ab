// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Seam between the connection manager and a MIDI driver.

use crate::midi::MidiError;

/// Raw-message callback attached to an open input. Runs on the driver thread.
pub type InputCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// A MIDI driver able to list and open input ports.
pub trait ControlInputBackend: Send + Sync {
    /// Names of the currently available input ports.
    fn enumerate_inputs(&self) -> Result<Vec<String>, MidiError>;

    /// Open the input called `name` and start delivering messages to `callback`.
    fn open(&self, name: &str, callback: InputCallback)
        -> Result<Box<dyn InputConnection>, MidiError>;
}

/// An open input port.
pub trait InputConnection: Send {
    fn name(&self) -> &str;

    /// Whether the port is still delivering messages.
    fn is_open(&self) -> bool;

    /// Detach the callback and close the port. Idempotent.
    fn close(&mut self);
}
