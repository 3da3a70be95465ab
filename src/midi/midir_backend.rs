// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hardware MIDI input through `midir`.

use crate::midi::backend::{ControlInputBackend, InputCallback, InputConnection};
use crate::midi::MidiError;
use midir::{Ignore, MidiInput, MidiInputConnection};
use tracing::{debug, warn};

const CLIENT_NAME: &str = "audiometer";

/// Opens system MIDI inputs.
#[derive(Debug, Default)]
pub struct MidirBackend;

impl MidirBackend {
    pub fn new() -> Self {
        Self
    }

    fn client() -> Result<MidiInput, MidiError> {
        let mut input = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
        input.ignore(Ignore::All);
        Ok(input)
    }

    fn port_names(input: &MidiInput) -> Vec<String> {
        input
            .ports()
            .iter()
            .filter_map(|port| input.port_name(port).ok())
            .collect()
    }
}

impl ControlInputBackend for MidirBackend {
    fn enumerate_inputs(&self) -> Result<Vec<String>, MidiError> {
        let input = Self::client()?;
        Ok(Self::port_names(&input))
    }

    fn open(
        &self,
        name: &str,
        mut callback: InputCallback,
    ) -> Result<Box<dyn InputConnection>, MidiError> {
        let input = Self::client()?;
        let port = input
            .ports()
            .into_iter()
            .find(|port| input.port_name(port).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| MidiError::NotFound(name.to_string()))?;

        let connection = input
            .connect(
                &port,
                "audiometer-input",
                move |_stamp, bytes, _| callback(bytes),
                (),
            )
            .map_err(|e| MidiError::Open {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Opened MIDI input {}", name);
        Ok(Box::new(MidirConnection {
            name: name.to_string(),
            connection: Some(connection),
        }))
    }
}

struct MidirConnection {
    name: String,
    connection: Option<MidiInputConnection<()>>,
}

impl InputConnection for MidirConnection {
    fn name(&self) -> &str {
        &self.name
    }

    /// midir has no liveness signal, so an open connection counts as live
    /// while its port is still listed.
    fn is_open(&self) -> bool {
        if self.connection.is_none() {
            return false;
        }
        match MidirBackend::client() {
            Ok(input) => MidirBackend::port_names(&input).contains(&self.name),
            Err(e) => {
                warn!("Cannot check MIDI input {}: {}", self.name, e);
                true
            }
        }
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            debug!("Closed MIDI input {}", self.name);
        }
    }
}

impl Drop for MidirConnection {
    fn drop(&mut self) {
        self.close();
    }
}
