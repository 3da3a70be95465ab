// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! In-process MIDI backend.
//!
//! Ports are plain names; [`VirtualMidiBackend::send`] feeds bytes to every
//! open connection on a port, on the caller's thread. Used by the runner when
//! no hardware backend is compiled in, and by tests.

use crate::midi::backend::{ControlInputBackend, InputCallback, InputConnection};
use crate::midi::MidiError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

struct VirtualPort {
    name: String,
    open: AtomicBool,
    callback: Mutex<Option<InputCallback>>,
}

/// Software MIDI driver with scriptable ports and failures.
#[derive(Default)]
pub struct VirtualMidiBackend {
    ports: Mutex<Vec<String>>,
    connections: Mutex<Vec<Arc<VirtualPort>>>,
    fail_enumeration: AtomicBool,
    fail_open: AtomicBool,
    opens: AtomicUsize,
}

impl VirtualMidiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with `names`.
    pub fn with_ports<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        for name in names {
            backend.add_port(name);
        }
        backend
    }

    pub fn add_port(&self, name: impl Into<String>) {
        let name = name.into();
        let mut ports = self.ports.lock();
        if !ports.contains(&name) {
            ports.push(name);
        }
    }

    /// Unplug a port. Open connections on it go stale.
    pub fn remove_port(&self, name: &str) {
        self.ports.lock().retain(|p| p != name);
        self.mark_stale(name);
    }

    /// Make open connections on `name` report closed without detaching them.
    pub fn mark_stale(&self, name: &str) {
        for conn in self.connections.lock().iter() {
            if conn.name == name {
                conn.open.store(false, Ordering::SeqCst);
            }
        }
    }

    pub fn set_fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Connections on `name` that are open and attached.
    pub fn live_connections(&self, name: &str) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| c.name == name && c.open.load(Ordering::SeqCst))
            .count()
    }

    /// Deliver raw bytes to every open connection on `port`.
    pub fn send(&self, port: &str, bytes: &[u8]) {
        let targets: Vec<Arc<VirtualPort>> = self
            .connections
            .lock()
            .iter()
            .filter(|c| c.name == port && c.open.load(Ordering::SeqCst))
            .cloned()
            .collect();
        trace!("virtual midi {} -> {} connection(s)", port, targets.len());

        for target in targets {
            if let Some(callback) = target.callback.lock().as_mut() {
                callback(bytes);
            }
        }
    }

    /// Send a control change (`channel` is 1-based).
    pub fn send_control_change(&self, port: &str, channel: u8, control: u8, value: u8) {
        let status = 0xB0 | (channel.saturating_sub(1) & 0x0F);
        self.send(port, &[status, control & 0x7F, value & 0x7F]);
    }
}

impl ControlInputBackend for VirtualMidiBackend {
    fn enumerate_inputs(&self) -> Result<Vec<String>, MidiError> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(MidiError::Enumerate("virtual enumeration failure".into()));
        }
        Ok(self.ports.lock().clone())
    }

    fn open(
        &self,
        name: &str,
        callback: InputCallback,
    ) -> Result<Box<dyn InputConnection>, MidiError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(MidiError::Open {
                name: name.to_string(),
                reason: "virtual open failure".into(),
            });
        }
        if !self.ports.lock().iter().any(|p| p == name) {
            return Err(MidiError::NotFound(name.to_string()));
        }

        let port = Arc::new(VirtualPort {
            name: name.to_string(),
            open: AtomicBool::new(true),
            callback: Mutex::new(Some(callback)),
        });
        {
            let mut connections = self.connections.lock();
            // Forget ports whose connection object has been dropped.
            connections.retain(|c| Arc::strong_count(c) > 1);
            connections.push(Arc::clone(&port));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(VirtualConnection { port }))
    }
}

struct VirtualConnection {
    port: Arc<VirtualPort>,
}

impl InputConnection for VirtualConnection {
    fn name(&self) -> &str {
        &self.port.name
    }

    fn is_open(&self) -> bool {
        self.port.open.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.port.open.store(false, Ordering::SeqCst);
        self.port.callback.lock().take();
    }
}

impl Drop for VirtualConnection {
    fn drop(&mut self) {
        self.close();
    }
}
