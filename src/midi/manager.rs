// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared registry of open MIDI inputs.
//!
//! One [`DeviceConnectionManager`] is created per process and handed to every
//! MIDI meter by `Arc`. It keeps at most one open connection per device and
//! fans every decoded control change out to all subscribers. Device errors
//! never leave this module; they are logged and turned into no-ops.

use crate::device::DeviceDescriptor;
use crate::midi::backend::{ControlInputBackend, InputConnection};
use crate::midi::{parse_control_change, ValueUpdateEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Subscriber callback. Runs on the device driver thread.
pub type EventCallback = Arc<dyn Fn(&ValueUpdateEvent) + Send + Sync>;

/// Token returned by [`DeviceConnectionManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Default)]
struct EventHub {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(u64, EventCallback)>>,
}

impl EventHub {
    fn subscribe(&self, callback: EventCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, callback));
        Subscription(id)
    }

    fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != subscription.0);
        subscribers.len() != before
    }

    /// Deliver to a snapshot so subscribers may (un)subscribe from a callback.
    fn dispatch(&self, event: &ValueUpdateEvent) {
        let snapshot: Vec<EventCallback> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in snapshot {
            callback(event);
        }
    }

    fn len(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// Process-wide owner of MIDI input connections.
pub struct DeviceConnectionManager {
    backend: Arc<dyn ControlInputBackend>,
    /// Open connections keyed by the lower-cased requested name. This lock
    /// serializes connect and disconnect.
    connections: Mutex<HashMap<String, Box<dyn InputConnection>>>,
    device_cache: Mutex<Vec<DeviceDescriptor>>,
    hub: Arc<EventHub>,
}

impl DeviceConnectionManager {
    pub fn new(backend: Arc<dyn ControlInputBackend>) -> Self {
        Self {
            backend,
            connections: Mutex::new(HashMap::new()),
            device_cache: Mutex::new(Vec::new()),
            hub: Arc::new(EventHub::default()),
        }
    }

    /// Available inputs, sorted by name.
    ///
    /// Served from cache unless `force_refresh` is set or the cache is empty.
    /// When enumeration fails the last good list is returned.
    pub fn list_input_devices(&self, force_refresh: bool) -> Vec<DeviceDescriptor> {
        let mut cache = self.device_cache.lock();
        if !force_refresh && !cache.is_empty() {
            return cache.clone();
        }

        match self.backend.enumerate_inputs() {
            Ok(names) => {
                let mut devices: Vec<DeviceDescriptor> = names
                    .into_iter()
                    .map(DeviceDescriptor::control_input)
                    .collect();
                devices.sort_by(|a, b| a.name.cmp(&b.name));
                if devices.is_empty() {
                    warn!("No MIDI input devices found");
                } else {
                    debug!("Found {} MIDI input device(s)", devices.len());
                }
                *cache = devices;
            }
            Err(e) => {
                error!("Failed to enumerate MIDI inputs: {}", e);
            }
        }
        cache.clone()
    }

    /// Open `device_name` unless a live connection to it exists.
    ///
    /// The first input whose name contains `device_name` (ignoring case) is
    /// used. A stale connection is closed and replaced.
    pub fn connect(&self, device_name: &str) {
        let query = device_name.trim();
        if query.is_empty() {
            warn!("Connect called without a MIDI device name");
            return;
        }
        let key = query.to_lowercase();

        let mut connections = self.connections.lock();
        let stale = match connections.get(&key) {
            Some(existing) if existing.is_open() => {
                debug!("MIDI input {} already connected", query);
                return;
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            info!("MIDI input {} went stale, reconnecting", query);
            if let Some(mut connection) = connections.remove(&key) {
                connection.close();
            }
        }

        let device = match self.find_input(&key) {
            Some(device) => device,
            None => {
                warn!("MIDI input not found: {}", query);
                return;
            }
        };

        let hub = Arc::clone(&self.hub);
        let port_name = device.name.clone();
        let callback = Box::new(move |bytes: &[u8]| {
            if let Some(event) = parse_control_change(&port_name, bytes) {
                hub.dispatch(&event);
            }
        });

        match self.backend.open(&device.name, callback) {
            Ok(connection) => {
                info!("Connected MIDI input {}", device.name);
                connections.insert(key, connection);
            }
            Err(e) => {
                error!("Failed to connect MIDI input {}: {}", device.name, e);
            }
        }
    }

    /// Close the connection opened for `device_name`, if any.
    pub fn disconnect(&self, device_name: &str) {
        let key = device_name.trim().to_lowercase();
        let removed = self.connections.lock().remove(&key);
        // Closing may wait for the driver thread, which may be dispatching.
        if let Some(mut connection) = removed {
            connection.close();
            info!("Disconnected MIDI input {}", connection.name());
        }
    }

    /// Close every connection.
    pub fn disconnect_all(&self) {
        let drained: Vec<Box<dyn InputConnection>> =
            self.connections.lock().drain().map(|(_, c)| c).collect();
        for mut connection in drained {
            connection.close();
        }
    }

    pub fn is_connected(&self, device_name: &str) -> bool {
        let key = device_name.trim().to_lowercase();
        self.connections
            .lock()
            .get(&key)
            .map(|c| c.is_open())
            .unwrap_or(false)
    }

    /// Number of registered connections, live or stale.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Receive every event from every open input.
    pub fn subscribe(&self, callback: EventCallback) -> Subscription {
        self.hub.subscribe(callback)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        if !self.hub.unsubscribe(subscription) {
            debug!("Unknown subscription {:?}", subscription);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.len()
    }

    fn find_input(&self, key: &str) -> Option<DeviceDescriptor> {
        let matches = |devices: Vec<DeviceDescriptor>| {
            devices
                .into_iter()
                .find(|d| d.name.to_lowercase().contains(key))
        };
        // A device plugged in after the last enumeration is not cached yet.
        matches(self.list_input_devices(false))
            .or_else(|| matches(self.list_input_devices(true)))
    }
}

impl Drop for DeviceConnectionManager {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::VirtualMidiBackend;

    fn setup(ports: &[&str]) -> (Arc<VirtualMidiBackend>, DeviceConnectionManager) {
        let backend = Arc::new(VirtualMidiBackend::with_ports(ports.iter().copied()));
        let manager = DeviceConnectionManager::new(backend.clone());
        (backend, manager)
    }

    fn recorder(manager: &DeviceConnectionManager) -> Arc<Mutex<Vec<ValueUpdateEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        manager.subscribe(Arc::new(move |e: &ValueUpdateEvent| sink.lock().push(e.clone())));
        events
    }

    #[test]
    fn test_list_sorted_and_cached() {
        let (backend, manager) = setup(&["Zeta", "Alpha"]);
        let names: Vec<String> = manager
            .list_input_devices(false)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);

        backend.add_port("Beta");
        assert_eq!(manager.list_input_devices(false).len(), 2);
        assert_eq!(manager.list_input_devices(true).len(), 3);
    }

    #[test]
    fn test_enumeration_failure_keeps_cache() {
        let (backend, manager) = setup(&["Alpha"]);
        assert_eq!(manager.list_input_devices(true).len(), 1);

        backend.set_fail_enumeration(true);
        assert_eq!(manager.list_input_devices(true).len(), 1);

        let (backend, manager) = setup(&[]);
        backend.set_fail_enumeration(true);
        assert!(manager.list_input_devices(true).is_empty());
    }

    #[test]
    fn test_connect_twice_opens_once() {
        let (backend, manager) = setup(&["nanoKONTROL2"]);
        manager.connect("nanoKONTROL2");
        manager.connect("NANOkontrol2");
        assert_eq!(backend.open_count(), 1);
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.is_connected("nanokontrol2"));
    }

    #[test]
    fn test_concurrent_connects_open_once() {
        let (backend, manager) = setup(&["Alpha"]);
        let manager = Arc::new(manager);

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.connect("Alpha"))
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(backend.open_count(), 1);
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.is_connected("Alpha"));
    }

    #[test]
    fn test_connect_matches_substring() {
        let (backend, manager) = setup(&["Arturia BeatStep", "nanoKONTROL2 MIDI 1"]);
        manager.connect("nanokontrol");
        assert_eq!(backend.live_connections("nanoKONTROL2 MIDI 1"), 1);
        assert_eq!(backend.live_connections("Arturia BeatStep"), 0);
    }

    #[test]
    fn test_connect_failures_swallowed() {
        let (backend, manager) = setup(&["Alpha"]);
        manager.connect("");
        manager.connect("missing");
        backend.set_fail_open(true);
        manager.connect("Alpha");
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn test_stale_handle_replaced() {
        let (backend, manager) = setup(&["Alpha"]);
        manager.connect("Alpha");
        backend.mark_stale("Alpha");
        assert!(!manager.is_connected("Alpha"));

        manager.connect("Alpha");
        assert_eq!(backend.open_count(), 2);
        assert_eq!(backend.live_connections("Alpha"), 1);
        assert_eq!(manager.connection_count(), 1);
    }

    #[test]
    fn test_disconnect() {
        let (backend, manager) = setup(&["Alpha"]);
        manager.disconnect("unknown");
        assert_eq!(manager.connection_count(), 0);

        manager.connect("Alpha");
        manager.disconnect("ALPHA");
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(backend.live_connections("Alpha"), 0);
    }

    #[test]
    fn test_events_fan_out_to_all_subscribers() {
        let (backend, manager) = setup(&["Alpha", "Beta"]);
        let first = recorder(&manager);
        let second = recorder(&manager);
        manager.connect("Alpha");
        manager.connect("Beta");

        backend.send_control_change("Alpha", 1, 7, 64);
        backend.send_control_change("Beta", 2, 1, 10);
        backend.send("Alpha", &[0x90, 60, 100]);

        let expected = vec![
            ValueUpdateEvent {
                device_name: "Alpha".into(),
                channel: 1,
                control_number: 7,
                raw_value: 64,
            },
            ValueUpdateEvent {
                device_name: "Beta".into(),
                channel: 2,
                control_number: 1,
                raw_value: 10,
            },
        ];
        assert_eq!(*first.lock(), expected);
        assert_eq!(*second.lock(), expected);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let (backend, manager) = setup(&["Alpha"]);
        let events = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&events);
        let subscription = manager.subscribe(Arc::new(move |_: &ValueUpdateEvent| {
            *sink.lock() += 1;
        }));
        manager.connect("Alpha");

        backend.send_control_change("Alpha", 1, 7, 1);
        manager.unsubscribe(subscription);
        backend.send_control_change("Alpha", 1, 7, 2);

        assert_eq!(*events.lock(), 1);
        assert_eq!(manager.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_may_unsubscribe_itself() {
        let (backend, manager) = setup(&["Alpha"]);
        let manager = Arc::new(manager);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&manager);
        let own = Arc::clone(&slot);
        let subscription = manager.subscribe(Arc::new(move |_: &ValueUpdateEvent| {
            if let (Some(manager), Some(sub)) = (weak.upgrade(), own.lock().take()) {
                manager.unsubscribe(sub);
            }
        }));
        *slot.lock() = Some(subscription);

        manager.connect("Alpha");
        backend.send_control_change("Alpha", 1, 7, 1);
        assert_eq!(manager.subscriber_count(), 0);
    }
}
