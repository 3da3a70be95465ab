// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-action meter controller.
//!
//! A [`MeterController`] owns one action instance: its settings, its level
//! source and the surface it draws on. Audio meters poll their endpoint on a
//! [`TickSource`]; MIDI meters subscribe to the shared
//! [`DeviceConnectionManager`]. Both paths end in the same render-and-push
//! step.
//!
//! Locking: `runtime` is always taken before `state`, and device calls that
//! may wait on a driver thread (connect, disconnect, tick join) are made
//! without holding `state`, which event callbacks need.

pub mod debounce;
pub mod tick;

pub use debounce::Debouncer;
pub use tick::{TickControl, TickFlow, TickSource};

use crate::audio::{peak_to_percent, resolve_endpoint, AudioEndpoints};
use crate::config::{normalize, GeneralConfig, MidiRouting};
use crate::device::DeviceDescriptor;
use crate::host::HostSurface;
use crate::midi::{
    rescale, DeviceConnectionManager, Subscription, ValueUpdateEvent, MIDI_VALUE_MAX,
};
use crate::render::raster::{from_frame, rotate_for_dial};
use crate::render::{render, render_muted, CanvasSize, Glyph, MeterConfig, RenderFrame};
use audiometer_ipc::{
    ActionKind, ActionSettings, DeviceEntry, PropertyInspectorMessage, SurfaceKind,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

// ============================================================================
// OPTIONS
// ============================================================================

/// Canvas and timing shared by every controller of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub canvas: CanvasSize,
    pub tick_interval: Duration,
    /// Poll interval while an endpoint is being resolved.
    pub backoff_interval: Duration,
    pub debounce: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from(&GeneralConfig::default())
    }
}

impl From<&GeneralConfig> for ControllerOptions {
    fn from(general: &GeneralConfig) -> Self {
        Self {
            canvas: CanvasSize::square(general.key_size),
            tick_interval: general.tick_interval(),
            backoff_interval: general.backoff_interval(),
            debounce: general.debounce(),
        }
    }
}

/// Where levels come from.
pub enum MeterSource {
    Audio(Arc<dyn AudioEndpoints>),
    Midi(Arc<DeviceConnectionManager>),
}

impl MeterSource {
    fn kind(&self) -> ActionKind {
        match self {
            MeterSource::Audio(_) => ActionKind::Audio,
            MeterSource::Midi(_) => ActionKind::Midi,
        }
    }
}

/// Coarse controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    Idle,
    Polling,
    Subscribed,
    Disposed,
}

// ============================================================================
// SHARED STATE
// ============================================================================

struct ControllerState {
    settings: ActionSettings,
    config: MeterConfig,
    routing: Option<MidiRouting>,
    /// Resolved audio endpoint.
    endpoint: Option<DeviceDescriptor>,
    debouncer: Debouncer,
    alive: bool,
}

enum Runtime {
    Idle,
    Polling(TickSource),
    Subscribed(Subscription),
}

struct Shared {
    context: Uuid,
    surface_kind: SurfaceKind,
    options: ControllerOptions,
    surface: Arc<dyn HostSurface>,
    source: MeterSource,
    state: Mutex<ControllerState>,
    runtime: Mutex<Runtime>,
}

/// Drives one meter action.
pub struct MeterController {
    shared: Arc<Shared>,
}

impl MeterController {
    /// Audio endpoint meter.
    pub fn audio(
        context: Uuid,
        surface_kind: SurfaceKind,
        initial_settings: &Value,
        endpoints: Arc<dyn AudioEndpoints>,
        surface: Arc<dyn HostSurface>,
        options: ControllerOptions,
    ) -> Self {
        Self::create(
            context,
            surface_kind,
            initial_settings,
            MeterSource::Audio(endpoints),
            surface,
            options,
        )
    }

    /// MIDI control-change meter.
    pub fn midi(
        context: Uuid,
        surface_kind: SurfaceKind,
        initial_settings: &Value,
        manager: Arc<DeviceConnectionManager>,
        surface: Arc<dyn HostSurface>,
        options: ControllerOptions,
    ) -> Self {
        Self::create(
            context,
            surface_kind,
            initial_settings,
            MeterSource::Midi(manager),
            surface,
            options,
        )
    }

    /// Build the controller and start its level source.
    pub fn create(
        context: Uuid,
        surface_kind: SurfaceKind,
        initial_settings: &Value,
        source: MeterSource,
        surface: Arc<dyn HostSurface>,
        options: ControllerOptions,
    ) -> Self {
        let kind = source.kind();
        let mut settings = parse_settings(context, kind, initial_settings);
        let normalized = normalize(&mut settings);
        info!(
            "[{}] Creating {:?} meter on {:?} for '{}'",
            context,
            kind,
            surface_kind,
            settings.device_name()
        );

        let shared = Arc::new(Shared {
            context,
            surface_kind,
            options,
            surface,
            source,
            state: Mutex::new(ControllerState {
                settings,
                config: normalized.config,
                routing: normalized.routing,
                endpoint: None,
                debouncer: Debouncer::new(options.debounce),
                alive: true,
            }),
            runtime: Mutex::new(Runtime::Idle),
        });

        let controller = Self { shared };
        controller.initialize(normalized.dirty);
        controller
    }

    pub fn context(&self) -> Uuid {
        self.shared.context
    }

    /// New settings from the host.
    pub fn on_settings_changed(&self, settings: &Value) {
        let shared = &self.shared;
        let kind = shared.source.kind();
        let mut incoming = parse_settings(shared.context, kind, settings);
        let normalized = normalize(&mut incoming);

        {
            let mut state = shared.state.lock();
            if !state.alive {
                return;
            }
            if state.config.show_level_as_text != normalized.config.show_level_as_text {
                shared.surface.set_title(None);
            }
            if state.settings.device_name() != incoming.device_name() {
                debug!(
                    "[{}] Device changed to '{}'",
                    shared.context,
                    incoming.device_name()
                );
                state.endpoint = None;
            }
            state.settings = incoming;
            state.config = normalized.config;
            state.routing = normalized.routing;
            state.debouncer.reset();
        }

        self.initialize(normalized.dirty);
    }

    /// Key press: toggle the endpoint mute on audio meters.
    pub fn on_key_down(&self) {
        match &self.shared.source {
            MeterSource::Audio(endpoints) => self.toggle_mute(endpoints.as_ref()),
            MeterSource::Midi(_) => debug!("[{}] Key pressed", self.shared.context),
        }
    }

    /// Dial press: same as a key press.
    pub fn on_dial_down(&self) {
        match &self.shared.source {
            MeterSource::Audio(endpoints) => self.toggle_mute(endpoints.as_ref()),
            MeterSource::Midi(_) => debug!("[{}] Dial pressed", self.shared.context),
        }
    }

    /// Message from the property inspector.
    pub fn on_property_inspector(&self, payload: &Value) {
        match PropertyInspectorMessage::from_payload(payload) {
            Some(PropertyInspectorMessage::RefreshDevices) => {
                info!("[{}] Refreshing device list", self.shared.context);
                if self.shared.publish_devices(true) {
                    self.shared.persist_settings();
                }
            }
            Some(PropertyInspectorMessage::Unknown(command)) => {
                debug!(
                    "[{}] Ignoring property inspector command '{}'",
                    self.shared.context, command
                );
            }
            None => trace!(
                "[{}] Property inspector payload without command",
                self.shared.context
            ),
        }
    }

    /// Stop the tick or subscription. Nothing reaches the surface afterwards.
    pub fn dispose(&self) {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if !state.alive {
                return;
            }
            state.alive = false;
        }
        let mut runtime = shared.runtime.lock();
        shared.stop_runtime(&mut runtime);
        info!("[{}] Disposed", shared.context);
    }

    pub fn status(&self) -> ControllerStatus {
        if !self.shared.state.lock().alive {
            return ControllerStatus::Disposed;
        }
        match &*self.shared.runtime.lock() {
            Runtime::Idle => ControllerStatus::Idle,
            Runtime::Polling(tick) if tick.is_running() => ControllerStatus::Polling,
            Runtime::Polling(_) => ControllerStatus::Idle,
            Runtime::Subscribed(_) => ControllerStatus::Subscribed,
        }
    }

    /// Period of the running poll tick, if any.
    pub fn poll_interval(&self) -> Option<Duration> {
        match &*self.shared.runtime.lock() {
            Runtime::Polling(tick) if tick.is_running() => Some(tick.interval()),
            _ => None,
        }
    }

    /// Current settings blob.
    pub fn settings(&self) -> Value {
        self.shared.state.lock().settings.to_value()
    }

    /// Current validated meter configuration.
    pub fn config(&self) -> MeterConfig {
        self.shared.state.lock().config.clone()
    }

    fn initialize(&self, dirty: bool) {
        let shared = &self.shared;
        let devices_changed = shared.publish_devices(false);
        if dirty || devices_changed {
            shared.persist_settings();
        }
        if shared.surface_kind == SurfaceKind::Dial {
            shared.clear_dial();
        }
        Shared::restart(shared);
    }

    fn toggle_mute(&self, endpoints: &dyn AudioEndpoints) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if !state.alive {
            return;
        }
        if state.endpoint.is_none() {
            let name = state.settings.device_name().to_string();
            match resolve_endpoint(endpoints, &name) {
                Ok(found) => state.endpoint = found,
                Err(e) => warn!("[{}] Cannot resolve '{}': {}", shared.context, name, e),
            }
        }
        let endpoint = match &state.endpoint {
            Some(endpoint) => endpoint.name.clone(),
            None => {
                warn!("[{}] No audio device to mute", shared.context);
                return;
            }
        };

        match endpoints.toggle_mute(&endpoint) {
            Ok(muted) => {
                info!("[{}] '{}' muted: {}", shared.context, endpoint, muted);
                shared.surface.set_title(None);
            }
            Err(e) => warn!("[{}] Failed to toggle mute on '{}': {}", shared.context, endpoint, e),
        }
    }
}

impl Drop for MeterController {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    /// Replace the running tick or subscription with one for the current
    /// settings.
    fn restart(this: &Arc<Self>) {
        let mut runtime = this.runtime.lock();
        this.stop_runtime(&mut runtime);

        let device = {
            let state = this.state.lock();
            if !state.alive {
                return;
            }
            state.settings.device_name().trim().to_string()
        };
        if device.is_empty() {
            info!("[{}] No device configured, idle", this.context);
            return;
        }

        match &this.source {
            MeterSource::Audio(_) => {
                let weak: Weak<Shared> = Arc::downgrade(this);
                let started = TickSource::start(
                    &format!("meter-{}", this.context.simple()),
                    this.options.tick_interval,
                    move |control| match weak.upgrade() {
                        Some(shared) => shared.poll(control),
                        None => TickFlow::Stop,
                    },
                );
                match started {
                    Ok(tick) => {
                        debug!("[{}] Polling '{}'", this.context, device);
                        *runtime = Runtime::Polling(tick);
                    }
                    Err(e) => error!("[{}] Failed to start tick thread: {}", this.context, e),
                }
            }
            MeterSource::Midi(manager) => {
                manager.connect(&device);
                let weak: Weak<Shared> = Arc::downgrade(this);
                let subscription = manager.subscribe(Arc::new(move |event: &ValueUpdateEvent| {
                    if let Some(shared) = weak.upgrade() {
                        shared.handle_event(event);
                    }
                }));
                debug!("[{}] Subscribed to '{}'", this.context, device);
                *runtime = Runtime::Subscribed(subscription);
            }
        }
    }

    fn stop_runtime(&self, runtime: &mut Runtime) {
        match std::mem::replace(runtime, Runtime::Idle) {
            Runtime::Idle => {}
            Runtime::Polling(mut tick) => tick.stop(),
            Runtime::Subscribed(subscription) => {
                if let MeterSource::Midi(manager) = &self.source {
                    manager.unsubscribe(subscription);
                }
            }
        }
    }

    /// One polling step of an audio meter.
    fn poll(&self, control: &TickControl) -> TickFlow {
        let endpoints = match &self.source {
            MeterSource::Audio(endpoints) => endpoints,
            MeterSource::Midi(_) => return TickFlow::Stop,
        };
        let mut state = self.state.lock();
        if !state.alive {
            return TickFlow::Stop;
        }

        if state.endpoint.is_none() {
            control.set_interval(self.options.backoff_interval);
            let name = state.settings.device_name().to_string();
            match resolve_endpoint(endpoints.as_ref(), &name) {
                Ok(Some(endpoint)) => {
                    info!("[{}] Resolved audio device '{}'", self.context, name);
                    state.endpoint = Some(endpoint);
                }
                Ok(None) => warn!("[{}] Audio device '{}' not found", self.context, name),
                Err(e) => warn!("[{}] Cannot enumerate audio devices: {}", self.context, e),
            }
            control.set_interval(self.options.tick_interval.min(control.interval()));

            if state.endpoint.is_none() {
                info!("[{}] Stopping poll until settings change", self.context);
                return TickFlow::Stop;
            }
        }

        let name = match &state.endpoint {
            Some(endpoint) => endpoint.name.clone(),
            None => return TickFlow::Stop,
        };
        match endpoints.is_muted(&name) {
            Ok(true) => {
                self.display_muted(&state);
                return TickFlow::Continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("[{}] Audio device '{}' unavailable: {}", self.context, name, e);
                state.endpoint = None;
                return TickFlow::Continue;
            }
        }

        match endpoints.peak_level(&name) {
            Ok(peak) => {
                let level = peak_to_percent(peak);
                trace!("[{}] '{}' peak {}", self.context, name, level);
                self.display_level(&state, level);
            }
            Err(e) => {
                warn!("[{}] Cannot read peak of '{}': {}", self.context, name, e);
                state.endpoint = None;
            }
        }
        TickFlow::Continue
    }

    /// One control-change event from the connection manager.
    fn handle_event(&self, event: &ValueUpdateEvent) {
        let mut state = self.state.lock();
        if !state.alive {
            return;
        }
        let routing = match &state.routing {
            Some(routing) => routing.clone(),
            None => return,
        };

        let matches = DeviceDescriptor::control_input(event.device_name.as_str())
            .is_named(&routing.device_name)
            && event.channel == routing.channel
            && event.control_number == routing.control_number;
        if !matches {
            if routing.debug_mode {
                info!(
                    "[{}] Ignoring {} ch {} cc {} value {}",
                    self.context,
                    event.device_name,
                    event.channel,
                    event.control_number,
                    event.raw_value
                );
            }
            return;
        }

        let max = state.config.max_threshold;
        let level = rescale(event.raw_value as u32, MIDI_VALUE_MAX, max);
        if routing.debug_mode {
            info!(
                "[{}] {} ch {} cc {} value {} -> level {}/{}",
                self.context,
                event.device_name,
                event.channel,
                event.control_number,
                event.raw_value,
                level,
                max
            );
        }

        if !state.debouncer.admit(level, max, Instant::now()) {
            trace!("[{}] Debounced level {}", self.context, level);
            return;
        }
        self.display_level(&state, level);
    }

    fn display_level(&self, state: &ControllerState, level: u32) {
        let frame = render(level, &state.config, self.options.canvas);
        match self.surface_kind {
            SurfaceKind::Key => {
                let frame = if state.config.show_level_as_text {
                    let text = level.to_string();
                    self.surface.set_title(Some(&text));
                    frame.with_overlay_text(text)
                } else {
                    frame
                };
                self.surface.set_image(&from_frame(&frame));
            }
            SurfaceKind::Dial => self.push_feedback(&frame, state.settings.device_name()),
        }
    }

    fn display_muted(&self, state: &ControllerState) {
        let frame = render_muted(&state.config, self.options.canvas);
        let glyph = frame.overlay_icon.unwrap_or(Glyph::Muted).as_str();
        match self.surface_kind {
            SurfaceKind::Key => {
                self.surface.set_image(&from_frame(&frame));
                self.surface.set_title(Some(glyph));
            }
            SurfaceKind::Dial => self.push_feedback(&frame, glyph),
        }
    }

    /// Dials show the meter sideways, filling from the left.
    fn push_feedback(&self, frame: &RenderFrame, title: &str) {
        let canvas = rotate_for_dial(&from_frame(frame));
        self.surface.set_feedback(&canvas, title);
    }

    fn clear_dial(&self) {
        let state = self.state.lock();
        if !state.alive {
            return;
        }
        let blank = render(0, &state.config, self.options.canvas);
        self.push_feedback(&blank, state.settings.device_name());
    }

    /// Write the available devices into the settings blob. Returns whether
    /// the stored list changed.
    fn publish_devices(&self, force_refresh: bool) -> bool {
        let devices = match &self.source {
            MeterSource::Audio(endpoints) => match endpoints.enumerate_endpoints() {
                Ok(devices) => devices,
                Err(e) => {
                    error!("[{}] Failed to enumerate audio devices: {}", self.context, e);
                    return false;
                }
            },
            MeterSource::Midi(manager) => manager.list_input_devices(force_refresh),
        };
        let entries: Vec<DeviceEntry> = devices.iter().map(DeviceDescriptor::to_entry).collect();

        let mut state = self.state.lock();
        if !state.alive || state.settings.devices() == Some(entries.as_slice()) {
            return false;
        }
        state.settings.set_devices(entries);
        true
    }

    fn persist_settings(&self) {
        let blob = {
            let state = self.state.lock();
            if !state.alive {
                return;
            }
            state.settings.to_value()
        };
        self.surface.save_settings(&blob);
    }
}

fn parse_settings(context: Uuid, kind: ActionKind, value: &Value) -> ActionSettings {
    ActionSettings::from_value(kind, value).unwrap_or_else(|e| {
        warn!("[{}] Unreadable settings, using defaults: {}", context, e);
        ActionSettings::empty(kind)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioError, SimulatedEndpoints};
    use crate::host::testing::RecordingSurface;
    use crate::midi::VirtualMidiBackend;
    use crate::render::{Rgb, RgbaImage};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    const BLACK: [u8; 4] = [0, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];

    fn options() -> ControllerOptions {
        ControllerOptions {
            canvas: CanvasSize::square(10),
            tick_interval: Duration::from_millis(5),
            backoff_interval: Duration::from_millis(5),
            debounce: Duration::from_millis(200),
        }
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn meter_fields() -> Value {
        json!({
            "midLevel": "75",
            "peakLevel": "85",
            "maxThreshold": "100",
            "visualStyle": 1,
            "lowColor": "#00FF00",
            "midColor": "#FFFF00",
            "peakColor": "#FF0000",
            "backgroundColor": "#000000",
            "showLevelAsText": false
        })
    }

    fn midi_settings(device: &str) -> Value {
        let mut blob = meter_fields();
        blob["midiDevice"] = json!(device);
        blob["midiChannel"] = json!("1");
        blob["midiCCNumber"] = json!("7");
        blob["debugMode"] = json!(false);
        blob
    }

    fn audio_settings(device: &str) -> Value {
        let mut blob = meter_fields();
        blob["audioDevice"] = json!(device);
        blob
    }

    struct MidiRig {
        backend: Arc<VirtualMidiBackend>,
        manager: Arc<DeviceConnectionManager>,
        surface: Arc<RecordingSurface>,
    }

    impl MidiRig {
        fn new(ports: &[&str]) -> Self {
            let backend = Arc::new(VirtualMidiBackend::with_ports(ports.iter().copied()));
            let manager = Arc::new(DeviceConnectionManager::new(backend.clone()));
            Self {
                backend,
                manager,
                surface: RecordingSurface::new(),
            }
        }

        fn controller(&self, surface_kind: SurfaceKind, settings: &Value) -> MeterController {
            MeterController::midi(
                Uuid::new_v4(),
                surface_kind,
                settings,
                Arc::clone(&self.manager),
                self.surface.clone(),
                options(),
            )
        }
    }

    struct AudioRig {
        endpoints: Arc<SimulatedEndpoints>,
        surface: Arc<RecordingSurface>,
    }

    impl AudioRig {
        fn new(names: &[&str]) -> Self {
            Self {
                endpoints: Arc::new(SimulatedEndpoints::with_endpoints(names.iter().copied())),
                surface: RecordingSurface::new(),
            }
        }

        fn controller(&self, surface_kind: SurfaceKind, settings: &Value) -> MeterController {
            MeterController::audio(
                Uuid::new_v4(),
                surface_kind,
                settings,
                self.endpoints.clone(),
                self.surface.clone(),
                options(),
            )
        }
    }

    /// Endpoints whose enumeration blocks on poll threads until opened.
    struct GatedEndpoints {
        inner: SimulatedEndpoints,
        open: Mutex<bool>,
        opened: parking_lot::Condvar,
        waiting: AtomicBool,
    }

    impl GatedEndpoints {
        fn new(names: &[&str]) -> Self {
            Self {
                inner: SimulatedEndpoints::with_endpoints(names.iter().copied()),
                open: Mutex::new(false),
                opened: parking_lot::Condvar::new(),
                waiting: AtomicBool::new(false),
            }
        }

        fn release(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }
    }

    impl AudioEndpoints for GatedEndpoints {
        fn enumerate_endpoints(&self) -> Result<Vec<DeviceDescriptor>, AudioError> {
            let on_poll_thread = thread::current()
                .name()
                .map_or(false, |name| name.starts_with("meter-"));
            if on_poll_thread {
                let mut open = self.open.lock();
                self.waiting.store(true, Ordering::SeqCst);
                while !*open {
                    self.opened.wait(&mut open);
                }
            }
            self.inner.enumerate_endpoints()
        }

        fn is_muted(&self, name: &str) -> Result<bool, AudioError> {
            self.inner.is_muted(name)
        }

        fn toggle_mute(&self, name: &str) -> Result<bool, AudioError> {
            self.inner.toggle_mute(name)
        }

        fn peak_level(&self, name: &str) -> Result<f32, AudioError> {
            self.inner.peak_level(name)
        }
    }

    /// Half-filled 10x10 key: rows 5..10 low color, rows 0..5 background.
    fn assert_half_filled(image: &RgbaImage) {
        assert_eq!(image.get_pixel(0, 9).0, GREEN);
        assert_eq!(image.get_pixel(9, 5).0, GREEN);
        assert_eq!(image.get_pixel(0, 4).0, BLACK);
        assert_eq!(image.get_pixel(0, 0).0, BLACK);
    }

    // ------------------------------------------------------------------------
    // MIDI
    // ------------------------------------------------------------------------

    #[test]
    fn test_matching_event_renders_rescaled_level() {
        let rig = MidiRig::new(&["Alpha"]);
        let controller = rig.controller(SurfaceKind::Key, &midi_settings("Alpha"));
        assert_eq!(controller.status(), ControllerStatus::Subscribed);
        assert!(rig.manager.is_connected("Alpha"));

        rig.backend.send_control_change("Alpha", 1, 7, 64);

        let images = rig.surface.images();
        assert_eq!(images.len(), 1);
        assert_half_filled(&images[0]);
    }

    #[test]
    fn test_non_matching_events_discarded() {
        let rig = MidiRig::new(&["Alpha", "Beta"]);
        let _controller = rig.controller(SurfaceKind::Key, &midi_settings("Alpha"));
        rig.manager.connect("Beta");

        rig.backend.send_control_change("Alpha", 2, 7, 64);
        rig.backend.send_control_change("Alpha", 1, 8, 64);
        rig.backend.send_control_change("Beta", 1, 7, 64);
        assert!(rig.surface.images().is_empty());
    }

    #[test]
    fn test_intermediate_events_debounced_edges_pass() {
        let rig = MidiRig::new(&["Alpha"]);
        let _controller = rig.controller(SurfaceKind::Key, &midi_settings("Alpha"));

        rig.backend.send_control_change("Alpha", 1, 7, 64);
        rig.backend.send_control_change("Alpha", 1, 7, 64);
        assert_eq!(rig.surface.images().len(), 1);

        rig.backend.send_control_change("Alpha", 1, 7, 127);
        rig.backend.send_control_change("Alpha", 1, 7, 0);
        let images = rig.surface.images();
        assert_eq!(images.len(), 3);
        // Full scale at peak color, then empty.
        assert_eq!(images[1].get_pixel(0, 0).0, Rgb::RED.to_rgba());
        assert_eq!(images[2].get_pixel(0, 9).0, BLACK);
    }

    #[test]
    fn test_level_text_title() {
        let rig = MidiRig::new(&["Alpha"]);
        let mut settings = midi_settings("Alpha");
        settings["showLevelAsText"] = json!(true);
        let _controller = rig.controller(SurfaceKind::Key, &settings);

        rig.backend.send_control_change("Alpha", 1, 7, 64);
        assert_eq!(rig.surface.titles(), vec![Some("50".to_string())]);
    }

    #[test]
    fn test_dial_gets_rotated_feedback_with_device_title() {
        let rig = MidiRig::new(&["Alpha"]);
        let _controller = rig.controller(SurfaceKind::Dial, &midi_settings("Alpha"));

        // Cleared on initialization.
        let feedbacks = rig.surface.feedbacks();
        assert_eq!(feedbacks.len(), 1);
        assert_eq!(feedbacks[0].1, "Alpha");
        assert_eq!(feedbacks[0].0.get_pixel(0, 0).0, BLACK);

        rig.backend.send_control_change("Alpha", 1, 7, 64);
        let feedbacks = rig.surface.feedbacks();
        assert_eq!(feedbacks.len(), 2);
        let (canvas, title) = &feedbacks[1];
        assert_eq!(title, "Alpha");
        // Fill runs from the left edge after rotation.
        assert_eq!(canvas.get_pixel(0, 0).0, GREEN);
        assert_eq!(canvas.get_pixel(4, 9).0, GREEN);
        assert_eq!(canvas.get_pixel(5, 0).0, BLACK);
        assert!(rig.surface.images().is_empty());
    }

    #[test]
    fn test_settings_change_replaces_subscription() {
        let rig = MidiRig::new(&["Alpha", "Beta"]);
        let controller = rig.controller(SurfaceKind::Key, &midi_settings("Alpha"));
        assert_eq!(rig.manager.subscriber_count(), 1);

        controller.on_settings_changed(&midi_settings("Beta"));
        assert_eq!(rig.manager.subscriber_count(), 1);
        assert!(rig.manager.is_connected("Beta"));

        rig.backend.send_control_change("Alpha", 1, 7, 64);
        assert!(rig.surface.images().is_empty());
        rig.backend.send_control_change("Beta", 1, 7, 64);
        assert_eq!(rig.surface.images().len(), 1);
    }

    #[test]
    fn test_dispose_stops_rendering() {
        let rig = MidiRig::new(&["Alpha"]);
        let controller = rig.controller(SurfaceKind::Key, &midi_settings("Alpha"));
        controller.dispose();

        assert_eq!(controller.status(), ControllerStatus::Disposed);
        assert_eq!(rig.manager.subscriber_count(), 0);
        rig.backend.send_control_change("Alpha", 1, 7, 127);
        assert!(rig.surface.images().is_empty());

        // Disposing twice is harmless.
        controller.dispose();
    }

    #[test]
    fn test_repaired_settings_saved_with_device_list() {
        let rig = MidiRig::new(&["Beta", "Alpha"]);
        let _controller = rig.controller(
            SurfaceKind::Key,
            &json!({ "midiDevice": "Alpha", "midLevel": "abc" }),
        );

        let saves = rig.surface.saves();
        assert_eq!(saves.len(), 1);
        let saved = &saves[0];
        assert_eq!(saved["midLevel"], "75");
        assert_eq!(saved["midiChannel"], "1");
        assert_eq!(
            saved["midiDevices"],
            json!([{ "name": "Alpha" }, { "name": "Beta" }])
        );
    }

    #[test]
    fn test_clean_settings_not_saved() {
        let rig = MidiRig::new(&["Alpha"]);
        let mut settings = midi_settings("Alpha");
        settings["midiDevices"] = json!([{ "name": "Alpha" }]);
        let _controller = rig.controller(SurfaceKind::Key, &settings);
        assert!(rig.surface.saves().is_empty());
    }

    #[test]
    fn test_refresh_devices_republishes_list() {
        let rig = MidiRig::new(&["Alpha"]);
        let mut settings = midi_settings("Alpha");
        settings["midiDevices"] = json!([{ "name": "Alpha" }]);
        let controller = rig.controller(SurfaceKind::Key, &settings);

        rig.backend.add_port("Gamma");
        controller.on_property_inspector(&json!({ "property_inspector": "refreshDevices" }));

        let saves = rig.surface.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(
            saves[0]["midiDevices"],
            json!([{ "name": "Alpha" }, { "name": "Gamma" }])
        );
    }

    #[test]
    fn test_no_device_stays_idle() {
        let rig = MidiRig::new(&["Alpha"]);
        let controller = rig.controller(SurfaceKind::Key, &json!({}));
        assert_eq!(controller.status(), ControllerStatus::Idle);
        assert_eq!(rig.manager.connection_count(), 0);
    }

    // ------------------------------------------------------------------------
    // AUDIO
    // ------------------------------------------------------------------------

    #[test]
    fn test_audio_polls_peak_level() {
        let rig = AudioRig::new(&["Speakers"]);
        rig.endpoints.set_peak("Speakers", 0.5);
        let controller = rig.controller(SurfaceKind::Key, &audio_settings("Speakers"));
        assert_eq!(controller.status(), ControllerStatus::Polling);

        assert!(wait_for(|| !rig.surface.images().is_empty()));
        let images = rig.surface.images();
        assert_half_filled(&images[0]);
        controller.dispose();
    }

    #[test]
    fn test_audio_resolve_backs_off_then_restores_tick() {
        let endpoints = Arc::new(GatedEndpoints::new(&["Speakers"]));
        let surface = RecordingSurface::new();
        let tick = Duration::from_millis(5);
        let backoff = Duration::from_millis(250);
        let controller = MeterController::audio(
            Uuid::new_v4(),
            SurfaceKind::Key,
            &audio_settings("Speakers"),
            endpoints.clone(),
            surface.clone(),
            ControllerOptions {
                tick_interval: tick,
                backoff_interval: backoff,
                ..options()
            },
        );

        assert!(wait_for(|| endpoints.waiting.load(Ordering::SeqCst)));
        assert_eq!(controller.poll_interval(), Some(backoff));

        endpoints.release();
        assert!(wait_for(|| !surface.images().is_empty()));
        assert_eq!(controller.poll_interval(), Some(tick));
        assert_eq!(controller.status(), ControllerStatus::Polling);
    }

    #[test]
    fn test_audio_muted_shows_glyph() {
        let rig = AudioRig::new(&["Speakers"]);
        rig.endpoints.set_peak("Speakers", 0.9);
        rig.endpoints.set_muted("Speakers", true);
        let controller = rig.controller(SurfaceKind::Key, &audio_settings("Speakers"));

        assert!(wait_for(|| !rig.surface.images().is_empty()));
        controller.dispose();
        assert!(rig
            .surface
            .titles()
            .contains(&Some(Glyph::Muted.as_str().to_string())));
        assert_eq!(rig.surface.images()[0].get_pixel(0, 9).0, BLACK);
    }

    #[test]
    fn test_audio_unknown_device_stops_polling() {
        let rig = AudioRig::new(&["Speakers"]);
        let controller = rig.controller(SurfaceKind::Key, &audio_settings("Headphones"));
        assert!(wait_for(|| controller.status() == ControllerStatus::Idle));
        assert!(rig.surface.images().is_empty());

        rig.endpoints.add("Headphones");
        controller.on_settings_changed(&audio_settings("Headphones"));
        assert!(wait_for(|| !rig.surface.images().is_empty()));
        controller.dispose();
    }

    #[test]
    fn test_audio_key_press_toggles_mute() {
        let rig = AudioRig::new(&["Speakers"]);
        let controller = rig.controller(SurfaceKind::Key, &audio_settings("Speakers"));

        controller.on_key_down();
        assert!(rig.endpoints.is_muted("Speakers").unwrap());
        assert!(rig.surface.titles().contains(&None));

        controller.on_dial_down();
        assert!(!rig.endpoints.is_muted("Speakers").unwrap());
        controller.dispose();
    }

    #[test]
    fn test_audio_dispose_is_final() {
        let rig = AudioRig::new(&["Speakers"]);
        rig.endpoints.set_peak("Speakers", 0.3);
        let controller = rig.controller(SurfaceKind::Key, &audio_settings("Speakers"));
        assert!(wait_for(|| !rig.surface.images().is_empty()));

        controller.dispose();
        rig.surface.clear();
        thread::sleep(Duration::from_millis(30));
        assert!(rig.surface.calls().is_empty());
        assert_eq!(controller.status(), ControllerStatus::Disposed);
    }

    #[test]
    fn test_title_cleared_when_text_toggled() {
        let rig = AudioRig::new(&["Speakers"]);
        let controller = rig.controller(SurfaceKind::Key, &json!({}));
        rig.surface.clear();

        let mut settings = audio_settings("");
        settings["showLevelAsText"] = json!(true);
        controller.on_settings_changed(&settings);
        assert_eq!(rig.surface.titles(), vec![None]);
        assert!(controller.config().show_level_as_text);
    }
}
