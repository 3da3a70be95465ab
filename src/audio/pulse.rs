// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PulseAudio endpoints (also served by PipeWire's PA compatibility layer).
//!
//! Enumeration and mute changes use a short-lived blocking connection per
//! call. Each metered endpoint gets a monitor thread with its own connection:
//! a `PEAK_DETECT` record stream publishes into [`AtomicMeterLevels`], and a
//! subscription on the endpoint keeps its mute flag current. Polling reads
//! only those atomics.

use crate::audio::{AtomicMeterLevels, AudioEndpoints, AudioError};
use crate::device::DeviceDescriptor;
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::subscribe::{
    Facility, InterestMaskSet, Operation as SubscribeOperation,
};
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::operation::{Operation, State as OperationState};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::{
    FlagSet as StreamFlagSet, PeekResult, State as StreamState, Stream,
};
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const CLIENT_NAME: &str = "audiometer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointKind {
    Sink,
    Source,
}

#[derive(Debug, Clone)]
struct EndpointInfo {
    display_name: String,
    pa_name: String,
    /// Server index, used to match subscription events.
    index: u32,
    kind: EndpointKind,
    /// Source the peak stream records from.
    peak_source: String,
    muted: bool,
}

// ============================================================================
// BLOCKING CONNECTION
// ============================================================================

struct PulseConnection {
    mainloop: Mainloop,
    context: Context,
}

impl PulseConnection {
    fn open() -> Result<Self, AudioError> {
        let mut mainloop = Mainloop::new()
            .ok_or_else(|| AudioError::Unavailable("failed to create PA mainloop".into()))?;
        let mut context = Context::new(&mainloop, CLIENT_NAME)
            .ok_or_else(|| AudioError::Unavailable("failed to create PA context".into()))?;
        context
            .connect(None, ContextFlagSet::NOFLAGS, None)
            .map_err(|e| AudioError::Unavailable(format!("PA connect failed: {}", e)))?;

        loop {
            iterate(&mut mainloop)?;
            match context.get_state() {
                ContextState::Ready => break,
                ContextState::Failed | ContextState::Terminated => {
                    return Err(AudioError::Unavailable("PA context failed".into()));
                }
                _ => continue,
            }
        }
        Ok(Self { mainloop, context })
    }

    fn wait<T: ?Sized>(&mut self, op: Operation<T>) -> Result<(), AudioError> {
        while op.get_state() == OperationState::Running {
            iterate(&mut self.mainloop)?;
        }
        Ok(())
    }

    /// Active sinks and non-monitor sources.
    fn endpoints(&mut self) -> Result<Vec<EndpointInfo>, AudioError> {
        let found: Rc<RefCell<Vec<EndpointInfo>>> = Rc::new(RefCell::new(Vec::new()));

        let sinks = Rc::clone(&found);
        let op = self
            .context
            .introspect()
            .get_sink_info_list(move |result| {
                if let ListResult::Item(info) = result {
                    let pa_name = match info.name.as_deref() {
                        Some(name) => name.to_string(),
                        None => return,
                    };
                    sinks.borrow_mut().push(EndpointInfo {
                        display_name: info
                            .description
                            .as_deref()
                            .unwrap_or(&pa_name)
                            .to_string(),
                        peak_source: info
                            .monitor_source_name
                            .as_deref()
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("{}.monitor", pa_name)),
                        pa_name,
                        index: info.index,
                        kind: EndpointKind::Sink,
                        muted: info.mute,
                    });
                }
            });
        self.wait(op)?;

        let sources = Rc::clone(&found);
        let op = self
            .context
            .introspect()
            .get_source_info_list(move |result| {
                if let ListResult::Item(info) = result {
                    if info.monitor_of_sink.is_some() {
                        return;
                    }
                    let pa_name = match info.name.as_deref() {
                        Some(name) => name.to_string(),
                        None => return,
                    };
                    sources.borrow_mut().push(EndpointInfo {
                        display_name: info
                            .description
                            .as_deref()
                            .unwrap_or(&pa_name)
                            .to_string(),
                        peak_source: pa_name.clone(),
                        pa_name,
                        index: info.index,
                        kind: EndpointKind::Source,
                        muted: info.mute,
                    });
                }
            });
        self.wait(op)?;

        let endpoints = found.borrow().clone();
        Ok(endpoints)
    }

    fn set_mute(&mut self, endpoint: &EndpointInfo, mute: bool) -> Result<(), AudioError> {
        let success = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&success);
        let callback: Box<dyn FnMut(bool)> = Box::new(move |ok| *flag.borrow_mut() = ok);

        let mut introspector = self.context.introspect();
        let op = match endpoint.kind {
            EndpointKind::Sink => {
                introspector.set_sink_mute_by_name(&endpoint.pa_name, mute, Some(callback))
            }
            EndpointKind::Source => {
                introspector.set_source_mute_by_name(&endpoint.pa_name, mute, Some(callback))
            }
        };
        self.wait(op)?;

        let ok = *success.borrow();
        if ok {
            Ok(())
        } else {
            Err(AudioError::Operation(format!(
                "failed to set mute on {}",
                endpoint.display_name
            )))
        }
    }
}

impl Drop for PulseConnection {
    fn drop(&mut self) {
        self.context.disconnect();
    }
}

fn iterate(mainloop: &mut Mainloop) -> Result<(), AudioError> {
    match mainloop.iterate(true) {
        IterateResult::Success(_) => Ok(()),
        IterateResult::Quit(_) | IterateResult::Err(_) => {
            Err(AudioError::Unavailable("PA mainloop iteration failed".into()))
        }
    }
}

// ============================================================================
// PEAK MONITOR
// ============================================================================

/// What a monitor thread publishes for its endpoint.
struct MonitorState {
    levels: AtomicMeterLevels,
    muted: AtomicBool,
    running: AtomicBool,
}

/// Peak stream and mute watch on one endpoint.
struct PeakMonitor {
    display_name: String,
    state: Arc<MonitorState>,
    handle: Option<JoinHandle<()>>,
}

impl PeakMonitor {
    fn start(endpoint: &EndpointInfo) -> Result<Self, AudioError> {
        let state = Arc::new(MonitorState {
            levels: AtomicMeterLevels::new(),
            muted: AtomicBool::new(endpoint.muted),
            running: AtomicBool::new(true),
        });

        let thread_state = Arc::clone(&state);
        let thread_endpoint = endpoint.clone();
        let handle = thread::Builder::new()
            .name(format!("pa-peak-{}", endpoint.display_name))
            .spawn(move || peak_thread(thread_endpoint, thread_state))
            .map_err(|e| AudioError::Operation(format!("failed to spawn peak thread: {}", e)))?;

        info!(
            "Started peak monitor for '{}' on {}",
            endpoint.display_name, endpoint.peak_source
        );
        Ok(Self {
            display_name: endpoint.display_name.clone(),
            state,
            handle: Some(handle),
        })
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Relaxed)
    }

    fn stop(&mut self) {
        self.state.running.store(false, Ordering::Relaxed);
        self.state.levels.reset();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Peak monitor thread for '{}' panicked", self.display_name);
            }
        }
    }
}

impl Drop for PeakMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn peak_thread(endpoint: EndpointInfo, state: Arc<MonitorState>) {
    if let Err(e) = run_peak_stream(&endpoint, &state) {
        error!("Peak monitor for {} stopped: {}", endpoint.peak_source, e);
    }
    state.running.store(false, Ordering::Relaxed);
    debug!("Peak monitor thread for {} exiting", endpoint.peak_source);
}

impl EndpointKind {
    fn facility(self) -> Facility {
        match self {
            EndpointKind::Sink => Facility::Sink,
            EndpointKind::Source => Facility::Source,
        }
    }

    fn interest(self) -> InterestMaskSet {
        match self {
            EndpointKind::Sink => InterestMaskSet::SINK,
            EndpointKind::Source => InterestMaskSet::SOURCE,
        }
    }
}

/// Whether a subscription event reports a change of this endpoint.
fn is_change_of(
    kind: EndpointKind,
    index: u32,
    facility: Option<Facility>,
    op: Option<SubscribeOperation>,
    event_index: u32,
) -> bool {
    facility == Some(kind.facility())
        && op == Some(SubscribeOperation::Changed)
        && event_index == index
}

/// Subscribe to changes of the endpoint. The returned flag is raised on
/// every change event and starts raised so the first pass reads the state.
fn watch_endpoint(context: &mut Context, endpoint: &EndpointInfo) -> Rc<Cell<bool>> {
    let changed = Rc::new(Cell::new(true));
    let flag = Rc::clone(&changed);
    let (kind, index) = (endpoint.kind, endpoint.index);

    context.set_subscribe_callback(Some(Box::new(
        move |facility: Option<Facility>, op: Option<SubscribeOperation>, event_index: u32| {
            if is_change_of(kind, index, facility, op, event_index) {
                flag.set(true);
            }
        },
    )));
    let name = endpoint.display_name.clone();
    context.subscribe(kind.interest(), move |ok| {
        if !ok {
            warn!("Mute subscription for '{}' refused", name);
        }
    });
    changed
}

/// Ask the server for the endpoint's mute flag; the answer lands in `state`
/// during a later mainloop iteration.
fn request_mute(context: &Context, endpoint: &EndpointInfo, state: &Arc<MonitorState>) {
    let target = Arc::clone(state);
    let introspector = context.introspect();
    match endpoint.kind {
        EndpointKind::Sink => {
            introspector.get_sink_info_by_name(&endpoint.pa_name, move |result| {
                if let ListResult::Item(info) = result {
                    target.muted.store(info.mute, Ordering::Relaxed);
                }
            });
        }
        EndpointKind::Source => {
            introspector.get_source_info_by_name(&endpoint.pa_name, move |result| {
                if let ListResult::Item(info) = result {
                    target.muted.store(info.mute, Ordering::Relaxed);
                }
            });
        }
    }
}

fn run_peak_stream(endpoint: &EndpointInfo, state: &Arc<MonitorState>) -> Result<(), AudioError> {
    let source = endpoint.peak_source.as_str();
    let mut conn = PulseConnection::open()?;

    // One mono float per detected peak, ~60 per second.
    let spec = Spec {
        format: Format::FLOAT32NE,
        rate: 60,
        channels: 1,
    };
    let mut stream = Stream::new(&mut conn.context, "peak-meter", &spec, None)
        .ok_or_else(|| AudioError::Operation("failed to create PA stream".into()))?;
    let flags =
        StreamFlagSet::PEAK_DETECT | StreamFlagSet::ADJUST_LATENCY | StreamFlagSet::DONT_MOVE;
    stream
        .connect_record(Some(source), None, flags)
        .map_err(|e| AudioError::Operation(format!("record connect failed: {}", e)))?;

    loop {
        iterate(&mut conn.mainloop)?;
        match stream.get_state() {
            StreamState::Ready => break,
            StreamState::Failed | StreamState::Terminated => {
                return Err(AudioError::Operation("PA stream failed".into()));
            }
            _ => continue,
        }
    }

    let changed = watch_endpoint(&mut conn.context, endpoint);

    while state.running.load(Ordering::Relaxed) {
        if changed.replace(false) {
            request_mute(&conn.context, endpoint, state);
        }
        match conn.mainloop.iterate(false) {
            IterateResult::Success(_) => {}
            IterateResult::Quit(_) | IterateResult::Err(_) => {
                warn!("PA mainloop error on peak stream {}", source);
                break;
            }
        }
        if stream.get_state() != StreamState::Ready {
            warn!("Peak stream {} no longer ready", source);
            break;
        }

        while let Some(readable) = stream.readable_size() {
            if readable == 0 {
                break;
            }
            match stream.peek() {
                Ok(PeekResult::Data(data)) => {
                    if data.len() >= 4 {
                        let peak = f32::from_ne_bytes([data[0], data[1], data[2], data[3]]).abs();
                        trace!("Peak {}: {:.4}", source, peak);
                        state.levels.store(peak);
                    }
                    let _ = stream.discard();
                }
                Ok(PeekResult::Hole(_)) => {
                    let _ = stream.discard();
                }
                Ok(PeekResult::Empty) => break,
                Err(e) => {
                    warn!("Peak stream {} peek error: {}", source, e);
                    break;
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }

    conn.context.set_subscribe_callback(None);
    stream.disconnect().ok();
    Ok(())
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// Audio endpoints of the local PulseAudio (or PipeWire-Pulse) server.
#[derive(Default)]
pub struct PulseEndpoints {
    /// Last enumeration, keyed by display name.
    endpoints: Mutex<HashMap<String, EndpointInfo>>,
    monitors: Mutex<HashMap<String, PeakMonitor>>,
}

impl PulseEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    fn refresh(&self) -> Result<Vec<EndpointInfo>, AudioError> {
        let found = PulseConnection::open()?.endpoints()?;
        let mut endpoints = self.endpoints.lock();
        endpoints.clear();
        for info in &found {
            endpoints
                .entry(info.display_name.clone())
                .or_insert_with(|| info.clone());
        }
        // Stop meters on endpoints that went away.
        self.monitors
            .lock()
            .retain(|name, _| endpoints.contains_key(name));
        Ok(found)
    }

    fn lookup(&self, name: &str) -> Result<EndpointInfo, AudioError> {
        if let Some(info) = self.endpoints.lock().get(name) {
            return Ok(info.clone());
        }
        self.fetch(name)
    }

    /// Current endpoint state straight from the server.
    fn fetch(&self, name: &str) -> Result<EndpointInfo, AudioError> {
        self.refresh()?
            .into_iter()
            .find(|info| info.display_name == name)
            .ok_or_else(|| AudioError::EndpointNotFound(name.to_string()))
    }

    /// State of the running monitor on `name`, starting one if needed.
    fn monitor(&self, name: &str) -> Result<Arc<MonitorState>, AudioError> {
        let died = match self.monitors.lock().get(name) {
            Some(monitor) if monitor.is_running() => return Ok(Arc::clone(&monitor.state)),
            Some(_) => true,
            None => false,
        };
        if died {
            // The endpoint may be gone; do not restart from a stale cache.
            self.refresh()?;
        }

        let info = self.lookup(name)?;
        let monitor = PeakMonitor::start(&info)?;
        let state = Arc::clone(&monitor.state);
        let replaced = self.monitors.lock().insert(name.to_string(), monitor);
        drop(replaced);
        Ok(state)
    }
}

impl AudioEndpoints for PulseEndpoints {
    fn enumerate_endpoints(&self) -> Result<Vec<DeviceDescriptor>, AudioError> {
        let mut devices: Vec<DeviceDescriptor> = self
            .refresh()?
            .into_iter()
            .map(|info| DeviceDescriptor::audio_endpoint(info.display_name))
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices.dedup();
        Ok(devices)
    }

    fn is_muted(&self, name: &str) -> Result<bool, AudioError> {
        Ok(self.monitor(name)?.muted.load(Ordering::Relaxed))
    }

    fn toggle_mute(&self, name: &str) -> Result<bool, AudioError> {
        let info = self.fetch(name)?;
        let muted = !info.muted;
        PulseConnection::open()?.set_mute(&info, muted)?;
        if let Some(monitor) = self.monitors.lock().get(name) {
            monitor.state.muted.store(muted, Ordering::Relaxed);
        }
        debug!("Set mute on '{}' to {}", name, muted);
        Ok(muted)
    }

    fn peak_level(&self, name: &str) -> Result<f32, AudioError> {
        Ok(self.monitor(name)?.levels.load().clamp(0.0, 1.0))
    }
}
