// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Periodic tick on a dedicated thread.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What the tick callback wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

struct TickState {
    interval: Duration,
    running: bool,
}

struct TickShared {
    state: Mutex<TickState>,
    wake: Condvar,
}

/// Handle given to the tick callback for adjusting the period.
pub struct TickControl {
    shared: Arc<TickShared>,
}

impl TickControl {
    pub fn interval(&self) -> Duration {
        self.shared.state.lock().interval
    }

    /// Takes effect from the next wait.
    pub fn set_interval(&self, interval: Duration) {
        self.shared.state.lock().interval = interval;
    }
}

/// A thread calling back every `interval` until stopped.
pub struct TickSource {
    shared: Arc<TickShared>,
    handle: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

impl TickSource {
    /// Spawn the tick thread. The first tick fires one interval after start.
    pub fn start<F>(name: &str, interval: Duration, mut callback: F) -> std::io::Result<Self>
    where
        F: FnMut(&TickControl) -> TickFlow + Send + 'static,
    {
        let shared = Arc::new(TickShared {
            state: Mutex::new(TickState {
                interval,
                running: true,
            }),
            wake: Condvar::new(),
        });
        let control = TickControl {
            shared: Arc::clone(&shared),
        };

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let shared = Arc::clone(&control.shared);
                let mut state = shared.state.lock();
                loop {
                    if !wait_tick(&shared, &mut state) {
                        break;
                    }
                    let flow = MutexGuard::unlocked(&mut state, || callback(&control));
                    if flow == TickFlow::Stop {
                        state.running = false;
                        break;
                    }
                }
                debug!("Tick thread exiting");
            })?;

        let thread_id = Some(handle.thread().id());
        Ok(Self {
            shared,
            handle: Some(handle),
            thread_id,
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn interval(&self) -> Duration {
        self.shared.state.lock().interval
    }

    /// Stop ticking and wait for an in-flight tick to finish.
    ///
    /// Called from the tick thread itself, this only flags the stop.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
        }
        self.shared.wake.notify_all();

        if self.thread_id == Some(thread::current().id()) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let name = handle.thread().name().unwrap_or("tick").to_string();
            if handle.join().is_err() {
                warn!("Tick thread '{}' panicked", name);
            }
        }
    }
}

impl Drop for TickSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep one interval. Returns false once stopped.
fn wait_tick(shared: &TickShared, state: &mut MutexGuard<'_, TickState>) -> bool {
    let deadline = Instant::now() + state.interval;
    while state.running {
        if shared.wake.wait_until(state, deadline).timed_out() {
            break;
        }
    }
    state.running
}
