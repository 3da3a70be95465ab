// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Standalone AudioMeter runner.
//!
//! Hosts the actions listed in `config.toml` without a control-surface
//! application: frames are logged and settings are persisted locally.

use audiometer::audio::AudioEndpoints;
use audiometer::config::{ActionConfig, ConfigManager};
use audiometer::host::PersistingSurface;
use audiometer::midi::{ControlInputBackend, DeviceConnectionManager};
use audiometer::{ControllerOptions, MeterController};
use audiometer_ipc::ActionKind;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(not(feature = "midi"))]
const DEMO_MIDI_PORT: &str = "AudioMeter Virtual Controller";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("audiometer=debug".parse()?),
        )
        .init();

    info!("AudioMeter starting...");

    let config_manager = Arc::new(ConfigManager::new()?);
    let config = config_manager.load_config().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Default::default()
    });
    if !config_manager.config_path().exists() {
        if let Err(e) = config_manager.save_config(&config) {
            warn!("Failed to write default config: {}", e);
        }
    }
    info!("Loaded config: {} action(s)", config.actions.len());

    let options = ControllerOptions::from(&config.general);
    let endpoints = audio_backend();
    let manager = Arc::new(DeviceConnectionManager::new(midi_backend()));

    let controllers: Vec<MeterController> = config
        .actions
        .iter()
        .map(|action| {
            build_controller(
                action,
                &config_manager,
                Arc::clone(&endpoints),
                Arc::clone(&manager),
                options,
            )
        })
        .collect();

    // Handle shutdown signals
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
    }

    for controller in &controllers {
        controller.dispose();
    }
    manager.disconnect_all();

    info!("AudioMeter stopped");
    Ok(())
}

fn build_controller(
    action: &ActionConfig,
    config_manager: &Arc<ConfigManager>,
    endpoints: Arc<dyn AudioEndpoints>,
    manager: Arc<DeviceConnectionManager>,
    options: ControllerOptions,
) -> MeterController {
    // Settings saved by an earlier run win over the config seed.
    let settings = match config_manager.load_action_settings(action.id) {
        Ok(Some(saved)) => saved,
        Ok(None) => action.settings_value(),
        Err(e) => {
            warn!("[{}] Ignoring saved settings: {}", action.id, e);
            action.settings_value()
        }
    };
    let surface = Arc::new(PersistingSurface::new(action.id, Arc::clone(config_manager)));

    match action.kind {
        ActionKind::Audio => MeterController::audio(
            action.id,
            action.surface,
            &settings,
            endpoints,
            surface,
            options,
        ),
        ActionKind::Midi => {
            MeterController::midi(action.id, action.surface, &settings, manager, surface, options)
        }
    }
}

#[cfg(feature = "pulse")]
fn audio_backend() -> Arc<dyn AudioEndpoints> {
    info!("Using PulseAudio endpoints");
    Arc::new(audiometer::audio::PulseEndpoints::new())
}

#[cfg(not(feature = "pulse"))]
fn audio_backend() -> Arc<dyn AudioEndpoints> {
    info!("Using simulated audio endpoints");
    Arc::new(audiometer::audio::SimulatedEndpoints::with_endpoints([
        "Simulated Speakers",
        "Simulated Microphone",
    ]))
}

#[cfg(feature = "midi")]
fn midi_backend() -> Arc<dyn ControlInputBackend> {
    info!("Using system MIDI inputs");
    Arc::new(audiometer::midi::MidirBackend::new())
}

#[cfg(not(feature = "midi"))]
fn midi_backend() -> Arc<dyn ControlInputBackend> {
    use audiometer::midi::VirtualMidiBackend;

    info!("Using virtual MIDI input '{}'", DEMO_MIDI_PORT);
    let backend = Arc::new(VirtualMidiBackend::with_ports([DEMO_MIDI_PORT]));

    // Sweep CC 0 on channel 1 up and down so MIDI meters have something to show.
    let sweep = Arc::clone(&backend);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(40));
        let mut value: i16 = 0;
        let mut step: i16 = 4;
        loop {
            ticker.tick().await;
            sweep.send_control_change(DEMO_MIDI_PORT, 1, 0, value as u8);
            value = (value + step).clamp(0, 127);
            if value == 0 || value == 127 {
                step = -step;
            }
        }
    });
    backend
}
