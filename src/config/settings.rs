// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Settings normalization.
//!
//! The host hands us a loosely typed blob: numbers arrive as strings, colors
//! as free text, and any field may be missing. [`normalize`] re-types every
//! field, repairs what is unusable in place, and reports whether the blob was
//! touched so the caller can persist the repaired copy.

use crate::midi::MIDI_VALUE_MAX;
use crate::render::{MeterConfig, Rgb, VisualStyle};
use audiometer_ipc::{ActionKind, ActionSettings, MeterSettings};
use std::ops::RangeInclusive;
use tracing::debug;

/// Default mid threshold, percent.
pub const MID_LEVEL_DEFAULT: i64 = 75;
/// Default peak threshold, percent.
pub const PEAK_LEVEL_DEFAULT: i64 = 85;
/// Highest level an audio endpoint reports (percent of full scale).
pub const AUDIO_LEVEL_MAX: u32 = 100;
pub const MIDI_CHANNEL_DEFAULT: i64 = 1;
pub const MIDI_CC_NUMBER_DEFAULT: i64 = 0;
pub const LOW_COLOR_DEFAULT: &str = "#00FF00";
pub const MID_COLOR_DEFAULT: &str = "#FFFF00";
pub const PEAK_COLOR_DEFAULT: &str = "#FF0000";
pub const BACKGROUND_COLOR_DEFAULT: &str = "#000000";

const LEVEL_PCT_RANGE: RangeInclusive<i64> = 0..=100;
const MIDI_CHANNEL_RANGE: RangeInclusive<i64> = 1..=16;
const MIDI_CC_RANGE: RangeInclusive<i64> = 0..=127;

/// Which MIDI control a control-change meter follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiRouting {
    pub device_name: String,
    /// 1-based channel.
    pub channel: u8,
    pub control_number: u8,
    pub debug_mode: bool,
}

/// Result of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSettings {
    pub config: MeterConfig,
    /// Present for MIDI actions only.
    pub routing: Option<MidiRouting>,
    /// Some field was missing or repaired; the blob should be saved back.
    pub dirty: bool,
}

/// Highest raw value the action's device produces.
pub fn device_max(kind: ActionKind) -> u32 {
    match kind {
        ActionKind::Audio => AUDIO_LEVEL_MAX,
        ActionKind::Midi => MIDI_VALUE_MAX,
    }
}

/// Validate `settings`, repairing invalid fields in place.
pub fn normalize(settings: &mut ActionSettings) -> NormalizedSettings {
    let mut dirty = false;
    let max = device_max(settings.kind()) as i64;
    let config = normalize_meter(settings.meter_mut(), max, &mut dirty);

    let routing = match settings {
        ActionSettings::Audio(_) => None,
        ActionSettings::Midi(midi) => {
            let channel = int_field(
                "midiChannel",
                &mut midi.midi_channel,
                MIDI_CHANNEL_DEFAULT,
                MIDI_CHANNEL_RANGE,
                &mut dirty,
            );
            let control_number = int_field(
                "midiCCNumber",
                &mut midi.midi_cc_number,
                MIDI_CC_NUMBER_DEFAULT,
                MIDI_CC_RANGE,
                &mut dirty,
            );
            Some(MidiRouting {
                device_name: midi.midi_device.clone().unwrap_or_default(),
                channel: channel as u8,
                control_number: control_number as u8,
                debug_mode: midi.debug_mode,
            })
        }
    };

    NormalizedSettings {
        config,
        routing,
        dirty,
    }
}

fn normalize_meter(meter: &mut MeterSettings, device_max: i64, dirty: &mut bool) -> MeterConfig {
    let mid_level_pct = int_field(
        "midLevel",
        &mut meter.mid_level,
        MID_LEVEL_DEFAULT,
        LEVEL_PCT_RANGE,
        dirty,
    );
    let peak_level_pct = int_field(
        "peakLevel",
        &mut meter.peak_level,
        PEAK_LEVEL_DEFAULT,
        LEVEL_PCT_RANGE,
        dirty,
    );
    let max_threshold = int_field(
        "maxThreshold",
        &mut meter.max_threshold,
        device_max,
        1..=device_max,
        dirty,
    );
    // Any integer is accepted here; unknown styles render as the default one.
    let visual_style = int_field(
        "visualStyle",
        &mut meter.visual_style,
        VisualStyle::default().index(),
        i64::MIN..=i64::MAX,
        dirty,
    );

    MeterConfig {
        low_color: color_field("lowColor", &mut meter.low_color, LOW_COLOR_DEFAULT, dirty),
        mid_color: color_field("midColor", &mut meter.mid_color, MID_COLOR_DEFAULT, dirty),
        peak_color: color_field("peakColor", &mut meter.peak_color, PEAK_COLOR_DEFAULT, dirty),
        background_color: color_field(
            "backgroundColor",
            &mut meter.background_color,
            BACKGROUND_COLOR_DEFAULT,
            dirty,
        ),
        mid_level_pct: mid_level_pct as u32,
        peak_level_pct: peak_level_pct as u32,
        max_threshold: max_threshold as u32,
        visual_style: VisualStyle::from_index(visual_style),
        show_level_as_text: meter.show_level_as_text,
    }
}

/// Parse an integer field; missing, unparsable or out-of-range values are
/// replaced with `default`.
fn int_field(
    name: &str,
    field: &mut Option<String>,
    default: i64,
    valid: RangeInclusive<i64>,
    dirty: &mut bool,
) -> i64 {
    let parsed = field.as_deref().and_then(|s| s.trim().parse::<i64>().ok());
    match parsed {
        Some(value) if valid.contains(&value) => value,
        _ => {
            debug!("Repairing setting {} ({:?}) -> {}", name, field, default);
            *field = Some(default.to_string());
            *dirty = true;
            default
        }
    }
}

fn color_field(name: &str, field: &mut Option<String>, default: &str, dirty: &mut bool) -> Rgb {
    if let Some(color) = field.as_deref().and_then(Rgb::from_hex) {
        return color;
    }
    debug!("Repairing setting {} ({:?}) -> {}", name, field, default);
    *field = Some(default.to_string());
    *dirty = true;
    Rgb::from_hex(default).unwrap_or_default()
}
