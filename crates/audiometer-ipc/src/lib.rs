// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared settings and message types for AudioMeter actions.
//!
//! This crate defines the JSON contract between the control-surface host and
//! the meter actions: the per-action settings blob the host persists, the
//! device list the property inspector shows, and the messages the inspector
//! sends back.
//!
//! The host form round-trips every numeric field as a string, so all numeric
//! settings are kept as `Option<String>` here. Re-typing them is the job of the
//! settings normalizer in the main crate.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Action identifier for the audio endpoint meter.
pub const AUDIO_ACTION_UUID: &str = "com.audiometer.audiometer";

/// Action identifier for the MIDI control-change meter.
pub const MIDI_ACTION_UUID: &str = "com.audiometer.midimeter";

/// Feedback key carrying the dial canvas image.
pub const FEEDBACK_CANVAS: &str = "canvas";

/// Feedback key carrying the dial title text.
pub const FEEDBACK_TITLE: &str = "title";

/// Payload key used by the property inspector for plugin-bound messages.
pub const PROPERTY_INSPECTOR_KEY: &str = "property_inspector";

/// Which meter an action instance drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Polls an audio endpoint's peak level.
    Audio,
    /// Follows a MIDI control-change value.
    Midi,
}

impl ActionKind {
    /// Host action identifier for this kind.
    pub fn action_uuid(self) -> &'static str {
        match self {
            ActionKind::Audio => AUDIO_ACTION_UUID,
            ActionKind::Midi => MIDI_ACTION_UUID,
        }
    }

    /// Resolve an action kind from the host action identifier.
    pub fn from_action_uuid(uuid: &str) -> Option<Self> {
        match uuid {
            AUDIO_ACTION_UUID => Some(ActionKind::Audio),
            MIDI_ACTION_UUID => Some(ActionKind::Midi),
            _ => None,
        }
    }
}

/// Physical control the action is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    /// A square LCD key.
    #[default]
    Key,
    /// A rotary dial with a touch-strip canvas.
    Dial,
}

impl SurfaceKind {
    /// Map the host's `controller` field ("Keypad" / "Encoder").
    pub fn from_controller(controller: &str) -> Self {
        if controller.eq_ignore_ascii_case("encoder") {
            SurfaceKind::Dial
        } else {
            SurfaceKind::Key
        }
    }
}

/// A device entry as shown in the property inspector picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
}

impl DeviceEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Meter fields common to both action kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSettings {
    #[serde(default, deserialize_with = "lenient_string")]
    pub low_color: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub mid_color: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub peak_color: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub background_color: Option<String>,
    /// Mid threshold in percent of `max_threshold`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub mid_level: Option<String>,
    /// Peak threshold in percent of `max_threshold`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub peak_level: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        serialize_with = "string_as_number"
    )]
    pub visual_style: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub show_level_as_text: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub max_threshold: Option<String>,
}

/// Settings blob of an audio endpoint meter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMeterSettings {
    #[serde(default, deserialize_with = "lenient_string")]
    pub audio_device: Option<String>,
    #[serde(default)]
    pub audio_devices: Option<Vec<DeviceEntry>>,
    #[serde(flatten)]
    pub meter: MeterSettings,
}

/// Settings blob of a MIDI control-change meter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiMeterSettings {
    #[serde(default, deserialize_with = "lenient_string")]
    pub midi_device: Option<String>,
    #[serde(default)]
    pub midi_devices: Option<Vec<DeviceEntry>>,
    /// 1-based MIDI channel.
    #[serde(default, deserialize_with = "lenient_string")]
    pub midi_channel: Option<String>,
    #[serde(
        rename = "midiCCNumber",
        default,
        deserialize_with = "lenient_string"
    )]
    pub midi_cc_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub debug_mode: bool,
    #[serde(flatten)]
    pub meter: MeterSettings,
}

/// Settings blob of one action instance.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSettings {
    Audio(AudioMeterSettings),
    Midi(MidiMeterSettings),
}

impl ActionSettings {
    /// Empty settings for a freshly placed action.
    pub fn empty(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Audio => ActionSettings::Audio(AudioMeterSettings::default()),
            ActionKind::Midi => ActionSettings::Midi(MidiMeterSettings::default()),
        }
    }

    /// Parse a host settings payload.
    ///
    /// A missing or empty payload yields empty settings; a payload that is not
    /// an object is rejected.
    pub fn from_value(kind: ActionKind, value: &Value) -> Result<Self, serde_json::Error> {
        let is_empty = match value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Ok(Self::empty(kind));
        }

        Ok(match kind {
            ActionKind::Audio => ActionSettings::Audio(AudioMeterSettings::deserialize(value)?),
            ActionKind::Midi => ActionSettings::Midi(MidiMeterSettings::deserialize(value)?),
        })
    }

    /// Serialize back into the host payload shape.
    pub fn to_value(&self) -> Value {
        let result = match self {
            ActionSettings::Audio(s) => serde_json::to_value(s),
            ActionSettings::Midi(s) => serde_json::to_value(s),
        };
        result.unwrap_or_default()
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ActionSettings::Audio(_) => ActionKind::Audio,
            ActionSettings::Midi(_) => ActionKind::Midi,
        }
    }

    /// Configured device name, empty when none is selected.
    pub fn device_name(&self) -> &str {
        let name = match self {
            ActionSettings::Audio(s) => s.audio_device.as_deref(),
            ActionSettings::Midi(s) => s.midi_device.as_deref(),
        };
        name.unwrap_or("")
    }

    pub fn meter(&self) -> &MeterSettings {
        match self {
            ActionSettings::Audio(s) => &s.meter,
            ActionSettings::Midi(s) => &s.meter,
        }
    }

    pub fn meter_mut(&mut self) -> &mut MeterSettings {
        match self {
            ActionSettings::Audio(s) => &mut s.meter,
            ActionSettings::Midi(s) => &mut s.meter,
        }
    }

    /// Device list last published to the property inspector.
    pub fn devices(&self) -> Option<&[DeviceEntry]> {
        match self {
            ActionSettings::Audio(s) => s.audio_devices.as_deref(),
            ActionSettings::Midi(s) => s.midi_devices.as_deref(),
        }
    }

    pub fn set_devices(&mut self, devices: Vec<DeviceEntry>) {
        match self {
            ActionSettings::Audio(s) => s.audio_devices = Some(devices),
            ActionSettings::Midi(s) => s.midi_devices = Some(devices),
        }
    }
}

/// Messages the property inspector sends to the plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyInspectorMessage {
    /// Re-enumerate devices and republish the picker list.
    RefreshDevices,
    Unknown(String),
}

impl PropertyInspectorMessage {
    /// Extract the message from a `sendToPlugin` payload.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let command = payload.get(PROPERTY_INSPECTOR_KEY)?.as_str()?;
        if command.eq_ignore_ascii_case("refreshdevices") {
            Some(PropertyInspectorMessage::RefreshDevices)
        } else {
            Some(PropertyInspectorMessage::Unknown(command.to_string()))
        }
    }
}

/// Accept strings, numbers and booleans for a string-typed field.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

/// Accept `true`, `"true"`, `"on"` and non-zero numbers as true.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("on") || s == "1"
        }
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        _ => false,
    })
}

/// The visual style travels as an integer enum on the wire.
fn string_as_number<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(s) => match s.trim().parse::<i64>() {
            Ok(n) => serializer.serialize_i64(n),
            Err(_) => serializer.serialize_str(s),
        },
        None => serializer.serialize_none(),
    }
}
