//! Controller state and the value updates the dashboard sends.
//!
//! The controller exposes a flat map of named values. Lights are two
//! independent switches (`sunlight`, `moonlight`) that the dashboard keeps
//! mutually exclusive; a top-off runs the refill pump for
//! `top_off_duration` seconds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Sunlight switch.
pub const SUNLIGHT: &str = "sunlight";
/// Moonlight switch.
pub const MOONLIGHT: &str = "moonlight";
/// Top-off pump run time in seconds.
pub const TOP_OFF_DURATION: &str = "top_off_duration";
/// Cooling fan.
pub const FAN: &str = "fan";

/// Values written in one update, by name.
pub type ControllerValues = BTreeMap<String, Value>;

/// Snapshot of one controller as returned by `GET /controller/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerState {
    /// Controller identity, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_id: Option<String>,
    /// Current values.
    #[serde(default)]
    pub values: ControllerValues,
}

impl ControllerState {
    /// Raw value by name.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Numeric value; numeric strings are accepted.
    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Switch value: `1` or `true` means on, anything else (or missing) off.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        match self.values.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64() == Some(1.0),
            _ => false,
        }
    }

    /// Light mode derived from the two light switches.
    ///
    /// Both switches on is not a mode the dashboard produces; sunlight wins.
    #[must_use]
    pub fn light_mode(&self) -> LightMode {
        if self.flag(SUNLIGHT) {
            LightMode::Sun
        } else if self.flag(MOONLIGHT) {
            LightMode::Moon
        } else {
            LightMode::Off
        }
    }

    /// Values other than the light switches, e.g. temperatures and the fan.
    pub fn readings(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .filter(|(name, _)| name.as_str() != SUNLIGHT && name.as_str() != MOONLIGHT)
            .map(|(name, value)| (name.as_str(), value))
    }
}

/// Tank lighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightMode {
    /// Daylight.
    Sun,
    /// Night light.
    Moon,
    /// All lights off.
    Off,
}

impl LightMode {
    /// Returns a short label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Sun => "sun",
            Self::Moon => "moon",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for LightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LightMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sun" | "sunlight" | "day" => Ok(Self::Sun),
            "moon" | "moonlight" | "night" => Ok(Self::Moon),
            "off" => Ok(Self::Off),
            other => Err(ClientError::InvalidValue(format!(
                "unknown light mode '{other}' (use sun, moon or off)"
            ))),
        }
    }
}

/// Values that switch to `target`, given the current state.
///
/// Turning one light on also turns the other off, but only if it is on, so
/// an update never writes a switch it does not change. Off writes both.
#[must_use]
pub fn light_values(target: LightMode, current: &ControllerState) -> ControllerValues {
    let mut values = ControllerValues::new();
    match target {
        LightMode::Sun => {
            values.insert(SUNLIGHT.into(), Value::from(1));
            if current.flag(MOONLIGHT) {
                values.insert(MOONLIGHT.into(), Value::from(0));
            }
        }
        LightMode::Moon => {
            values.insert(MOONLIGHT.into(), Value::from(1));
            if current.flag(SUNLIGHT) {
                values.insert(SUNLIGHT.into(), Value::from(0));
            }
        }
        LightMode::Off => {
            values.insert(SUNLIGHT.into(), Value::from(0));
            values.insert(MOONLIGHT.into(), Value::from(0));
        }
    }
    values
}

/// Values that run the top-off pump for `duration` (whole seconds).
pub fn top_off_values(duration: Duration) -> Result<ControllerValues> {
    let seconds = duration.as_secs();
    if seconds == 0 {
        return Err(ClientError::InvalidValue(
            "top-off duration must be at least one second".into(),
        ));
    }
    let mut values = ControllerValues::new();
    values.insert(TOP_OFF_DURATION.into(), Value::from(seconds));
    Ok(values)
}

/// Parse `key=value` into a named value.
///
/// Integers, floats and `true`/`false` become JSON numbers and booleans,
/// anything else is sent as a string.
pub fn parse_assignment(input: &str) -> Result<(String, Value)> {
    let (key, raw) = input
        .split_once('=')
        .ok_or_else(|| ClientError::InvalidValue(format!("expected key=value, got '{input}'")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ClientError::InvalidValue(format!("missing key in '{input}'")));
    }

    let raw = raw.trim();
    let value = if let Ok(i) = raw.parse::<i64>() {
        Value::from(i)
    } else if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
        Value::from(f)
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::from(b)
    } else {
        Value::from(raw)
    };
    Ok((key.to_string(), value))
}
