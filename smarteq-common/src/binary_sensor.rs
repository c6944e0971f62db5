//! Decode the many ways the vendor says "on" and "off"
use tracing::debug;

use crate::attributes::AttributeValue;

/// State of a binary sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryState {
    /// Active
    On,

    /// Inactive
    Off,

    /// The value is not one of the known encodings.
    Unknown,
}

impl BinaryState {
    /// The state as a bool, if known.
    #[must_use]
    pub const fn as_bool(self) -> Option<bool> {
        match self {
            Self::On => Some(true),
            Self::Off => Some(false),
            Self::Unknown => None,
        }
    }

    /// Swap on and off, for sensors reporting the opposite of what they are named.
    #[must_use]
    pub const fn inverted(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
            Self::Unknown => Self::Unknown,
        }
    }
}

/// Decode a binary sensor value.
///
/// | value                          | state |
/// |--------------------------------|-------|
/// | `"ACTIVE"`, `"1"`, `"true"`    | on    |
/// | `"INACTIVE"`, `"0"`, `"false"` | off   |
/// | `1`, `1.0`, `true`             | on    |
/// | `0`, `0.0`, `false`            | off   |
/// | anything else                  | unknown |
#[must_use]
#[allow(clippy::float_cmp)]
pub fn decode_binary_state(value: &AttributeValue) -> BinaryState {
    let state = match value {
        AttributeValue::Bool(true) | AttributeValue::Int(1) => BinaryState::On,
        AttributeValue::Bool(false) | AttributeValue::Int(0) => BinaryState::Off,
        AttributeValue::Float(f) if *f == 1.0 => BinaryState::On,
        AttributeValue::Float(f) if *f == 0.0 => BinaryState::Off,
        AttributeValue::Text(s) => match s.as_str() {
            "ACTIVE" | "1" | "true" => BinaryState::On,
            "INACTIVE" | "0" | "false" => BinaryState::Off,
            _ => BinaryState::Unknown,
        },
        _ => BinaryState::Unknown,
    };

    if state == BinaryState::Unknown {
        debug!("Unknown binary sensor value: {value:?}");
    }

    state
}
