// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Device value keys and unit codes.

use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Read-only telemetry values reported by the device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    strum_macros::VariantNames,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DatapointKey {
    TempSupply,
    TempOutside,
    TempExhaust,
    TempExtract,
    Humidity,
    Co2Level,
    FanSpeedSupply,
    FanSpeedExtract,
    FilterDaysLeft,
}

/// Read/write control values accepted by the device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    strum_macros::VariantNames,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SetpointKey {
    FanLevel,
    TempSetpoint,
    CompressorPriority,
    TempCoolingStartOffset,
    AntilegionellaDay,
    FilterResetDays,
}

/// Identifier of a single device value: either a datapoint or a setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueKey {
    Datapoint(DatapointKey),
    Setpoint(SetpointKey),
}

impl ValueKey {
    /// Protocol name of the key, e.g. `fan_level`.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKey::Datapoint(key) => key.into(),
            ValueKey::Setpoint(key) => key.into(),
        }
    }

    /// Only setpoints accept writes.
    pub fn is_writable(&self) -> bool {
        matches!(self, ValueKey::Setpoint(_))
    }

    pub fn as_setpoint(&self) -> Option<SetpointKey> {
        match self {
            ValueKey::Setpoint(key) => Some(*key),
            ValueKey::Datapoint(_) => None,
        }
    }
}

impl Display for ValueKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<DatapointKey> for ValueKey {
    fn from(key: DatapointKey) -> Self {
        ValueKey::Datapoint(key)
    }
}

impl From<SetpointKey> for ValueKey {
    fn from(key: SetpointKey) -> Self {
        ValueKey::Setpoint(key)
    }
}

impl TryFrom<ValueKey> for SetpointKey {
    type Error = ServiceError;

    fn try_from(key: ValueKey) -> Result<Self, Self::Error> {
        key.as_setpoint().ok_or_else(|| {
            ServiceError::UnsupportedValueKey(format!("{key} is a read-only datapoint"))
        })
    }
}

impl FromStr for ValueKey {
    type Err = ServiceError;

    /// Parses a protocol key name. Setpoint names take precedence.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(key) = SetpointKey::from_str(s) {
            return Ok(key.into());
        }
        Ok(DatapointKey::from_str(s)?.into())
    }
}

/// Device native unit of a value.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UnitCode {
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
    Years,
    Celsius,
    Percent,
    Ppm,
    Rpm,
    #[default]
    Undefined,
}
