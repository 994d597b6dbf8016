// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Configuration file handling.

use crate::device::{DatapointKey, SetpointKey, UnitCode};
use config::Config;
use log::warn;
use std::collections::HashMap;

/// Default configuration file.
pub const DEF_CONFIG_FILE: &str = "configuration.yaml";

/// Prefix of environment variables overriding configuration keys.
///
/// Nested keys are separated with a double underscore, e.g.
/// `GENVEX_SELECT__VALIDATE_BEFORE_WRITE=true`.
pub const ENV_PREFIX: &str = "GENVEX";

#[derive(Default, serde::Deserialize, serde::Serialize)]
pub struct Settings {
    pub entity: EntitySettings,
    pub select: SelectSettings,
    pub device: DeviceSettings,
}

#[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct EntitySettings {
    /// Publish the translated unit of measurement to the host.
    ///
    /// Disabled by default: the unit is translated, but not handed over to the host.
    #[serde(default)]
    pub apply_unit_of_measurement: bool,
}

#[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct SelectSettings {
    /// Reject selected options which are not part of the published option list.
    #[serde(default)]
    pub validate_before_write: bool,
}

/// Simulated device description.
#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct DeviceSettings {
    pub id: String,
    pub manufacturer: String,
    pub model_name: String,
    pub device_model: u32,
    pub slave_device_number: u32,
    pub slave_device_model: u32,
    #[serde(default)]
    pub datapoints: HashMap<DatapointKey, DatapointSettings>,
    #[serde(default)]
    pub setpoints: HashMap<SetpointKey, SetpointSettings>,
}

#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct DatapointSettings {
    #[serde(default)]
    pub unit: UnitCode,
    pub value: Option<f64>,
}

#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct SetpointSettings {
    #[serde(default)]
    pub unit: UnitCode,
    pub min: f64,
    pub max: f64,
    pub value: Option<f64>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id: "genvex-sim".to_string(),
            manufacturer: "Genvex".to_string(),
            model_name: "Optima 270".to_string(),
            device_model: 2010,
            slave_device_number: 0,
            slave_device_model: 0,
            datapoints: HashMap::from([
                (
                    DatapointKey::TempSupply,
                    DatapointSettings {
                        unit: UnitCode::Celsius,
                        value: Some(21.3),
                    },
                ),
                (
                    DatapointKey::Humidity,
                    DatapointSettings {
                        unit: UnitCode::Percent,
                        value: Some(44.),
                    },
                ),
            ]),
            setpoints: HashMap::from([
                (
                    SetpointKey::FanLevel,
                    SetpointSettings {
                        unit: UnitCode::Undefined,
                        min: 0.,
                        max: 4.,
                        value: Some(2.),
                    },
                ),
                (
                    SetpointKey::TempCoolingStartOffset,
                    SetpointSettings {
                        unit: UnitCode::Celsius,
                        min: 2.,
                        max: 9.,
                        value: Some(3.),
                    },
                ),
                (
                    SetpointKey::AntilegionellaDay,
                    SetpointSettings {
                        unit: UnitCode::Days,
                        min: 0.,
                        max: 7.,
                        value: Some(0.),
                    },
                ),
            ]),
        }
    }
}

/// Load the configuration settings.
///
/// The application provides default values which can be overriden in the following order:
/// 1. Configuration settings in the yaml or json configuration file specified in `filename`
/// 2. Environment variables with prefix `GENVEX_`
pub fn get_configuration(filename: Option<&str>) -> Result<Settings, config::ConfigError> {
    // default configuration
    let mut config = Config::builder().add_source(Config::try_from(&Settings::default())?);
    // read optional configuration file to override defaults
    if let Some(filename) = filename {
        config = config.add_source(config::File::with_name(filename));
    }

    let config = config
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let settings: Settings = config.try_deserialize()?;

    check_cfg_values(settings)
}

fn check_cfg_values(settings: Settings) -> Result<Settings, config::ConfigError> {
    if settings.device.id.trim().is_empty() {
        return Err(config::ConfigError::Message(
            "device.id must not be empty".into(),
        ));
    }

    for (key, setpoint) in &settings.device.setpoints {
        if setpoint.min > setpoint.max {
            warn!(
                "Setpoint {key} range is empty: min {} > max {}. No options will be offered.",
                setpoint.min, setpoint.max
            );
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn load_yaml(yaml: &str) -> Result<Settings, config::ConfigError> {
        let config = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        check_cfg_values(config.try_deserialize()?)
    }

    #[test]
    fn defaults_keep_legacy_behaviour() {
        let settings = Settings::default();
        assert!(!settings.entity.apply_unit_of_measurement);
        assert!(!settings.select.validate_before_write);
        assert!(settings.device.setpoints.contains_key(&SetpointKey::FanLevel));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let settings = load_yaml(
            r#"
select:
  validate_before_write: true
device:
  id: genvex-42
  slave_device_number: 3
  setpoints:
    compressor_priority:
      min: 0
      max: 1
      value: 1
"#,
        )
        .expect("valid configuration");

        assert!(settings.select.validate_before_write);
        assert!(!settings.entity.apply_unit_of_measurement);
        assert_eq!("genvex-42", settings.device.id);
        assert_eq!(3, settings.device.slave_device_number);
        assert_eq!("Genvex", settings.device.manufacturer);

        let priority = &settings.device.setpoints[&SetpointKey::CompressorPriority];
        assert_eq!(UnitCode::Undefined, priority.unit);
        assert_eq!(Some(1.), priority.value);
        // merged with the default setpoints
        assert!(settings.device.setpoints.contains_key(&SetpointKey::FanLevel));
    }

    #[test]
    fn empty_range_is_accepted() {
        let settings = load_yaml(
            r#"
device:
  setpoints:
    fan_level:
      min: 5
      max: 1
"#,
        )
        .expect("empty range is no configuration error");

        let fan_level = &settings.device.setpoints[&SetpointKey::FanLevel];
        assert_eq!(5., fan_level.min);
        assert_eq!(1., fan_level.max);
    }

    #[test]
    fn empty_device_id_is_rejected() {
        let result = load_yaml("device:\n  id: \"\"\n");
        assert!(result.is_err());
    }
}
