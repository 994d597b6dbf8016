// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Select entity specific logic.
//!
//! Presents an integer setpoint range as a list of string options.

use crate::configuration::Settings;
use crate::device::{DeviceHandle, SetpointKey, ValueKey};
use crate::entity::{EntityBase, EntityOptions};
use crate::errors::ServiceError;
use crate::host::StateRefresh;
use log::{debug, info, warn};
use std::sync::Arc;

/// Supported select entities with their icons, in setup order.
pub const SELECT_ENTITIES: [(SetpointKey, &str); 4] = [
    (SetpointKey::FanLevel, "mdi:fan"),
    (SetpointKey::CompressorPriority, "mdi:priority-high"),
    (SetpointKey::TempCoolingStartOffset, "mdi:snowflake-thermometer"),
    (SetpointKey::AntilegionellaDay, "mdi:bacteria"),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct SelectOptions {
    pub entity: EntityOptions,
    /// Check the selected option against the option list before writing it to the device.
    pub validate_before_write: bool,
}

impl From<&Settings> for SelectOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            entity: settings.into(),
            validate_before_write: settings.select.validate_before_write,
        }
    }
}

pub struct SelectEntity {
    base: EntityBase,
    key: SetpointKey,
    icon: String,
    min: i64,
    max: i64,
    options: Vec<String>,
    validate_before_write: bool,
}

impl SelectEntity {
    pub fn new(
        device: Arc<dyn DeviceHandle>,
        key: SetpointKey,
        icon: impl Into<String>,
        options: SelectOptions,
    ) -> Self {
        // bounds are only queried once, truncated like the device does for integer setpoints
        let min = device.get_setpoint_min_value(key) as i64;
        let max = device.get_setpoint_max_value(key) as i64;
        let option_list = if min > max {
            Vec::new()
        } else {
            (min..=max).map(|v| v.to_string()).collect()
        };

        Self {
            base: EntityBase::new(device, key.to_string(), Some(key.into()), options.entity),
            key,
            icon: icon.into(),
            min,
            max,
            options: option_list,
            validate_before_write: options.validate_before_write,
        }
    }

    /// Create a select entity from a generic value key.
    ///
    /// Fails for read-only datapoint keys.
    pub fn try_from_value_key(
        device: Arc<dyn DeviceHandle>,
        key: ValueKey,
        icon: impl Into<String>,
        options: SelectOptions,
    ) -> Result<Self, ServiceError> {
        let key = SetpointKey::try_from(key)?;
        Ok(Self::new(device, key, icon, options))
    }

    pub fn base(&self) -> &EntityBase {
        &self.base
    }

    pub fn key(&self) -> SetpointKey {
        self.key
    }

    pub fn icon(&self) -> &str {
        &self.icon
    }

    pub fn min_value(&self) -> i64 {
        self.min
    }

    pub fn max_value(&self) -> i64 {
        self.max
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Option representing the current device value.
    ///
    /// `None` if the device has no value or the value is not one of the options.
    pub fn current_option(&self) -> Option<String> {
        let key = self.base.value_key()?;
        let value = self.base.device().get_value(key)?;
        if !value.is_finite() {
            return None;
        }
        let option = (value as i64).to_string();
        self.options.contains(&option).then_some(option)
    }

    /// Write the selected option to the device.
    ///
    /// The new value is reported back by the device through the update handler.
    pub async fn select_option(&self, option: &str) -> Result<(), ServiceError> {
        let value: i64 = option.trim().parse().map_err(|e| {
            ServiceError::InvalidArgument(format!(
                "[{}] Invalid option '{option}': {e}",
                self.base.unique_id()
            ))
        })?;

        if self.validate_before_write && !self.options.iter().any(|o| o == option) {
            warn!(
                "[{}] Wanted to set {} to {option}, but failed as it is invalid",
                self.base.unique_id(),
                self.key
            );
            return Err(ServiceError::InvalidArgument(format!(
                "Option '{option}' is not in {:?}",
                self.options
            )));
        }

        debug!("[{}] Set {} to {value}", self.base.unique_id(), self.key);
        self.base.device().set_setpoint(self.key, value);
        Ok(())
    }

    pub async fn added_to_host(&self, host: Arc<dyn StateRefresh>) {
        self.base.added_to_host(host).await
    }

    pub async fn will_remove_from_host(&self) {
        self.base.will_remove_from_host().await
    }
}

/// Create the select entities for all supported setpoints the device provides.
pub fn setup_select_entities(
    device: &Arc<dyn DeviceHandle>,
    settings: &Settings,
) -> Vec<SelectEntity> {
    let options = SelectOptions::from(settings);
    let entities: Vec<SelectEntity> = SELECT_ENTITIES
        .iter()
        .filter(|(key, _)| device.provides_value((*key).into()))
        .map(|(key, icon)| SelectEntity::new(device.clone(), *key, *icon, options))
        .collect();

    info!(
        "[{}] Created {} select entities",
        device.get_device_id(),
        entities.len()
    );
    entities
}
