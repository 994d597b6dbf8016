// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Base entity logic shared by all Genvex Connect entities.
//!
//! An entity binds one device value to one host platform entity slot. Entities are push updated:
//! while attached to the host, a value change reported by the device triggers a state refresh.

mod select;

pub use select::*;

use crate::DOMAIN;
use crate::configuration::Settings;
use crate::device::{DeviceHandle, UnitCode, UpdateHandler, ValueKey};
use crate::host::StateRefresh;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Host platform unit of measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
pub enum HostUnit {
    #[strum(serialize = "s")]
    Seconds,
    #[strum(serialize = "min")]
    Minutes,
    #[strum(serialize = "h")]
    Hours,
    #[strum(serialize = "d")]
    Days,
    #[strum(serialize = "m")]
    Months,
    #[strum(serialize = "y")]
    Years,
    #[strum(serialize = "°C")]
    Celsius,
    #[strum(serialize = "%")]
    Percentage,
    #[strum(serialize = "ppm")]
    PartsPerMillion,
    #[strum(serialize = "rpm")]
    RevolutionsPerMinute,
}

/// Translate a device unit to the host unit vocabulary.
///
/// Returns `default` for units without host representation.
pub fn parse_unit_of_measure(unit: UnitCode, default: Option<HostUnit>) -> Option<HostUnit> {
    match unit {
        UnitCode::Seconds => Some(HostUnit::Seconds),
        UnitCode::Minutes => Some(HostUnit::Minutes),
        UnitCode::Hours => Some(HostUnit::Hours),
        UnitCode::Days => Some(HostUnit::Days),
        UnitCode::Months => Some(HostUnit::Months),
        UnitCode::Years => Some(HostUnit::Years),
        UnitCode::Celsius => Some(HostUnit::Celsius),
        UnitCode::Percent => Some(HostUnit::Percentage),
        UnitCode::Ppm => Some(HostUnit::PartsPerMillion),
        UnitCode::Rpm => Some(HostUnit::RevolutionsPerMinute),
        UnitCode::Undefined => default,
    }
}

/// What to do with the translated unit of measurement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UnitAssignment {
    /// Translate, but don't expose the unit to the host.
    #[default]
    Discard,
    /// Expose the translated unit as entity unit of measurement.
    Apply,
}

#[derive(Debug, Clone, Copy)]
pub struct EntityOptions {
    /// Register the default change handler while attached to the host.
    pub use_default_update_handler: bool,
    /// Overrides the host default if set.
    pub default_enabled: Option<bool>,
    /// Overrides the host default if set.
    pub default_visible: Option<bool>,
    pub unit_assignment: UnitAssignment,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            use_default_update_handler: true,
            default_enabled: None,
            default_visible: None,
            unit_assignment: UnitAssignment::Discard,
        }
    }
}

impl From<&Settings> for EntityOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            unit_assignment: if settings.entity.apply_unit_of_measurement {
                UnitAssignment::Apply
            } else {
                UnitAssignment::Discard
            },
            ..Default::default()
        }
    }
}

/// Physical device summary for the host device registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: BTreeSet<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub hw_version: String,
}

type HostSlot = Arc<RwLock<Option<Arc<dyn StateRefresh>>>>;

pub struct EntityBase {
    device: Arc<dyn DeviceHandle>,
    translation_key: String,
    unique_id: String,
    value_key: Option<ValueKey>,
    unit_of_measurement: Option<HostUnit>,
    unit_assignment: UnitAssignment,
    use_default_update_handler: bool,
    registry_enabled_default: bool,
    registry_visible_default: bool,
    host: HostSlot,
    update_handler: UpdateHandler,
}

impl EntityBase {
    pub fn new(
        device: Arc<dyn DeviceHandle>,
        name: impl Into<String>,
        value_key: Option<ValueKey>,
        options: EntityOptions,
    ) -> Self {
        let translation_key = name.into();
        let id_suffix = translation_key
            .split("__")
            .next()
            .unwrap_or(&translation_key);
        let unique_id = format!("{}_{}", device.get_device_id(), id_suffix);

        let host: HostSlot = Default::default();
        let update_handler = {
            let host = host.clone();
            let unique_id = unique_id.clone();
            UpdateHandler::new(move |old_value, new_value| {
                on_change(&host, &unique_id, old_value, new_value)
            })
        };

        let mut entity = Self {
            device,
            translation_key,
            unique_id,
            value_key,
            unit_of_measurement: None,
            unit_assignment: options.unit_assignment,
            use_default_update_handler: options.use_default_update_handler,
            registry_enabled_default: options.default_enabled.unwrap_or(true),
            registry_visible_default: options.default_visible.unwrap_or(true),
            host,
            update_handler,
        };

        if let Some(key) = value_key {
            let unit = entity.device.get_unit_of_measure(key);
            entity.set_unit_of_measurement(unit);
        }

        entity
    }

    fn set_unit_of_measurement(&mut self, unit: UnitCode) {
        let host_unit = parse_unit_of_measure(unit, None);
        match self.unit_assignment {
            UnitAssignment::Discard => {
                debug!("[{}] Ignoring unit {unit} ({host_unit:?})", self.unique_id)
            }
            UnitAssignment::Apply => self.unit_of_measurement = host_unit,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn translation_key(&self) -> &str {
        &self.translation_key
    }

    pub fn value_key(&self) -> Option<ValueKey> {
        self.value_key
    }

    pub fn device(&self) -> &Arc<dyn DeviceHandle> {
        &self.device
    }

    /// Entities are push updated, the host must never poll them.
    pub fn should_poll(&self) -> bool {
        false
    }

    pub fn has_entity_name(&self) -> bool {
        true
    }

    pub fn unit_of_measurement(&self) -> Option<HostUnit> {
        self.unit_of_measurement
    }

    pub fn entity_registry_enabled_default(&self) -> bool {
        self.registry_enabled_default
    }

    pub fn entity_registry_visible_default(&self) -> bool {
        self.registry_visible_default
    }

    /// Check if the entity is part of a live host session.
    pub fn is_attached(&self) -> bool {
        self.host
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn subscribed_key(&self) -> Option<ValueKey> {
        self.value_key.filter(|_| self.use_default_update_handler)
    }

    /// Called by the host when the entity has been added to its live registry.
    pub async fn added_to_host(&self, host: Arc<dyn StateRefresh>) {
        *self.host.write().unwrap_or_else(PoisonError::into_inner) = Some(host);
        if let Some(key) = self.subscribed_key() {
            self.device
                .register_update_handler(key, self.update_handler.clone());
        }
        info!("[{}] Added to host", self.unique_id);
    }

    /// Called by the host before the entity is removed from its live registry.
    pub async fn will_remove_from_host(&self) {
        if let Some(key) = self.subscribed_key() {
            self.device
                .deregister_update_handler(key, &self.update_handler);
        }
        *self.host.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!("[{}] Removed from host", self.unique_id);
    }

    /// Device registry information, always queried from the device handle.
    pub fn device_info(&self) -> DeviceInfo {
        let device_id = self.device.get_device_id();
        DeviceInfo {
            identifiers: BTreeSet::from([(DOMAIN.to_string(), device_id.clone())]),
            name: device_id,
            manufacturer: self.device.get_device_manufacturer(),
            model: self.device.get_loaded_model_name(),
            hw_version: format!(
                "M: {}, SD: {}, SDM: {}",
                self.device.get_device_model(),
                self.device.get_slave_device_number(),
                self.device.get_slave_device_model()
            ),
        }
    }
}

fn on_change(host: &HostSlot, unique_id: &str, old_value: Option<f64>, new_value: Option<f64>) {
    let host = host
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    // not (or no longer) attached to a host session
    let Some(host) = host else {
        return;
    };
    debug!("Value Update: {unique_id}: {old_value:?} -> {new_value:?}");
    host.request_state_refresh(unique_id, true);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::device::{DatapointKey, SetpointKey, SimulatedDevice};
    use rstest::rstest;
    use std::sync::Mutex;

    /// Host test double recording all refresh requests.
    #[derive(Default)]
    pub(crate) struct RecordingHost {
        pub(crate) requests: Mutex<Vec<(String, bool)>>,
    }

    impl StateRefresh for RecordingHost {
        fn request_state_refresh(&self, unique_id: &str, force_refresh: bool) {
            self.requests
                .lock()
                .expect("poisoned")
                .push((unique_id.to_string(), force_refresh));
        }
    }

    impl RecordingHost {
        pub(crate) fn count(&self) -> usize {
            self.requests.lock().expect("poisoned").len()
        }
    }

    fn device() -> Arc<SimulatedDevice> {
        let device = SimulatedDevice::new("genvex-1", "Genvex")
            .with_model("Optima 270", 2010)
            .with_setpoint(SetpointKey::FanLevel, UnitCode::Undefined, 0., 4., Some(2.))
            .with_datapoint(DatapointKey::TempSupply.into(), UnitCode::Celsius, Some(21.))
            .with_datapoint(DatapointKey::Co2Level.into(), UnitCode::Ppm, None);
        device.set_slave_device(1, 17);
        Arc::new(device)
    }

    #[rstest]
    #[case(UnitCode::Seconds, "s")]
    #[case(UnitCode::Minutes, "min")]
    #[case(UnitCode::Hours, "h")]
    #[case(UnitCode::Days, "d")]
    #[case(UnitCode::Months, "m")]
    #[case(UnitCode::Years, "y")]
    #[case(UnitCode::Celsius, "°C")]
    #[case(UnitCode::Percent, "%")]
    #[case(UnitCode::Ppm, "ppm")]
    #[case(UnitCode::Rpm, "rpm")]
    fn unit_translation(#[case] unit: UnitCode, #[case] label: &str) {
        let host_unit = parse_unit_of_measure(unit, None).expect("mapped unit");
        assert_eq!(label, host_unit.to_string());
        // the default is only used for unmapped units
        assert_eq!(
            Some(host_unit),
            parse_unit_of_measure(unit, Some(HostUnit::Years))
        );
    }

    #[test]
    fn undefined_unit_uses_default() {
        assert_eq!(None, parse_unit_of_measure(UnitCode::Undefined, None));
        assert_eq!(
            Some(HostUnit::Percentage),
            parse_unit_of_measure(UnitCode::Undefined, Some(HostUnit::Percentage))
        );
    }

    #[rstest]
    #[case("fan_level", "genvex-1_fan_level")]
    #[case("fan_level__supply", "genvex-1_fan_level")]
    #[case("temp_supply__a__b", "genvex-1_temp_supply")]
    #[case("__hidden", "genvex-1_")]
    fn unique_id_strips_name_suffix(#[case] name: &str, #[case] unique_id: &str) {
        let entity = EntityBase::new(device(), name, None, EntityOptions::default());
        assert_eq!(unique_id, entity.unique_id());
        assert_eq!(name, entity.translation_key());
    }

    #[test]
    fn new_entity_defaults() {
        let entity = EntityBase::new(
            device(),
            "temp_supply",
            Some(DatapointKey::TempSupply.into()),
            EntityOptions::default(),
        );
        assert!(!entity.should_poll());
        assert!(entity.has_entity_name());
        assert!(entity.entity_registry_enabled_default());
        assert!(entity.entity_registry_visible_default());
        assert!(!entity.is_attached());
    }

    #[test]
    fn registry_defaults_can_be_overridden() {
        let entity = EntityBase::new(
            device(),
            "co2_level",
            Some(DatapointKey::Co2Level.into()),
            EntityOptions {
                default_enabled: Some(false),
                default_visible: Some(false),
                ..Default::default()
            },
        );
        assert!(!entity.entity_registry_enabled_default());
        assert!(!entity.entity_registry_visible_default());
    }

    #[test]
    fn unit_is_discarded_by_default() {
        let device = device();
        let entity = EntityBase::new(
            device.clone(),
            "temp_supply",
            Some(DatapointKey::TempSupply.into()),
            EntityOptions::default(),
        );
        assert_eq!(1, device.unit_queries());
        assert_eq!(None, entity.unit_of_measurement());
    }

    #[test]
    fn unit_is_applied_if_configured() {
        let entity = EntityBase::new(
            device(),
            "temp_supply",
            Some(DatapointKey::TempSupply.into()),
            EntityOptions {
                unit_assignment: UnitAssignment::Apply,
                ..Default::default()
            },
        );
        assert_eq!(Some(HostUnit::Celsius), entity.unit_of_measurement());
    }

    #[test]
    fn entity_without_key_skips_unit_lookup() {
        let device = device();
        let entity = EntityBase::new(
            device.clone(),
            "status",
            None,
            EntityOptions {
                unit_assignment: UnitAssignment::Apply,
                ..Default::default()
            },
        );
        assert_eq!(0, device.unit_queries());
        assert_eq!(None, entity.unit_of_measurement());
    }

    #[tokio::test]
    async fn add_then_remove_leaves_no_handler() {
        let device = device();
        let key = ValueKey::from(SetpointKey::FanLevel);
        let entity = EntityBase::new(device.clone(), "fan_level", Some(key), Default::default());

        entity.added_to_host(Arc::new(RecordingHost::default())).await;
        assert!(entity.is_attached());
        assert_eq!(1, device.handler_count(key));

        entity.will_remove_from_host().await;
        assert!(!entity.is_attached());
        assert_eq!(0, device.handler_count(key));
        assert_eq!(1, device.registrations());
        assert_eq!(1, device.deregistrations());
    }

    #[tokio::test]
    async fn no_subscription_without_key_or_default_handler() {
        let device = device();
        let without_key = EntityBase::new(device.clone(), "status", None, Default::default());
        let without_handler = EntityBase::new(
            device.clone(),
            "fan_level",
            Some(SetpointKey::FanLevel.into()),
            EntityOptions {
                use_default_update_handler: false,
                ..Default::default()
            },
        );

        for entity in [&without_key, &without_handler] {
            entity.added_to_host(Arc::new(RecordingHost::default())).await;
            entity.will_remove_from_host().await;
        }

        assert_eq!(0, device.registrations());
        assert_eq!(0, device.deregistrations());
    }

    #[tokio::test]
    async fn every_change_requests_a_forced_refresh() {
        let device = device();
        let key = ValueKey::from(SetpointKey::FanLevel);
        let host = Arc::new(RecordingHost::default());
        let entity = EntityBase::new(device.clone(), "fan_level", Some(key), Default::default());
        entity.added_to_host(host.clone()).await;

        device.update_value(key, Some(3.));
        // same value again: no comparison, refresh anyway
        device.update_value(key, Some(3.));

        assert_eq!(
            vec![
                ("genvex-1_fan_level".to_string(), true),
                ("genvex-1_fan_level".to_string(), true)
            ],
            *host.requests.lock().expect("poisoned")
        );
    }

    #[tokio::test]
    async fn detached_entity_ignores_changes() {
        let device = device();
        let key = ValueKey::from(SetpointKey::FanLevel);
        let host = Arc::new(RecordingHost::default());
        let entity = EntityBase::new(device.clone(), "fan_level", Some(key), Default::default());

        // late callback after removal, e.g. from a stale handler copy
        entity.added_to_host(host.clone()).await;
        let stale = entity.update_handler.clone();
        entity.will_remove_from_host().await;
        stale.call(Some(2.), Some(3.));

        // callback before the entity was ever attached
        let other = EntityBase::new(device.clone(), "fan_level", Some(key), Default::default());
        other.update_handler.call(None, Some(1.));

        assert_eq!(0, host.count());
    }

    #[tokio::test]
    async fn entities_sharing_a_key_refresh_independently() {
        let device = device();
        let key = ValueKey::from(SetpointKey::FanLevel);
        let host = Arc::new(RecordingHost::default());
        let first = EntityBase::new(device.clone(), "fan_level", Some(key), Default::default());
        let second = EntityBase::new(
            device.clone(),
            "fan_level_mirror",
            Some(key),
            Default::default(),
        );
        first.added_to_host(host.clone()).await;
        second.added_to_host(host.clone()).await;

        device.update_value(key, Some(1.));

        let requests = host.requests.lock().expect("poisoned").clone();
        assert_eq!(2, requests.len());
        assert!(requests.contains(&("genvex-1_fan_level".to_string(), true)));
        assert!(requests.contains(&("genvex-1_fan_level_mirror".to_string(), true)));
    }

    #[test]
    fn device_info_is_recomputed() {
        let device = device();
        let entity = EntityBase::new(device.clone(), "status", None, Default::default());

        let info = entity.device_info();
        assert_eq!(
            BTreeSet::from([(DOMAIN.to_string(), "genvex-1".to_string())]),
            info.identifiers
        );
        assert_eq!("genvex-1", info.name);
        assert_eq!("Genvex", info.manufacturer);
        assert_eq!("Optima 270", info.model);
        assert_eq!("M: 2010, SD: 1, SDM: 17", info.hw_version);

        device.set_slave_device(2, 30);
        assert_eq!("M: 2010, SD: 2, SDM: 30", entity.device_info().hw_version);
    }

    #[test]
    fn device_info_serialization() {
        let entity = EntityBase::new(device(), "status", None, Default::default());
        let json = serde_json::to_value(entity.device_info()).expect("serializable");
        assert_eq!(
            serde_json::json!([["genvex_connect", "genvex-1"]]),
            json["identifiers"]
        );
        assert_eq!(serde_json::json!("M: 2010, SD: 1, SDM: 17"), json["hw_version"]);
    }
}
