// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! In-memory device handle.
//!
//! Keeps values, units and setpoint bounds in memory and notifies registered update handlers
//! when a value changes. Used by the simulator binary and as collaborator in tests.

use crate::configuration::DeviceSettings;
use crate::device::{DeviceHandle, SetpointKey, UnitCode, UpdateHandler, ValueKey};
use crate::errors::ServiceError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct Identity {
    device_id: String,
    manufacturer: String,
    model_name: String,
    device_model: u32,
    slave_device_number: u32,
    slave_device_model: u32,
}

#[derive(Debug, Clone, Default)]
struct ValueEntry {
    value: Option<f64>,
    unit: UnitCode,
    min: f64,
    max: f64,
}

pub struct SimulatedDevice {
    identity: Mutex<Identity>,
    values: Mutex<HashMap<ValueKey, ValueEntry>>,
    handlers: Mutex<HashMap<ValueKey, Vec<UpdateHandler>>>,
    setpoint_writes: Mutex<Vec<(SetpointKey, i64)>>,
    registrations: AtomicUsize,
    deregistrations: AtomicUsize,
    unit_queries: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedDevice {
    pub fn new(device_id: impl Into<String>, manufacturer: impl Into<String>) -> Self {
        Self {
            identity: Mutex::new(Identity {
                device_id: device_id.into(),
                manufacturer: manufacturer.into(),
                model_name: String::new(),
                device_model: 0,
                slave_device_number: 0,
                slave_device_model: 0,
            }),
            values: Default::default(),
            handlers: Default::default(),
            setpoint_writes: Default::default(),
            registrations: AtomicUsize::new(0),
            deregistrations: AtomicUsize::new(0),
            unit_queries: AtomicUsize::new(0),
        }
    }

    /// Create a device from the `device` configuration section.
    pub fn from_settings(settings: &DeviceSettings) -> Result<Self, ServiceError> {
        if settings.id.trim().is_empty() {
            return Err(ServiceError::BadRequest("Device id must not be empty".into()));
        }

        let mut device = Self::new(settings.id.trim(), &settings.manufacturer)
            .with_model(&settings.model_name, settings.device_model);
        device.set_slave_device(settings.slave_device_number, settings.slave_device_model);

        for (key, datapoint) in &settings.datapoints {
            device = device.with_datapoint((*key).into(), datapoint.unit, datapoint.value);
        }
        for (key, setpoint) in &settings.setpoints {
            if setpoint.min > setpoint.max {
                warn!(
                    "[{}] Setpoint {key} has an invalid range: {} > {}",
                    settings.id, setpoint.min, setpoint.max
                );
            }
            device = device.with_setpoint(
                *key,
                setpoint.unit,
                setpoint.min,
                setpoint.max,
                setpoint.value,
            );
        }

        info!(
            "[{}] Simulated device with {} datapoints and {} setpoints",
            settings.id,
            settings.datapoints.len(),
            settings.setpoints.len()
        );
        Ok(device)
    }

    pub fn with_model(self, model_name: impl Into<String>, device_model: u32) -> Self {
        {
            let mut identity = lock(&self.identity);
            identity.model_name = model_name.into();
            identity.device_model = device_model;
        }
        self
    }

    pub fn with_datapoint(self, key: ValueKey, unit: UnitCode, value: Option<f64>) -> Self {
        lock(&self.values).insert(
            key,
            ValueEntry {
                value,
                unit,
                ..Default::default()
            },
        );
        self
    }

    pub fn with_setpoint(
        self,
        key: SetpointKey,
        unit: UnitCode,
        min: f64,
        max: f64,
        value: Option<f64>,
    ) -> Self {
        lock(&self.values).insert(
            key.into(),
            ValueEntry {
                value,
                unit,
                min,
                max,
            },
        );
        self
    }

    /// Change the reported bounds of a setpoint.
    pub fn set_setpoint_range(&self, key: SetpointKey, min: f64, max: f64) {
        let mut values = lock(&self.values);
        let entry = values.entry(key.into()).or_default();
        entry.min = min;
        entry.max = max;
    }

    /// Replace the connected slave device, e.g. after a hardware swap.
    pub fn set_slave_device(&self, number: u32, model: u32) {
        let mut identity = lock(&self.identity);
        identity.slave_device_number = number;
        identity.slave_device_model = model;
    }

    /// Store a new value and notify all handlers registered for the key.
    ///
    /// Handlers are notified on every update, also if the value didn't change.
    pub fn update_value(&self, key: ValueKey, value: Option<f64>) {
        let old_value = {
            let mut values = lock(&self.values);
            let entry = values.entry(key).or_default();
            std::mem::replace(&mut entry.value, value)
        };
        debug!("Device value {key}: {old_value:?} -> {value:?}");

        // notify without holding any lock: handlers may call back into the device
        let handlers = lock(&self.handlers).get(&key).cloned().unwrap_or_default();
        for handler in handlers {
            handler.call(old_value, value);
        }
    }

    /// Number of currently registered handlers for the given key.
    pub fn handler_count(&self, key: ValueKey) -> usize {
        lock(&self.handlers).get(&key).map(Vec::len).unwrap_or_default()
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn deregistrations(&self) -> usize {
        self.deregistrations.load(Ordering::SeqCst)
    }

    pub fn unit_queries(&self) -> usize {
        self.unit_queries.load(Ordering::SeqCst)
    }

    /// All setpoint writes in call order.
    pub fn setpoint_writes(&self) -> Vec<(SetpointKey, i64)> {
        lock(&self.setpoint_writes).clone()
    }

    fn setpoint_entry(&self, key: SetpointKey) -> Option<ValueEntry> {
        lock(&self.values).get(&key.into()).cloned()
    }
}

impl DeviceHandle for SimulatedDevice {
    fn provides_value(&self, key: ValueKey) -> bool {
        lock(&self.values).contains_key(&key)
    }

    fn get_unit_of_measure(&self, key: ValueKey) -> UnitCode {
        self.unit_queries.fetch_add(1, Ordering::SeqCst);
        lock(&self.values)
            .get(&key)
            .map(|entry| entry.unit)
            .unwrap_or_default()
    }

    fn get_setpoint_min_value(&self, key: SetpointKey) -> f64 {
        self.setpoint_entry(key)
            .map(|entry| entry.min)
            .unwrap_or_default()
    }

    fn get_setpoint_max_value(&self, key: SetpointKey) -> f64 {
        self.setpoint_entry(key)
            .map(|entry| entry.max)
            .unwrap_or_default()
    }

    fn get_value(&self, key: ValueKey) -> Option<f64> {
        lock(&self.values).get(&key).and_then(|entry| entry.value)
    }

    fn set_setpoint(&self, key: SetpointKey, value: i64) {
        lock(&self.setpoint_writes).push((key, value));
        // the simulated device accepts every write and reports it back
        self.update_value(key.into(), Some(value as f64));
    }

    fn register_update_handler(&self, key: ValueKey, handler: UpdateHandler) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        lock(&self.handlers).entry(key).or_default().push(handler);
    }

    fn deregister_update_handler(&self, key: ValueKey, handler: &UpdateHandler) {
        self.deregistrations.fetch_add(1, Ordering::SeqCst);
        if let Some(handlers) = lock(&self.handlers).get_mut(&key) {
            handlers.retain(|h| h != handler);
        }
    }

    fn get_device_id(&self) -> String {
        lock(&self.identity).device_id.clone()
    }

    fn get_device_manufacturer(&self) -> String {
        lock(&self.identity).manufacturer.clone()
    }

    fn get_loaded_model_name(&self) -> String {
        lock(&self.identity).model_name.clone()
    }

    fn get_device_model(&self) -> u32 {
        lock(&self.identity).device_model
    }

    fn get_slave_device_number(&self) -> u32 {
        lock(&self.identity).slave_device_number
    }

    fn get_slave_device_model(&self) -> u32 {
        lock(&self.identity).slave_device_model
    }
}
