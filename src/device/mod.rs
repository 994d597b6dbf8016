// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Device handle abstraction.
//!
//! The device handle represents one physical ventilation unit connection. It's owned outside of
//! the entities: every entity of a device holds a shared reference to the same handle and only
//! reads values, writes setpoints and subscribes to value changes.

mod keys;
pub mod simulated;

pub use keys::*;
pub use simulated::SimulatedDevice;

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Value change callback receiving the old and the new value.
///
/// Every handler gets a unique identity at creation. Clones share the identity, which allows a
/// device handle to remove exactly the handler instance that was registered.
#[derive(Clone)]
pub struct UpdateHandler {
    id: u64,
    callback: Arc<dyn Fn(Option<f64>, Option<f64>) + Send + Sync>,
}

impl UpdateHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Option<f64>, Option<f64>) + Send + Sync + 'static,
    {
        Self {
            id: NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn call(&self, old_value: Option<f64>, new_value: Option<f64>) {
        (self.callback)(old_value, new_value)
    }
}

impl PartialEq for UpdateHandler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for UpdateHandler {}

impl Debug for UpdateHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateHandler").field("id", &self.id).finish()
    }
}

/// Operations the entities require from a device connection.
///
/// Implementations must be callable re-entrantly from within an [`UpdateHandler`] and from
/// multiple threads. Registration calls are expected to be cheap in-memory operations.
pub trait DeviceHandle: Send + Sync {
    /// Check if the connected device model supports the given value.
    fn provides_value(&self, key: ValueKey) -> bool;

    fn get_unit_of_measure(&self, key: ValueKey) -> UnitCode;

    fn get_setpoint_min_value(&self, key: SetpointKey) -> f64;

    fn get_setpoint_max_value(&self, key: SetpointKey) -> f64;

    /// Current value, `None` if the device hasn't reported one yet.
    fn get_value(&self, key: ValueKey) -> Option<f64>;

    /// Write a new setpoint value. Fire and forget: the confirmed value is reported through the
    /// registered update handlers.
    fn set_setpoint(&self, key: SetpointKey, value: i64);

    fn register_update_handler(&self, key: ValueKey, handler: UpdateHandler);

    fn deregister_update_handler(&self, key: ValueKey, handler: &UpdateHandler);

    fn get_device_id(&self) -> String;

    fn get_device_manufacturer(&self) -> String;

    fn get_loaded_model_name(&self) -> String;

    fn get_device_model(&self) -> u32;

    fn get_slave_device_number(&self) -> u32;

    fn get_slave_device_model(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::UpdateHandler;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cloned_handler_keeps_identity() {
        let handler = UpdateHandler::new(|_, _| {});
        let other = UpdateHandler::new(|_, _| {});

        assert_eq!(handler, handler.clone());
        assert_ne!(handler, other);
    }

    #[test]
    fn call_forwards_values() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = UpdateHandler::new(move |old, new| {
            assert_eq!(Some(1.0), old);
            assert_eq!(Some(2.0), new);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handler.call(Some(1.0), Some(2.0));
        handler.clone().call(Some(1.0), Some(2.0));

        assert_eq!(2, calls.load(Ordering::SeqCst));
    }
}
