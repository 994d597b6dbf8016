// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

pub mod device;
pub mod entity;
pub mod host;

pub mod configuration;
pub mod errors;
pub mod startup;

pub use startup::*;

/// Integration domain used in device registry identifiers.
pub const DOMAIN: &str = "genvex_connect";
