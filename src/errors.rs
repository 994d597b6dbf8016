// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Custom application error with conversions from common Rust and 3rd-party errors.

use derive_more::Display;
use log::error;
use std::num::ParseIntError;

#[derive(Debug, Display, PartialEq)]
pub enum ServiceError {
    #[display("Internal server error: {_0}")]
    InternalServerError(String),

    #[display("Internal serialization error: {_0}")]
    SerializationError(String),

    #[display("BadRequest: {_0}")]
    BadRequest(String),

    /// Caller provided value can't be used, e.g. a non-numeric select option.
    #[display("Invalid argument: {_0}")]
    InvalidArgument(String),

    /// The value key doesn't have the capabilities required by the entity type.
    #[display("Unsupported value key: {_0}")]
    UnsupportedValueKey(String),
}

impl std::error::Error for ServiceError {}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::InternalServerError(format!("{:?}", e))
    }
}

impl From<ParseIntError> for ServiceError {
    fn from(e: ParseIntError) -> Self {
        ServiceError::InvalidArgument(e.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        error!("{:?}", e);
        ServiceError::SerializationError(e.to_string())
    }
}

impl From<strum::ParseError> for ServiceError {
    fn from(e: strum::ParseError) -> Self {
        ServiceError::BadRequest(e.to_string())
    }
}
