// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Error types for the SOS hub

use std::io;
use thiserror::Error;

use crate::validation::ExceptionReport;

/// Result type alias for SOS hub operations
pub type Result<T> = std::result::Result<T, SosError>;

/// OWS exception code carried by every protocol fault
pub mod exception_code {
    pub const INVALID_PARAMETER_VALUE: &str = "InvalidParameterValue";
    pub const MISSING_PARAMETER_VALUE: &str = "MissingParameterValue";
    pub const OPERATION_NOT_SUPPORTED: &str = "OperationNotSupported";
    pub const NO_APPLICABLE_CODE: &str = "NoApplicableCode";
}

/// Main error type for the SOS hub
#[derive(Error, Debug)]
pub enum SosError {
    /// One or more request parameters failed validation
    #[error("{0}")]
    Validation(ExceptionReport),

    /// Unknown offering, procedure or template used as a lookup key
    #[error("Unknown {parameter}: {value}")]
    NotFound {
        parameter: &'static str,
        value: String,
    },

    /// Operation disabled on this endpoint
    #[error("{0} operation is not supported on this endpoint")]
    OperationNotSupported(String),

    /// Offering exists but accepts no transactional operations
    #[error("Transactional operations are not supported for offering {0}")]
    NoConsumer(String),

    /// Data provider, consumer or module failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Output closed or failed while a response was being streamed
    #[error("Streaming error: {0}")]
    Streaming(#[source] io::Error),

    /// Record encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SosError {
    pub fn not_found(parameter: &'static str, value: impl Into<String>) -> Self {
        SosError::NotFound {
            parameter,
            value: value.into(),
        }
    }

    /// OWS exception code for this fault
    pub fn exception_code(&self) -> &'static str {
        match self {
            SosError::Validation(report) => report.first_code(),
            SosError::NotFound { .. } | SosError::NoConsumer(_) | SosError::Parse(_) => {
                exception_code::INVALID_PARAMETER_VALUE
            }
            SosError::Encoding(_) => exception_code::INVALID_PARAMETER_VALUE,
            SosError::OperationNotSupported(_) => exception_code::OPERATION_NOT_SUPPORTED,
            SosError::Backend(_)
            | SosError::Streaming(_)
            | SosError::Configuration(_)
            | SosError::Io(_)
            | SosError::JsonError(_) => exception_code::NO_APPLICABLE_CODE,
        }
    }

    /// HTTP status used by the HTTP binding
    pub fn http_status(&self) -> u16 {
        match self.exception_code() {
            exception_code::OPERATION_NOT_SUPPORTED => 501,
            exception_code::NO_APPLICABLE_CODE => 500,
            _ => 400,
        }
    }

    /// Whether this fault only concerns the caller's parameters
    pub fn is_client_error(&self) -> bool {
        self.http_status() < 500
    }

    /// Locator (offending parameter name) when the fault names one
    pub fn locator(&self) -> Option<&str> {
        match self {
            SosError::NotFound { parameter, .. } => Some(*parameter),
            SosError::NoConsumer(_) => Some("offering"),
            SosError::OperationNotSupported(_) => Some("request"),
            _ => None,
        }
    }
}
