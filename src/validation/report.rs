// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Exception report accumulating request validation violations

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{exception_code, Result, SosError};

/// Kind of a single violation, mapped to an OWS exception code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    InvalidParameterValue,
    MissingParameterValue,
}

impl ViolationKind {
    pub fn code(&self) -> &'static str {
        match self {
            ViolationKind::InvalidParameterValue => exception_code::INVALID_PARAMETER_VALUE,
            ViolationKind::MissingParameterValue => exception_code::MISSING_PARAMETER_VALUE,
        }
    }
}

/// One offending request parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Name of the offending parameter
    pub locator: String,
    /// Offending value, when the request carried one
    pub value: Option<String>,
    pub message: Option<String>,
}

impl Violation {
    pub fn new(kind: ViolationKind, locator: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            kind,
            locator: locator.into(),
            value: value.map(str::to_string),
            message: None,
        }
    }

    /// Invalid value for `locator`
    pub fn invalid(locator: impl Into<String>, value: Option<&str>) -> Self {
        Self::new(ViolationKind::InvalidParameterValue, locator, value)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.value) {
            (Some(msg), _) => write!(f, "{}", msg),
            (None, Some(value)) => write!(f, "Invalid value '{}' for {}", value, self.locator),
            (None, None) => write!(f, "Invalid {}", self.locator),
        }
    }
}

/// Accumulates violations for one request.
///
/// Checks append to the report instead of failing fast so that a malformed
/// request gets every problem back in a single fault. Call [`process`] once
/// all checks ran.
///
/// [`process`]: ExceptionReport::process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionReport {
    #[serde(rename = "exceptions")]
    violations: Vec<Violation>,
}

impl ExceptionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report holding a single violation
    pub fn single(violation: Violation) -> Self {
        Self {
            violations: vec![violation],
        }
    }

    pub fn add(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Whether any violation names `locator`
    pub fn has_locator(&self, locator: &str) -> bool {
        self.violations.iter().any(|v| v.locator == locator)
    }

    /// Exception code of the first violation
    pub fn first_code(&self) -> &'static str {
        self.violations
            .first()
            .map(|v| v.kind.code())
            .unwrap_or(exception_code::NO_APPLICABLE_CODE)
    }

    /// Turn a non-empty report into a single fault
    pub fn process(self) -> Result<()> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(SosError::Validation(self))
        }
    }
}

impl fmt::Display for ExceptionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}
