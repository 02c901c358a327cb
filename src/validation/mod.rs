// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Request validation
//!
//! Each check appends at most one violation to an [`ExceptionReport`]; the
//! caller runs every applicable check and then calls
//! [`ExceptionReport::process`]. Only the transactional gate and a missing
//! procedure unique id fail immediately.

mod report;

pub use report::{ExceptionReport, Violation, ViolationKind};

use std::collections::BTreeSet;

use crate::config::SosServiceConfig;
use crate::error::{Result, SosError};
use crate::model::{OfferingCapabilities, ProcedureDescription, SENSORML_FORMAT};
use crate::registry::{OfferingRegistry, RegistrySnapshot};
use crate::time::TimeExtent;

/// Minimum length of a procedure unique id accepted by InsertSensor
pub const MIN_PROCEDURE_ID_LEN: usize = 10;

/// Fail with `OperationNotSupported` unless transactional operations are on
pub fn check_transactional(config: &SosServiceConfig, operation: &str) -> Result<()> {
    if config.enable_transactional {
        Ok(())
    } else {
        Err(SosError::OperationNotSupported(operation.to_string()))
    }
}

/// Offering serving `procedure`, or a `procedure` violation
pub fn check_procedure(
    snapshot: &RegistrySnapshot,
    procedure: &str,
    report: &mut ExceptionReport,
) -> Option<String> {
    match snapshot.lookup_by_procedure(procedure) {
        Ok(offering) => Some(offering.to_string()),
        Err(_) => {
            report.add(
                Violation::invalid("procedure", Some(procedure))
                    .with_message(format!("Unknown procedure: {}", procedure)),
            );
            None
        }
    }
}

/// Offering `offering`, or an `offering` violation
pub fn check_offering<'a>(
    snapshot: &'a RegistrySnapshot,
    offering: &str,
    report: &mut ExceptionReport,
) -> Option<&'a OfferingCapabilities> {
    match snapshot.lookup_offering(offering) {
        Ok(caps) => Some(caps),
        Err(_) => {
            report.add(
                Violation::invalid("offering", Some(offering))
                    .with_message(format!("Unknown offering: {}", offering)),
            );
            None
        }
    }
}

pub fn check_response_format(
    offering: &OfferingCapabilities,
    format: &str,
    report: &mut ExceptionReport,
) {
    if !offering.response_formats.iter().any(|f| f == format) {
        report.add(
            Violation::invalid("responseFormat", Some(format)).with_message(format!(
                "Response format {} is not supported by offering {}",
                format, offering.identifier
            )),
        );
    }
}

/// Check a procedure description format
///
/// Skipped when no format was requested. Without a resolved offering the
/// format is checked against every format the service knows.
pub fn check_procedure_format(
    snapshot: &RegistrySnapshot,
    offering: Option<&OfferingCapabilities>,
    format: Option<&str>,
    report: &mut ExceptionReport,
) {
    let Some(format) = format else {
        return;
    };
    let supported = match offering {
        Some(caps) => caps.procedure_formats.iter().any(|f| f == format),
        None => {
            let mut all: BTreeSet<&str> = snapshot
                .offerings()
                .iter()
                .flat_map(|o| o.procedure_formats.iter().map(String::as_str))
                .collect();
            all.insert(SENSORML_FORMAT);
            all.contains(format)
        }
    };
    if !supported {
        report.add(
            Violation::invalid("procedureDescriptionFormat", Some(format))
                .with_message(format!("Procedure description format {} is not supported", format)),
        );
    }
}

/// Every requested observed property must belong to the offering
pub fn check_observables(
    offering: &OfferingCapabilities,
    observables: &[String],
    report: &mut ExceptionReport,
) {
    if let Some(unknown) = observables
        .iter()
        .find(|o| !offering.observable_properties.contains(*o))
    {
        report.add(
            Violation::invalid("observedProperty", Some(unknown)).with_message(format!(
                "Observed property {} is not available in offering {}",
                unknown, offering.identifier
            )),
        );
    }
}

/// Every requested procedure must belong to the offering
pub fn check_procedures(
    offering: &OfferingCapabilities,
    procedures: &[String],
    report: &mut ExceptionReport,
) {
    if let Some(unknown) = procedures.iter().find(|p| !offering.procedures.contains(*p)) {
        report.add(Violation::invalid("procedure", Some(unknown)).with_message(format!(
            "Procedure {} is not part of offering {}",
            unknown, offering.identifier
        )));
    }
}

/// Whether `requested` falls inside the offering's phenomenon time
pub fn time_admissible(requested: &TimeExtent, allowed: &TimeExtent) -> bool {
    (requested.is_base_at_now() && (allowed.is_base_at_now() || allowed.is_end_now()))
        || requested.intersects(allowed)
}

/// Check a requested time against the offering's refreshed phenomenon time
pub fn check_time(
    registry: &OfferingRegistry,
    offering: &str,
    requested: &TimeExtent,
    report: &mut ExceptionReport,
) {
    let allowed = match registry.refresh_offering(offering) {
        Ok(caps) => caps.phenomenon_time,
        // unknown offering is reported by check_offering
        Err(_) => return,
    };
    if !time_admissible(requested, &allowed) {
        report.add(
            Violation::invalid("phenomenonTime", Some(&requested.to_iso_string())).with_message(
                format!(
                    "Requested time {} is outside of the period {} available for offering {}",
                    requested, allowed, offering
                ),
            ),
        );
    }
}

/// Check the description carried by InsertSensor
///
/// A missing unique id fails immediately; a short or already registered id
/// is reported as a violation.
pub fn check_procedure_description(
    snapshot: &RegistrySnapshot,
    description: &ProcedureDescription,
    report: &mut ExceptionReport,
) -> Result<()> {
    let uid = description.unique_id.trim();
    if uid.is_empty() {
        return Err(SosError::Validation(ExceptionReport::single(
            Violation::new(ViolationKind::MissingParameterValue, "procedureDescription", None)
                .with_message("Missing procedure unique ID"),
        )));
    }
    if uid.chars().count() < MIN_PROCEDURE_ID_LEN {
        report.add(
            Violation::invalid("procedureDescription", Some(uid)).with_message(format!(
                "Procedure unique ID '{}' is too short (at least {} characters)",
                uid, MIN_PROCEDURE_ID_LEN
            )),
        );
    }
    if snapshot.has_procedure(uid) {
        report.add(
            Violation::invalid("procedureDescription", Some(uid)).with_message(format!(
                "A procedure with unique ID {} is already registered on this server",
                uid
            )),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubFactory;

    fn registry_with(procedure: &str, phenomenon_time: &str) -> OfferingRegistry {
        let registry = OfferingRegistry::new();
        let mut caps = OfferingCapabilities::new(format!("{}-sos", procedure), procedure);
        caps.phenomenon_time = phenomenon_time.parse().unwrap();
        caps.observable_properties.insert("urn:ogc:def:property:Temperature".into());
        registry
            .register_offering(caps.clone(), None, StubFactory::arc(caps))
            .unwrap();
        registry
    }

    #[test]
    fn test_transactional_gate() {
        let mut config = SosServiceConfig::default();
        let err = check_transactional(&config, "InsertSensor").unwrap_err();
        assert!(matches!(err, SosError::OperationNotSupported(ref op) if op == "InsertSensor"));
        config.enable_transactional = true;
        assert!(check_transactional(&config, "InsertSensor").is_ok());
    }

    #[test]
    fn test_unknown_procedure_and_format_both_reported() {
        let registry = registry_with("urn:test:sensor:001", "now");
        let snapshot = registry.snapshot();
        let mut report = ExceptionReport::new();

        let offering = check_procedure(&snapshot, "urn:nope", &mut report);
        let caps = offering.as_deref().and_then(|o| snapshot.lookup_offering(o).ok());
        check_procedure_format(&snapshot, caps, Some("application/pdf"), &mut report);

        assert_eq!(report.len(), 2);
        assert!(report.has_locator("procedure"));
        assert!(report.has_locator("procedureDescriptionFormat"));
    }

    #[test]
    fn test_sensorml_always_known() {
        let registry = OfferingRegistry::new();
        let mut report = ExceptionReport::new();
        check_procedure_format(&registry.snapshot(), None, Some(SENSORML_FORMAT), &mut report);
        check_procedure_format(&registry.snapshot(), None, None, &mut report);
        assert!(report.is_empty());
    }

    #[test]
    fn test_observables_and_procedures() {
        let registry = registry_with("urn:test:sensor:001", "now");
        let snapshot = registry.snapshot();
        let caps = snapshot.lookup_offering("urn:test:sensor:001-sos").unwrap();

        let mut report = ExceptionReport::new();
        check_observables(caps, &["urn:ogc:def:property:Temperature".into()], &mut report);
        check_procedures(caps, &["urn:test:sensor:001".into()], &mut report);
        assert!(report.is_empty());

        check_observables(caps, &["urn:ogc:def:property:Pressure".into()], &mut report);
        check_procedures(caps, &["urn:other".into()], &mut report);
        assert_eq!(report.len(), 2);
        assert!(report.has_locator("observedProperty"));
    }

    #[test]
    fn test_time_in_bounded_period() {
        let registry = registry_with(
            "urn:test:sensor:001",
            "2010-05-15T00:00:00Z/2010-09-23T00:00:00Z",
        );
        let mut report = ExceptionReport::new();
        let inside: TimeExtent = "2010-06-01T00:00:00Z".parse().unwrap();
        check_time(&registry, "urn:test:sensor:001-sos", &inside, &mut report);
        assert!(report.is_empty());

        let outside: TimeExtent = "2011-01-01T00:00:00Z".parse().unwrap();
        check_time(&registry, "urn:test:sensor:001-sos", &outside, &mut report);
        assert_eq!(report.len(), 1);
        assert!(report.has_locator("phenomenonTime"));
    }

    #[test]
    fn test_now_admissibility() {
        let now = TimeExtent::now();
        assert!(time_admissible(&now, &"now".parse().unwrap()));
        assert!(time_admissible(&now, &"2010-01-01/now".parse().unwrap()));
        assert!(!time_admissible(&now, &"2010-01-01/2010-02-01".parse().unwrap()));
    }

    #[test]
    fn test_procedure_description_checks() {
        let registry = registry_with("urn:test:sensor:001", "now");
        let snapshot = registry.snapshot();

        let mut report = ExceptionReport::new();
        let empty = ProcedureDescription::new("  ", "empty");
        assert!(check_procedure_description(&snapshot, &empty, &mut report).is_err());
        assert!(report.is_empty());

        let short = ProcedureDescription::new("short", "short");
        check_procedure_description(&snapshot, &short, &mut report).unwrap();
        assert_eq!(report.len(), 1);

        let mut report = ExceptionReport::new();
        let dup = ProcedureDescription::new("urn:test:sensor:001", "dup");
        check_procedure_description(&snapshot, &dup, &mut report).unwrap();
        assert_eq!(report.len(), 1);
        assert!(report.violations()[0].to_string().contains("already registered"));
    }
}
