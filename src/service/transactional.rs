// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Transactional workflows
//!
//! Each workflow holds the `workflow` lock from the transactional gate to
//! the last registry or configuration change, so two inserts of the same
//! procedure can never both pass the duplicate check.

use super::{SosResponse, SosService};
use crate::config::{ConsumerConfig, ProviderConfig, SensorProviderConfig, SosServiceConfig, VirtualSensorConfig};
use crate::error::Result;
use crate::model::{Observation, ProcedureDescription};
use crate::modules::generate_module_id;
use crate::provider::{DataConsumer, ModuleHandle};
use crate::registry::TemplateBinding;
use crate::swe::{self, DataComponent, DataEncoding, RecordParser};
use crate::validation::{self, ExceptionReport, Violation};

/// Suffix appended to a procedure id to name its offering
const OFFERING_SUFFIX: &str = "-sos";

/// Closes the parser however the insertion loop ends
struct ParserGuard<'a>(Box<dyn RecordParser + 'a>);

impl Drop for ParserGuard<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Push every record of `parser` to `consumer` and return how many were taken
///
/// Records delivered before a decode or consumer failure stay delivered.
fn feed_records<'a>(
    parser: Box<dyn RecordParser + 'a>,
    consumer: &dyn DataConsumer,
    template: &str,
) -> Result<usize> {
    let mut parser = ParserGuard(parser);
    let mut count = 0;
    while let Some(record) = parser.0.parse_next()? {
        consumer.new_result_record(template, record)?;
        count += 1;
    }
    Ok(count)
}

impl SosService {
    pub(super) fn insert_sensor(
        &self,
        mut description: ProcedureDescription,
        format: Option<&str>,
    ) -> Result<SosResponse> {
        let mut config = self.workflow.lock();
        validation::check_transactional(&config, "InsertSensor")?;

        let snapshot = self.registry.snapshot();
        let mut report = ExceptionReport::new();
        validation::check_procedure_format(&snapshot, None, format, &mut report);
        validation::check_procedure_description(&snapshot, &description, &mut report)?;
        report.process()?;

        let procedure = description.unique_id.trim().to_string();
        description.unique_id = procedure.clone();
        let offering = format!("{}{}", procedure, OFFERING_SUFFIX);

        let module_config = VirtualSensorConfig::new(generate_module_id(), procedure.clone());
        let handle = self.modules.load_module(&module_config)?;
        if let Err(e) = self.attach_sensor(&mut config, &handle, &description, &offering) {
            log::error!("InsertSensor of {} failed, rolling back: {}", procedure, e);
            if let Err(cleanup) = self.modules.destroy_module(&handle.id) {
                log::warn!("Could not destroy module {}: {}", handle.id, cleanup);
            }
            return Err(e);
        }

        log::info!("Sensor {} inserted as offering {}", procedure, offering);
        Ok(SosResponse::SensorInserted {
            assigned_offering: offering,
            assigned_procedure: procedure,
        })
    }

    /// Bind a freshly loaded module to a new offering and persist it
    ///
    /// On error the registry and `config` are left as they were; the caller
    /// destroys the module.
    fn attach_sensor(
        &self,
        config: &mut SosServiceConfig,
        handle: &ModuleHandle,
        description: &ProcedureDescription,
        offering: &str,
    ) -> Result<()> {
        handle.consumer.update_procedure_description(description)?;
        self.modules.enable_module(&handle.id)?;

        let provider_config = ProviderConfig::Sensor(SensorProviderConfig {
            uri: offering.to_string(),
            name: Some(description.name.clone()).filter(|n| !n.is_empty()),
            enabled: true,
            sensor_id: handle.id.clone(),
        });
        let factory = self.modules.provider_factory(&provider_config)?;
        let caps = factory.generate_capabilities()?;
        self.registry
            .register_offering(caps, Some(handle.consumer.clone()), factory.clone())?;

        let mut next = config.clone();
        next.data_providers.push(provider_config);
        next.data_consumers.push(ConsumerConfig {
            offering: offering.to_string(),
            module_id: handle.id.clone(),
        });
        if let Err(e) = self.modules.save_configuration(&next) {
            if let Err(unregister) = self.registry.unregister_offering(&description.unique_id) {
                log::warn!("Offering {} already gone during rollback: {}", offering, unregister);
            }
            factory.cleanup();
            return Err(e);
        }
        *config = next;
        Ok(())
    }

    pub(super) fn update_sensor(
        &self,
        procedure: &str,
        description: ProcedureDescription,
        format: Option<&str>,
    ) -> Result<SosResponse> {
        let config = self.workflow.lock();
        validation::check_transactional(&config, "UpdateSensor")?;

        let snapshot = self.registry.snapshot();
        let mut report = ExceptionReport::new();
        let offering = validation::check_procedure(&snapshot, procedure, &mut report);
        let caps = offering
            .as_deref()
            .and_then(|o| snapshot.lookup_offering(o).ok());
        validation::check_procedure_format(&snapshot, caps, format, &mut report);
        if description.unique_id.trim() != procedure {
            report.add(
                Violation::invalid("procedureDescription", Some(&description.unique_id))
                    .with_message(format!("Description does not describe procedure {}", procedure)),
            );
        }
        report.process()?;

        let offering = offering.unwrap_or_default();
        let consumer = snapshot.consumer_for(&offering)?;
        consumer.update_procedure_description(&description)?;
        self.modules.save_configuration(&config)?;
        // the update itself succeeded, stale metadata is only logged
        if let Err(e) = self.registry.refresh_offering(&offering) {
            log::warn!("Offering {} not refreshed after update: {}", offering, e);
        }
        Ok(SosResponse::SensorUpdated {
            updated_procedure: procedure.to_string(),
        })
    }

    pub(super) fn delete_sensor(&self, procedure: &str) -> Result<SosResponse> {
        let mut config = self.workflow.lock();
        validation::check_transactional(&config, "DeleteSensor")?;

        let snapshot = self.registry.snapshot();
        let mut report = ExceptionReport::new();
        validation::check_procedure(&snapshot, procedure, &mut report);
        report.process()?;

        let removed = self.registry.unregister_offering(procedure)?;
        let offering = removed.offering.identifier.clone();
        if let Some(consumer) = config.consumer(&offering) {
            if let Err(e) = self.modules.destroy_module(&consumer.module_id) {
                log::warn!("Could not destroy module {}: {}", consumer.module_id, e);
            }
        }
        if let Some(factory) = &removed.provider {
            factory.cleanup();
        }
        config.remove_offering(&offering);
        self.modules.save_configuration(&config)?;

        log::info!(
            "Sensor {} deleted with offering {} and {} template(s)",
            procedure,
            offering,
            removed.templates.len()
        );
        Ok(SosResponse::SensorDeleted {
            deleted_procedure: procedure.to_string(),
        })
    }

    pub(super) fn insert_observation(&self, offering: &str, observations: &[Observation]) -> Result<SosResponse> {
        let config = self.workflow.lock();
        validation::check_transactional(&config, "InsertObservation")?;

        let snapshot = self.registry.snapshot();
        let consumer = snapshot.consumer_for(offering)?;
        let caps = snapshot.lookup_offering(offering)?;
        let mut report = ExceptionReport::new();
        if let Some(foreign) = observations
            .iter()
            .find(|o| !caps.procedures.contains(&o.procedure))
        {
            report.add(Violation::invalid("procedure", Some(&foreign.procedure)).with_message(
                format!("Procedure {} is not part of offering {}", foreign.procedure, offering),
            ));
        }
        report.process()?;

        consumer.new_observations(observations)?;
        let _ = self.registry.refresh_offering(offering);
        log::debug!("{} observation(s) inserted into {}", observations.len(), offering);
        Ok(SosResponse::ObservationsInserted {
            count: observations.len(),
        })
    }

    pub(super) fn insert_result_template(
        &self,
        offering: &str,
        structure: DataComponent,
        encoding: DataEncoding,
    ) -> Result<SosResponse> {
        let config = self.workflow.lock();
        validation::check_transactional(&config, "InsertResultTemplate")?;

        let snapshot = self.registry.snapshot();
        let consumer = snapshot.consumer_for(offering)?;
        // rejects encodings that cannot carry the structure
        swe::create_writer(&structure, &encoding)?;

        let template = consumer.new_result_template(&structure, &encoding)?;
        self.registry.register_template(
            &template,
            TemplateBinding {
                offering: offering.to_string(),
                structure,
                encoding,
            },
        )?;
        let _ = self.registry.refresh_offering(offering);
        log::info!("Result template {} accepted for {}", template, offering);
        Ok(SosResponse::ResultTemplateInserted {
            accepted_template: template,
        })
    }

    pub(super) fn insert_result(&self, template: &str, values: &[u8]) -> Result<SosResponse> {
        let config = self.workflow.lock();
        validation::check_transactional(&config, "InsertResult")?;

        let snapshot = self.registry.snapshot();
        let binding = snapshot.lookup_by_template(template)?;
        let consumer = snapshot.consumer_for(&binding.offering)?;

        let parser = swe::create_parser(&binding.structure, &binding.encoding, Box::new(values))?;
        let count = feed_records(parser, consumer.as_ref(), template)?;

        let _ = self.registry.refresh_offering(&binding.offering);
        log::debug!("{} record(s) inserted with template {}", count, template);
        Ok(SosResponse::ResultInserted { count })
    }
}
