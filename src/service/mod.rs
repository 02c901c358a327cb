// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! SOS service: request dispatch over the offering registry
//!
//! Read operations work on a registry snapshot and never block each other.
//! Transactional operations run one at a time under the `workflow` lock,
//! which also owns the live service configuration.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use soshub::config::SosServiceConfig;
//! use soshub::modules::LocalModuleRegistry;
//! use soshub::service::{SosRequest, SosResponse, SosService};
//! use soshub::streaming::BufferedResponse;
//!
//! let service = SosService::new(SosServiceConfig::default(), Arc::new(LocalModuleRegistry::in_memory()));
//! service.start();
//!
//! let mut sink = BufferedResponse::new();
//! let response = service.handle(SosRequest::GetCapabilities, &mut sink).unwrap();
//! assert!(matches!(response, SosResponse::Capabilities(doc) if doc.layers.is_empty()));
//! ```

mod read;
mod request;
mod transactional;

#[cfg(test)]
mod tests;

pub use request::{SosRequest, SosResponse, SERVICE_TYPE, SERVICE_VERSION};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SosServiceConfig;
use crate::error::Result;
use crate::model::CapabilitiesDocument;
use crate::provider::ModuleRegistry;
use crate::registry::{OfferingRegistry, RegistrySnapshot};
use crate::streaming::ResponseSink;

/// Sensor Observation Service instance
pub struct SosService {
    registry: OfferingRegistry,
    modules: Arc<dyn ModuleRegistry>,
    workflow: Mutex<SosServiceConfig>,
    started: AtomicBool,
}

impl SosService {
    pub fn new(config: SosServiceConfig, modules: Arc<dyn ModuleRegistry>) -> Self {
        Self {
            registry: OfferingRegistry::new(),
            modules,
            workflow: Mutex::new(config),
            started: AtomicBool::new(false),
        }
    }

    /// Build every offering from configuration
    pub fn start(&self) -> Arc<CapabilitiesDocument> {
        let config = self.workflow.lock();
        let doc = self.registry.rebuild(&config, self.modules.as_ref());
        self.started.store(true, Ordering::SeqCst);
        log::info!(
            "SOS service {} started at {} with {} offering(s)",
            config.id,
            config.endpoint,
            doc.layers.len()
        );
        doc
    }

    /// Drop every offering
    pub fn stop(&self) {
        let _config = self.workflow.lock();
        self.registry.clear();
        self.started.store(false, Ordering::SeqCst);
        log::info!("SOS service stopped");
    }

    /// Replace the configuration and rebuild the offerings
    pub fn reload_config(&self, config: SosServiceConfig) -> Arc<CapabilitiesDocument> {
        let mut current = self.workflow.lock();
        *current = config;
        let doc = self.registry.rebuild(&current, self.modules.as_ref());
        log::info!("SOS service {} reloaded", current.id);
        doc
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Copy of the live configuration
    pub fn config(&self) -> SosServiceConfig {
        self.workflow.lock().clone()
    }

    pub fn registry(&self) -> &OfferingRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.registry.snapshot()
    }

    /// Handle one request
    ///
    /// GetResult writes its records to `sink` as they are produced; every
    /// other response is returned for the binding to encode.
    pub fn handle(&self, request: SosRequest, sink: &mut dyn ResponseSink) -> Result<SosResponse> {
        let operation = request.operation();
        log::debug!("Handling {} request", operation);
        let response = match request {
            SosRequest::GetCapabilities => self.get_capabilities(),
            SosRequest::DescribeSensor {
                procedure,
                procedure_description_format,
                valid_time,
            } => self.describe_sensor(&procedure, procedure_description_format.as_deref(), valid_time),
            SosRequest::GetResult {
                offering,
                observed_properties,
                procedures,
                temporal_filter,
                response_format,
            } => self.get_result(
                &offering,
                observed_properties,
                procedures,
                temporal_filter,
                response_format.as_deref(),
                sink,
            ),
            SosRequest::InsertSensor {
                procedure_description,
                procedure_description_format,
            } => self.insert_sensor(procedure_description, procedure_description_format.as_deref()),
            SosRequest::UpdateSensor {
                procedure,
                procedure_description,
                procedure_description_format,
            } => self.update_sensor(
                &procedure,
                procedure_description,
                procedure_description_format.as_deref(),
            ),
            SosRequest::DeleteSensor { procedure } => self.delete_sensor(&procedure),
            SosRequest::InsertObservation {
                offering,
                observations,
            } => self.insert_observation(&offering, &observations),
            SosRequest::InsertResultTemplate {
                offering,
                result_structure,
                result_encoding,
            } => self.insert_result_template(&offering, result_structure, result_encoding),
            SosRequest::InsertResult { template, values } => self.insert_result(&template, &values),
        };
        if let Err(e) = &response {
            if e.is_client_error() {
                log::debug!("{} rejected: {}", operation, e);
            } else {
                log::error!("{} failed: {}", operation, e);
            }
        }
        response
    }
}
