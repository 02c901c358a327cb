// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Backend seams: data providers, data consumers and the module registry
//!
//! The service core only talks to backends through these traits. Reference
//! implementations live in [`crate::modules`].

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{ProviderConfig, SosServiceConfig, VirtualSensorConfig};
use crate::error::Result;
use crate::model::{DataFilter, Observation, OfferingCapabilities, ProcedureDescription};
use crate::swe::{DataBlock, DataComponent, DataEncoding};

/// Lazy record sequence for one request
pub trait DataProvider: Send {
    fn result_structure(&self) -> Result<DataComponent>;

    fn default_encoding(&self) -> Result<DataEncoding>;

    /// Next record, `None` at end of sequence
    fn next_record(&mut self) -> Result<Option<DataBlock>>;
}

/// Per-offering source of capability metadata and providers
pub trait DataProviderFactory: Send + Sync {
    /// Disabled factories are skipped when capabilities are built
    fn is_enabled(&self) -> bool;

    fn generate_capabilities(&self) -> Result<OfferingCapabilities>;

    /// Fresh metadata reflecting the backend's current state
    fn update_capabilities(&self) -> Result<OfferingCapabilities>;

    /// Description valid at `at`, or the latest one
    fn generate_procedure_description(&self, at: Option<DateTime<Utc>>) -> Result<ProcedureDescription>;

    fn new_provider(&self, filter: &DataFilter) -> Result<Box<dyn DataProvider>>;

    /// Release backend resources; called once the factory leaves the registry
    fn cleanup(&self);
}

/// Per-offering sink for transactional requests
pub trait DataConsumer: Send + Sync {
    fn update_procedure_description(&self, description: &ProcedureDescription) -> Result<()>;

    fn new_observations(&self, observations: &[Observation]) -> Result<()>;

    /// Register a result template and return its identifier
    fn new_result_template(&self, structure: &DataComponent, encoding: &DataEncoding) -> Result<String>;

    fn new_result_record(&self, template_id: &str, record: DataBlock) -> Result<()>;
}

/// Module loaded by the module registry
#[derive(Clone)]
pub struct ModuleHandle {
    pub id: String,
    pub consumer: Arc<dyn DataConsumer>,
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle").field("id", &self.id).finish()
    }
}

/// Module lifecycle and configuration persistence
pub trait ModuleRegistry: Send + Sync {
    /// Create a virtual sensor module; it starts disabled
    fn load_module(&self, config: &VirtualSensorConfig) -> Result<ModuleHandle>;

    fn enable_module(&self, module_id: &str) -> Result<()>;

    fn destroy_module(&self, module_id: &str) -> Result<()>;

    /// Resolve a loaded module as a data consumer
    fn consumer_module(&self, module_id: &str) -> Result<Arc<dyn DataConsumer>>;

    fn provider_factory(&self, config: &ProviderConfig) -> Result<Arc<dyn DataProviderFactory>>;

    fn save_configuration(&self, config: &SosServiceConfig) -> Result<()>;
}
