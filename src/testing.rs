// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Test doubles shared by unit tests

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{ProviderConfig, SensorProviderConfig, SosServiceConfig, VirtualSensorConfig};
use crate::error::{Result, SosError};
use crate::model::{DataFilter, Observation, OfferingCapabilities, ProcedureDescription};
use crate::provider::{DataConsumer, DataProvider, DataProviderFactory, ModuleHandle, ModuleRegistry};
use crate::swe::{DataBlock, DataComponent, DataEncoding};

pub fn sensor_provider(uri: &str) -> ProviderConfig {
    ProviderConfig::Sensor(SensorProviderConfig {
        uri: uri.into(),
        name: None,
        enabled: true,
        sensor_id: format!("module:{}", uri),
    })
}

/// Factory serving fixed capabilities and records
pub struct StubFactory {
    caps: Mutex<Option<OfferingCapabilities>>,
    enabled: AtomicBool,
    cleaned: AtomicBool,
    structure: DataComponent,
    encoding: DataEncoding,
    records: Vec<DataBlock>,
}

impl StubFactory {
    pub fn arc(caps: OfferingCapabilities) -> Arc<Self> {
        Self::with_records(caps, DataComponent::time("time"), DataEncoding::text(), Vec::new())
    }

    pub fn with_records(
        caps: OfferingCapabilities,
        structure: DataComponent,
        encoding: DataEncoding,
        records: Vec<DataBlock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            caps: Mutex::new(Some(caps)),
            enabled: AtomicBool::new(true),
            cleaned: AtomicBool::new(false),
            structure,
            encoding,
            records,
        })
    }

    /// Factory whose capability generation always fails
    pub fn failing() -> Arc<Self> {
        let factory = Self::arc(OfferingCapabilities::new("", ""));
        *factory.caps.lock() = None;
        factory
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_capabilities(&self, caps: OfferingCapabilities) {
        *self.caps.lock() = Some(caps);
    }

    pub fn cleaned_up(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }
}

impl DataProviderFactory for StubFactory {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn generate_capabilities(&self) -> Result<OfferingCapabilities> {
        self.caps
            .lock()
            .clone()
            .ok_or_else(|| SosError::Backend("stub failure".into()))
    }

    fn update_capabilities(&self) -> Result<OfferingCapabilities> {
        self.generate_capabilities()
    }

    fn generate_procedure_description(&self, _at: Option<DateTime<Utc>>) -> Result<ProcedureDescription> {
        let caps = self.generate_capabilities()?;
        Ok(ProcedureDescription::new(
            caps.main_procedure().unwrap_or_default(),
            "stub",
        ))
    }

    fn new_provider(&self, _filter: &DataFilter) -> Result<Box<dyn DataProvider>> {
        Ok(Box::new(StubProvider {
            structure: self.structure.clone(),
            encoding: self.encoding.clone(),
            records: self.records.iter().cloned().collect(),
        }))
    }

    fn cleanup(&self) {
        self.cleaned.store(true, Ordering::SeqCst);
    }
}

pub struct StubProvider {
    structure: DataComponent,
    encoding: DataEncoding,
    records: VecDeque<DataBlock>,
}

impl DataProvider for StubProvider {
    fn result_structure(&self) -> Result<DataComponent> {
        Ok(self.structure.clone())
    }

    fn default_encoding(&self) -> Result<DataEncoding> {
        Ok(self.encoding.clone())
    }

    fn next_record(&mut self) -> Result<Option<DataBlock>> {
        Ok(self.records.pop_front())
    }
}

/// Consumer recording everything it receives
#[derive(Default)]
pub struct StubConsumer {
    pub descriptions: Mutex<Vec<ProcedureDescription>>,
    pub observations: Mutex<Vec<Observation>>,
    pub records: Mutex<Vec<DataBlock>>,
}

impl DataConsumer for StubConsumer {
    fn update_procedure_description(&self, description: &ProcedureDescription) -> Result<()> {
        self.descriptions.lock().push(description.clone());
        Ok(())
    }

    fn new_observations(&self, observations: &[Observation]) -> Result<()> {
        self.observations.lock().extend_from_slice(observations);
        Ok(())
    }

    fn new_result_template(&self, _structure: &DataComponent, _encoding: &DataEncoding) -> Result<String> {
        Ok("stub-template".into())
    }

    fn new_result_record(&self, _template_id: &str, record: DataBlock) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Module registry handing out registered stub factories by offering uri
#[derive(Default)]
pub struct StubModules {
    factories: Mutex<HashMap<String, Arc<StubFactory>>>,
    consumers: Mutex<HashMap<String, Arc<StubConsumer>>>,
    saves: AtomicUsize,
}

impl StubModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_factory(&self, uri: &str, factory: Arc<StubFactory>) {
        self.factories.lock().insert(uri.to_string(), factory);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ModuleRegistry for StubModules {
    fn load_module(&self, config: &VirtualSensorConfig) -> Result<ModuleHandle> {
        let consumer = Arc::new(StubConsumer::default());
        self.consumers.lock().insert(config.id.clone(), consumer.clone());
        Ok(ModuleHandle {
            id: config.id.clone(),
            consumer,
        })
    }

    fn enable_module(&self, _module_id: &str) -> Result<()> {
        Ok(())
    }

    fn destroy_module(&self, module_id: &str) -> Result<()> {
        self.consumers.lock().remove(module_id);
        Ok(())
    }

    fn consumer_module(&self, module_id: &str) -> Result<Arc<dyn DataConsumer>> {
        match self.consumers.lock().get(module_id) {
            Some(c) => Ok(c.clone()),
            None => Err(SosError::Backend(format!("Unknown module {}", module_id))),
        }
    }

    fn provider_factory(&self, config: &ProviderConfig) -> Result<Arc<dyn DataProviderFactory>> {
        match self.factories.lock().get(config.uri()) {
            Some(f) => Ok(f.clone()),
            None => Err(SosError::Backend(format!("No factory for {}", config.uri()))),
        }
    }

    fn save_configuration(&self, _config: &SosServiceConfig) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
