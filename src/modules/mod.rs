// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Reference backends and the in-process module registry
//!
//! [`LocalModuleRegistry`] creates virtual sensors and observation storages
//! from the hub configuration, hands them to the service as consumers and
//! provider factories, and writes the configuration back when the service
//! asks for it.

pub mod sensor_provider;
pub mod storage;
pub mod virtual_sensor;

pub use sensor_provider::SensorDataProviderFactory;
pub use storage::{DataKey, MemoryObsStorage, ObsStorage, StorageDataProviderFactory};
pub use virtual_sensor::VirtualSensor;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{HubConfig, ProviderConfig, SosServiceConfig, StorageConfig, VirtualSensorConfig};
use crate::error::{Result, SosError};
use crate::provider::{DataConsumer, DataProviderFactory, ModuleHandle, ModuleRegistry};

/// Counter for unique module IDs
static MODULE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique module ID using timestamp + counter
pub fn generate_module_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let counter = MODULE_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("vs-{}-{}", timestamp, counter)
}

/// In-process module registry
pub struct LocalModuleRegistry {
    config_path: Option<PathBuf>,
    hub: Mutex<HubConfig>,
    sensors: RwLock<HashMap<String, Arc<VirtualSensor>>>,
    storages: RwLock<HashMap<String, Arc<MemoryObsStorage>>>,
}

impl LocalModuleRegistry {
    /// Create every module declared in `hub`
    ///
    /// With a `config_path`, `save_configuration` rewrites that file.
    pub fn new(hub: HubConfig, config_path: Option<PathBuf>) -> Result<Self> {
        let mut sensors = HashMap::new();
        for config in &hub.sensors {
            let sensor = Arc::new(VirtualSensor::new(&config.id, config.buffer_size));
            if let Some(description) = &config.description {
                sensor.update_procedure_description(description)?;
            }
            sensor.set_enabled(config.auto_start);
            sensors.insert(config.id.clone(), sensor);
        }

        let mut storages = HashMap::new();
        for config in &hub.storages {
            storages.insert(config.id.clone(), Arc::new(Self::open_storage(config)?));
        }

        log::info!(
            "Module registry ready with {} sensor(s) and {} storage(s)",
            sensors.len(),
            storages.len()
        );
        Ok(Self {
            config_path,
            hub: Mutex::new(hub),
            sensors: RwLock::new(sensors),
            storages: RwLock::new(storages),
        })
    }

    /// Registry without persistence or predeclared modules
    pub fn in_memory() -> Self {
        Self {
            config_path: None,
            hub: Mutex::new(HubConfig::default()),
            sensors: RwLock::new(HashMap::new()),
            storages: RwLock::new(HashMap::new()),
        }
    }

    fn open_storage(config: &StorageConfig) -> Result<MemoryObsStorage> {
        match &config.preload_file {
            Some(path) => MemoryObsStorage::from_json_file(&config.id, path),
            None => Ok(MemoryObsStorage::new(&config.id)),
        }
    }

    /// Register an already built storage
    pub fn add_storage(&self, storage: Arc<MemoryObsStorage>) {
        let id = storage.id().to_string();
        {
            let mut hub = self.hub.lock();
            if !hub.storages.iter().any(|s| s.id == id) {
                hub.storages.push(StorageConfig {
                    id: id.clone(),
                    name: id.clone(),
                    preload_file: None,
                });
            }
        }
        self.storages.write().insert(id, storage);
    }

    pub fn sensor(&self, id: &str) -> Option<Arc<VirtualSensor>> {
        self.sensors.read().get(id).cloned()
    }

    pub fn storage(&self, id: &str) -> Option<Arc<MemoryObsStorage>> {
        self.storages.read().get(id).cloned()
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        self.sensors.read().keys().cloned().collect()
    }

    /// Current hub configuration
    pub fn hub_config(&self) -> HubConfig {
        self.hub.lock().clone()
    }

    fn unknown_module(id: &str) -> SosError {
        SosError::Backend(format!("Unknown module {}", id))
    }
}

impl ModuleRegistry for LocalModuleRegistry {
    fn load_module(&self, config: &VirtualSensorConfig) -> Result<ModuleHandle> {
        let mut sensors = self.sensors.write();
        if sensors.contains_key(&config.id) {
            return Err(SosError::Backend(format!("Module {} already loaded", config.id)));
        }
        let sensor = Arc::new(VirtualSensor::new(&config.id, config.buffer_size));
        if let Some(description) = &config.description {
            sensor.update_procedure_description(description)?;
        }
        sensors.insert(config.id.clone(), sensor.clone());
        self.hub.lock().sensors.push(config.clone());
        log::info!("Module {} loaded ({})", config.id, config.name);
        Ok(ModuleHandle {
            id: config.id.clone(),
            consumer: sensor,
        })
    }

    fn enable_module(&self, module_id: &str) -> Result<()> {
        let sensor = self.sensor(module_id).ok_or_else(|| Self::unknown_module(module_id))?;
        sensor.set_enabled(true);
        let mut hub = self.hub.lock();
        if let Some(config) = hub.sensors.iter_mut().find(|s| s.id == module_id) {
            config.auto_start = true;
            config.description = sensor.description();
        }
        log::debug!("Module {} enabled", module_id);
        Ok(())
    }

    fn destroy_module(&self, module_id: &str) -> Result<()> {
        let sensor = self
            .sensors
            .write()
            .remove(module_id)
            .ok_or_else(|| Self::unknown_module(module_id))?;
        sensor.set_enabled(false);
        self.hub.lock().sensors.retain(|s| s.id != module_id);
        log::info!("Module {} destroyed", module_id);
        Ok(())
    }

    fn consumer_module(&self, module_id: &str) -> Result<Arc<dyn DataConsumer>> {
        match self.sensor(module_id) {
            Some(sensor) => Ok(sensor),
            None if self.storage(module_id).is_some() => Err(SosError::Backend(format!(
                "Module {} is not a data consumer",
                module_id
            ))),
            None => Err(Self::unknown_module(module_id)),
        }
    }

    fn provider_factory(&self, config: &ProviderConfig) -> Result<Arc<dyn DataProviderFactory>> {
        match config {
            ProviderConfig::Sensor(c) => {
                let sensor = self
                    .sensor(&c.sensor_id)
                    .ok_or_else(|| Self::unknown_module(&c.sensor_id))?;
                Ok(Arc::new(SensorDataProviderFactory::new(c.clone(), sensor)))
            }
            ProviderConfig::Storage(c) => {
                let storage: Arc<dyn ObsStorage> = self
                    .storage(&c.storage_id)
                    .ok_or_else(|| Self::unknown_module(&c.storage_id))?;
                Ok(Arc::new(StorageDataProviderFactory::new(c.clone(), storage)))
            }
        }
    }

    fn save_configuration(&self, config: &SosServiceConfig) -> Result<()> {
        let descriptions: HashMap<String, _> = self
            .sensors
            .read()
            .iter()
            .map(|(id, sensor)| (id.clone(), sensor.description()))
            .collect();
        let mut hub = self.hub.lock();
        hub.sos = config.clone();
        for sensor_config in hub.sensors.iter_mut() {
            if let Some(description) = descriptions.get(&sensor_config.id) {
                sensor_config.description = description.clone();
            }
        }
        if let Some(path) = &self.config_path {
            hub.save(path)?;
            log::info!("Configuration saved to {}", path.display());
        }
        Ok(())
    }
}
