// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Observation storage and the data provider serving it
//!
//! A storage holds named data stores (record structure, recommended encoding
//! and time-ordered records keyed by producer and time) plus the history of
//! the procedure description, each version valid from its valid time on.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use super::sensor_provider::BufferedProvider;
use crate::config::StorageProviderConfig;
use crate::error::{Result, SosError};
use crate::model::{DataFilter, OfferingCapabilities, ProcedureDescription};
use crate::provider::{DataProvider, DataProviderFactory};
use crate::swe::{DataBlock, DataComponent, DataEncoding};
use crate::time::{datetime_to_epoch, TimeExtent};

/// Record key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataKey {
    /// Producer id; `None` matches any producer on lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    /// Epoch seconds
    pub time: f64,
}

impl DataKey {
    pub fn new(producer: Option<&str>, time: f64) -> Self {
        Self {
            producer: producer.map(str::to_string),
            time,
        }
    }
}

/// Time-series storage of observation records
pub trait ObsStorage: Send + Sync {
    /// Data store names in lexical order
    fn data_store_names(&self) -> Vec<String>;

    fn add_data_store(&self, name: &str, structure: DataComponent, encoding: DataEncoding) -> Result<()>;

    /// Record structure and recommended encoding of a data store
    fn record_description(&self, store: &str) -> Result<(DataComponent, DataEncoding)>;

    fn store_record(&self, store: &str, key: DataKey, record: DataBlock) -> Result<()>;

    fn get_record(&self, store: &str, key: &DataKey) -> Result<Option<DataBlock>>;

    /// Records of a data store within an epoch range, in time order
    fn records(&self, store: &str, range: Option<(f64, f64)>) -> Result<Vec<DataBlock>>;

    /// First and last record time of a data store
    fn data_time_range(&self, store: &str) -> Result<Option<(f64, f64)>>;

    fn store_description(&self, description: ProcedureDescription) -> Result<()>;

    fn latest_description(&self) -> Option<ProcedureDescription>;

    /// Description whose valid time contains `time`
    fn description_at(&self, time: f64) -> Option<ProcedureDescription>;

    fn feature_of_interest_ids(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(flatten)]
    key: DataKey,
    record: DataBlock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataStore {
    structure: DataComponent,
    encoding: DataEncoding,
    #[serde(default)]
    records: Vec<StoredRecord>,
}

/// Serialized storage content used for preload files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageContent {
    #[serde(default)]
    descriptions: Vec<ProcedureDescription>,
    #[serde(default)]
    data_stores: BTreeMap<String, DataStore>,
    #[serde(default)]
    features_of_interest: Vec<String>,
}

/// In-memory observation storage
#[derive(Debug)]
pub struct MemoryObsStorage {
    id: String,
    content: RwLock<StorageContent>,
}

impl MemoryObsStorage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: RwLock::new(StorageContent::default()),
        }
    }

    /// Storage preloaded from a JSON file
    pub fn from_json_file(id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SosError::Configuration(format!("Cannot read storage file {}: {}", path.display(), e))
        })?;
        let mut content: StorageContent = serde_json::from_str(&text)?;
        for store in content.data_stores.values_mut() {
            store.records.sort_by(|a, b| a.key.time.total_cmp(&b.key.time));
            let structure = store.structure.clone();
            for stored in &mut store.records {
                stored.record.conform_to(&structure);
            }
        }
        let storage = Self {
            id: id.into(),
            content: RwLock::new(content),
        };
        log::info!(
            "Storage {} loaded {} data store(s) from {}",
            storage.id,
            storage.data_store_names().len(),
            path.display()
        );
        Ok(storage)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&*self.content.read())?)
    }

    pub fn add_feature_of_interest(&self, id: impl Into<String>) {
        let id = id.into();
        let mut content = self.content.write();
        if !content.features_of_interest.contains(&id) {
            content.features_of_interest.push(id);
        }
    }

    fn unknown_store(store: &str) -> SosError {
        SosError::Backend(format!("Unknown data store {}", store))
    }
}

fn valid_range(description: &ProcedureDescription) -> Option<(f64, f64)> {
    description.valid_time.as_ref().map(TimeExtent::epoch_range)
}

impl ObsStorage for MemoryObsStorage {
    fn data_store_names(&self) -> Vec<String> {
        self.content.read().data_stores.keys().cloned().collect()
    }

    fn add_data_store(&self, name: &str, structure: DataComponent, encoding: DataEncoding) -> Result<()> {
        let mut content = self.content.write();
        if content.data_stores.contains_key(name) {
            return Err(SosError::Backend(format!("Data store {} already exists", name)));
        }
        content.data_stores.insert(
            name.to_string(),
            DataStore {
                structure,
                encoding,
                records: Vec::new(),
            },
        );
        Ok(())
    }

    fn record_description(&self, store: &str) -> Result<(DataComponent, DataEncoding)> {
        let content = self.content.read();
        let ds = content.data_stores.get(store).ok_or_else(|| Self::unknown_store(store))?;
        Ok((ds.structure.clone(), ds.encoding.clone()))
    }

    fn store_record(&self, store: &str, key: DataKey, record: DataBlock) -> Result<()> {
        let mut content = self.content.write();
        let ds = content.data_stores.get_mut(store).ok_or_else(|| Self::unknown_store(store))?;
        if record.values.len() != ds.structure.leaves().len() {
            return Err(SosError::Encoding(format!(
                "Record is incompatible with data store {}",
                store
            )));
        }
        let pos = ds.records.partition_point(|r| r.key.time <= key.time);
        ds.records.insert(pos, StoredRecord { key, record });
        Ok(())
    }

    fn get_record(&self, store: &str, key: &DataKey) -> Result<Option<DataBlock>> {
        let content = self.content.read();
        let ds = content.data_stores.get(store).ok_or_else(|| Self::unknown_store(store))?;
        Ok(ds
            .records
            .iter()
            .find(|r| {
                r.key.time == key.time
                    && (key.producer.is_none() || r.key.producer == key.producer)
            })
            .map(|r| r.record.clone()))
    }

    fn records(&self, store: &str, range: Option<(f64, f64)>) -> Result<Vec<DataBlock>> {
        let content = self.content.read();
        let ds = content.data_stores.get(store).ok_or_else(|| Self::unknown_store(store))?;
        Ok(ds
            .records
            .iter()
            .filter(|r| range.map_or(true, |(b, e)| r.key.time >= b && r.key.time <= e))
            .map(|r| r.record.clone())
            .collect())
    }

    fn data_time_range(&self, store: &str) -> Result<Option<(f64, f64)>> {
        let content = self.content.read();
        let ds = content.data_stores.get(store).ok_or_else(|| Self::unknown_store(store))?;
        Ok(match (ds.records.first(), ds.records.last()) {
            (Some(first), Some(last)) => Some((first.key.time, last.key.time)),
            _ => None,
        })
    }

    fn store_description(&self, description: ProcedureDescription) -> Result<()> {
        let mut content = self.content.write();
        if let Some(latest) = content.descriptions.last() {
            if latest.unique_id != description.unique_id {
                return Err(SosError::Backend(format!(
                    "Storage {} holds procedure {}, not {}",
                    self.id, latest.unique_id, description.unique_id
                )));
            }
        }
        content.descriptions.push(description);
        Ok(())
    }

    fn latest_description(&self) -> Option<ProcedureDescription> {
        self.content.read().descriptions.last().cloned()
    }

    fn description_at(&self, time: f64) -> Option<ProcedureDescription> {
        self.content
            .read()
            .descriptions
            .iter()
            .rev()
            .find(|d| valid_range(d).map_or(true, |(b, e)| time >= b && time <= e))
            .cloned()
    }

    fn feature_of_interest_ids(&self) -> Vec<String> {
        self.content.read().features_of_interest.clone()
    }
}

/// Offering backed by an observation storage
pub struct StorageDataProviderFactory {
    config: StorageProviderConfig,
    storage: Arc<dyn ObsStorage>,
}

impl StorageDataProviderFactory {
    pub fn new(config: StorageProviderConfig, storage: Arc<dyn ObsStorage>) -> Self {
        Self { config, storage }
    }

    /// Data stores not listed in `hidden_outputs`
    fn visible_stores(&self) -> Vec<String> {
        self.storage
            .data_store_names()
            .into_iter()
            .filter(|name| !self.config.hidden_outputs.contains(name))
            .collect()
    }
}

impl DataProviderFactory for StorageDataProviderFactory {
    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn generate_capabilities(&self) -> Result<OfferingCapabilities> {
        let description = self.storage.latest_description().ok_or_else(|| {
            SosError::Backend(format!("Storage for {} has no procedure description", self.config.uri))
        })?;
        let mut caps = OfferingCapabilities::new(&self.config.uri, &description.unique_id);
        caps.name = self.config.name.clone().or_else(|| Some(description.name.clone()));
        caps.description = description.description.clone();

        let mut bounds: Option<(f64, f64)> = None;
        for store in self.visible_stores() {
            let (structure, _) = self.storage.record_description(&store)?;
            caps.observable_properties.extend(structure.observable_definitions());
            if let Some((b, e)) = self.storage.data_time_range(&store)? {
                bounds = Some(match bounds {
                    Some((b0, e0)) => (b0.min(b), e0.max(e)),
                    None => (b, e),
                });
            }
        }
        caps.phenomenon_time = match bounds {
            Some((b, e)) => TimeExtent::from_epoch_range(b, e),
            None => TimeExtent::now(),
        };
        Ok(caps)
    }

    fn update_capabilities(&self) -> Result<OfferingCapabilities> {
        self.generate_capabilities()
    }

    fn generate_procedure_description(&self, at: Option<DateTime<Utc>>) -> Result<ProcedureDescription> {
        let description = match at {
            Some(t) => self.storage.description_at(datetime_to_epoch(t)),
            None => self.storage.latest_description(),
        };
        description.ok_or_else(|| {
            SosError::Backend(format!("No procedure description for {}", self.config.uri))
        })
    }

    fn new_provider(&self, filter: &DataFilter) -> Result<Box<dyn DataProvider>> {
        let mut selected = None;
        for store in self.visible_stores() {
            let (structure, encoding) = self.storage.record_description(&store)?;
            let defs = structure.observable_definitions();
            if filter.observables.is_empty() || filter.observables.iter().any(|p| defs.contains(p)) {
                selected = Some((store, structure, encoding));
                break;
            }
        }
        let (store, structure, encoding) = selected.ok_or_else(|| {
            SosError::Backend(format!("No data store of {} matches the request", self.config.uri))
        })?;

        let records: VecDeque<DataBlock> = match &filter.time {
            Some(t) if t.is_base_at_now() => {
                let all = self.storage.records(&store, None)?;
                all.into_iter().last().into_iter().collect()
            }
            Some(t) => self.storage.records(&store, Some(t.epoch_range()))?.into(),
            None => self.storage.records(&store, None)?.into(),
        };
        log::debug!("Storage provider for {} serving {} record(s) from {}", filter.offering, records.len(), store);
        Ok(Box::new(BufferedProvider::new(structure, encoding, records)))
    }

    fn cleanup(&self) {
        log::debug!("Provider {} released", self.config.uri);
    }
}
