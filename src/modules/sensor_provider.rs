// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Data provider over a virtual sensor's buffered outputs

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

use super::virtual_sensor::VirtualSensor;
use crate::config::SensorProviderConfig;
use crate::error::{Result, SosError};
use crate::model::{DataFilter, OfferingCapabilities, ProcedureDescription};
use crate::provider::{DataProvider, DataProviderFactory};
use crate::swe::{DataBlock, DataComponent, DataEncoding};
use crate::time::{epoch_to_datetime, TimeExtent};

/// Offering backed by a virtual sensor
pub struct SensorDataProviderFactory {
    config: SensorProviderConfig,
    sensor: Arc<VirtualSensor>,
}

impl SensorDataProviderFactory {
    pub fn new(config: SensorProviderConfig, sensor: Arc<VirtualSensor>) -> Self {
        Self { config, sensor }
    }

    fn description(&self) -> Result<ProcedureDescription> {
        self.sensor.description().ok_or_else(|| {
            SosError::Backend(format!("Sensor {} has no description", self.sensor.id()))
        })
    }
}

impl DataProviderFactory for SensorDataProviderFactory {
    fn is_enabled(&self) -> bool {
        self.config.enabled && self.sensor.is_enabled()
    }

    fn generate_capabilities(&self) -> Result<OfferingCapabilities> {
        let description = self.description()?;
        let mut caps = OfferingCapabilities::new(&self.config.uri, &description.unique_id);
        caps.name = self.config.name.clone().or_else(|| Some(description.name.clone()));
        caps.description = description.description.clone();
        caps.observable_properties = self
            .sensor
            .select_outputs(&[])
            .iter()
            .flat_map(|o| o.structure.observable_definitions())
            .collect();
        caps.phenomenon_time = match self.sensor.first_record_time() {
            Some(first) => TimeExtent::since(epoch_to_datetime(first)),
            None => TimeExtent::now(),
        };
        Ok(caps)
    }

    fn update_capabilities(&self) -> Result<OfferingCapabilities> {
        self.generate_capabilities()
    }

    fn generate_procedure_description(&self, _at: Option<DateTime<Utc>>) -> Result<ProcedureDescription> {
        self.description()
    }

    fn new_provider(&self, filter: &DataFilter) -> Result<Box<dyn DataProvider>> {
        let output = self
            .sensor
            .select_outputs(&filter.observables)
            .into_iter()
            .next()
            .ok_or_else(|| {
                SosError::Backend(format!("No output of sensor {} matches the request", self.sensor.id()))
            })?;

        let records: VecDeque<DataBlock> = match &filter.time {
            // latest record only
            Some(t) if t.is_base_at_now() => output.records().last().cloned().into_iter().collect(),
            Some(t) => output
                .records()
                .filter(|r| r.time(&output.structure).is_some_and(|time| t.contains_epoch(time)))
                .cloned()
                .collect(),
            None => output.records().cloned().collect(),
        };
        log::debug!(
            "Sensor provider for {} selected output {} with {} record(s)",
            filter.offering,
            output.name,
            records.len()
        );
        Ok(Box::new(BufferedProvider {
            structure: output.structure,
            encoding: output.encoding,
            records,
        }))
    }

    fn cleanup(&self) {
        log::debug!("Provider {} released", self.config.uri);
    }
}

/// Provider replaying a snapshot of buffered records
pub struct BufferedProvider {
    structure: DataComponent,
    encoding: DataEncoding,
    records: VecDeque<DataBlock>,
}

impl BufferedProvider {
    pub fn new(structure: DataComponent, encoding: DataEncoding, records: VecDeque<DataBlock>) -> Self {
        Self {
            structure,
            encoding,
            records,
        }
    }
}

impl DataProvider for BufferedProvider {
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
