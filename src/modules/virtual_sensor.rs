// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Virtual sensor fed through transactional requests
//!
//! Created by InsertSensor. Holds the procedure description and one bounded
//! record buffer per output; outputs come from the description, from result
//! templates and from observed properties of inserted observations.

use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, SosError};
use crate::model::{Observation, ProcedureDescription};
use crate::provider::DataConsumer;
use crate::swe::{ComponentKind, DataBlock, DataComponent, DataEncoding, DataValue};
use crate::time::datetime_to_epoch;

/// One output stream of a virtual sensor
#[derive(Debug, Clone)]
pub struct SensorOutput {
    pub name: String,
    pub structure: DataComponent,
    pub encoding: DataEncoding,
    records: VecDeque<DataBlock>,
    first_time: Option<f64>,
}

impl SensorOutput {
    fn new(name: String, structure: DataComponent, encoding: DataEncoding) -> Self {
        Self {
            name,
            structure,
            encoding,
            records: VecDeque::new(),
            first_time: None,
        }
    }

    fn push(&mut self, record: DataBlock, capacity: usize) {
        if let Some(t) = record.time(&self.structure) {
            self.first_time = Some(self.first_time.map_or(t, |f| f.min(t)));
        }
        if self.records.len() == capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Buffered records, oldest first
    pub fn records(&self) -> impl Iterator<Item = &DataBlock> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
struct SensorState {
    description: Option<ProcedureDescription>,
    outputs: BTreeMap<String, SensorOutput>,
}

/// Virtual sensor module
#[derive(Debug)]
pub struct VirtualSensor {
    id: String,
    capacity: usize,
    enabled: AtomicBool,
    state: RwLock<SensorState>,
}

impl VirtualSensor {
    /// New disabled sensor keeping up to `capacity` records per output
    pub fn new(id: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            capacity: capacity.max(1),
            enabled: AtomicBool::new(false),
            state: RwLock::new(SensorState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn description(&self) -> Option<ProcedureDescription> {
        self.state.read().description.clone()
    }

    pub fn unique_id(&self) -> Option<String> {
        self.state.read().description.as_ref().map(|d| d.unique_id.clone())
    }

    pub fn output_names(&self) -> Vec<String> {
        self.state.read().outputs.keys().cloned().collect()
    }

    pub fn output(&self, name: &str) -> Option<SensorOutput> {
        self.state.read().outputs.get(name).cloned()
    }

    /// Outputs whose structure declares one of `observables`, or every
    /// output when `observables` is empty
    pub fn select_outputs(&self, observables: &[String]) -> Vec<SensorOutput> {
        self.state
            .read()
            .outputs
            .values()
            .filter(|o| {
                observables.is_empty() || {
                    let defs = o.structure.observable_definitions();
                    observables.iter().any(|p| defs.contains(p))
                }
            })
            .cloned()
            .collect()
    }

    /// Earliest buffered record time across outputs
    pub fn first_record_time(&self) -> Option<f64> {
        self.state
            .read()
            .outputs
            .values()
            .filter_map(|o| o.first_time)
            .reduce(f64::min)
    }

    fn template_id(unique_id: &str, output: &str) -> String {
        format!("{}-{}", unique_id, output)
    }

    fn default_encoding(structure: &DataComponent) -> DataEncoding {
        if structure.leaves().iter().any(|c| c.kind == ComponentKind::Blob) {
            DataEncoding::binary_for(structure)
        } else {
            DataEncoding::text()
        }
    }
}

fn unique_output_name(outputs: &BTreeMap<String, SensorOutput>, base: &str) -> String {
    if !outputs.contains_key(base) {
        return base.to_string();
    }
    (2..)
        .map(|i| format!("{}{}", base, i))
        .find(|n| !outputs.contains_key(n))
        .unwrap_or_else(|| base.to_string())
}

fn observation_output(observed_property: &str, value: &DataValue) -> DataComponent {
    let name = observed_property
        .rsplit(|c: char| c == '/' || c == ':' || c == '#')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("value");
    let kind = match value {
        DataValue::Boolean(_) => ComponentKind::Boolean,
        DataValue::Integer(_) => ComponentKind::Count,
        DataValue::Text(_) => ComponentKind::Text,
        DataValue::Bytes(_) => ComponentKind::Blob,
        DataValue::Double(_) | DataValue::Time(_) => ComponentKind::Quantity { uom: None },
    };
    DataComponent::record(
        name,
        vec![
            DataComponent::time("time"),
            DataComponent::new(name, kind).with_definition(observed_property),
        ],
    )
}

impl DataConsumer for VirtualSensor {
    fn update_procedure_description(&self, description: &ProcedureDescription) -> Result<()> {
        let mut state = self.state.write();
        if let Some(current) = &state.description {
            if current.unique_id != description.unique_id {
                return Err(SosError::Backend(format!(
                    "Sensor {} cannot change unique ID from {} to {}",
                    self.id, current.unique_id, description.unique_id
                )));
            }
        }
        for output in &description.outputs {
            if !state.outputs.contains_key(&output.name) {
                let encoding = Self::default_encoding(output);
                state.outputs.insert(
                    output.name.clone(),
                    SensorOutput::new(output.name.clone(), output.clone(), encoding),
                );
            }
        }
        state.description = Some(description.clone());
        log::debug!("Sensor {} description updated", self.id);
        Ok(())
    }

    fn new_observations(&self, observations: &[Observation]) -> Result<()> {
        let mut state = self.state.write();
        for obs in observations {
            let existing = state
                .outputs
                .values()
                .find(|o| {
                    o.structure.leaves().len() == 2
                        && o.structure.observable_definitions().contains(&obs.observed_property)
                })
                .map(|o| o.name.clone());
            let name = match existing {
                Some(name) => name,
                None => {
                    let structure = observation_output(&obs.observed_property, &obs.result);
                    let name = unique_output_name(&state.outputs, &structure.name);
                    let encoding = Self::default_encoding(&structure);
                    state
                        .outputs
                        .insert(name.clone(), SensorOutput::new(name.clone(), structure, encoding));
                    name
                }
            };
            let record = DataBlock::new(vec![
                DataValue::Time(datetime_to_epoch(obs.phenomenon_time)),
                obs.result.clone(),
            ]);
            if let Some(output) = state.outputs.get_mut(&name) {
                output.push(record, self.capacity);
            }
        }
        Ok(())
    }

    fn new_result_template(&self, structure: &DataComponent, encoding: &DataEncoding) -> Result<String> {
        let mut state = self.state.write();
        let unique_id = state
            .description
            .as_ref()
            .map(|d| d.unique_id.clone())
            .ok_or_else(|| SosError::Backend(format!("Sensor {} has no description", self.id)))?;

        if let Some(output) = state
            .outputs
            .values_mut()
            .find(|o| o.structure == *structure)
        {
            output.encoding = encoding.clone();
            return Ok(Self::template_id(&unique_id, &output.name));
        }

        let name = unique_output_name(&state.outputs, &structure.name);
        state.outputs.insert(
            name.clone(),
            SensorOutput::new(name.clone(), structure.clone(), encoding.clone()),
        );
        log::debug!("Sensor {} got new output {}", self.id, name);
        Ok(Self::template_id(&unique_id, &name))
    }

    fn new_result_record(&self, template_id: &str, record: DataBlock) -> Result<()> {
        let mut state = self.state.write();
        let unique_id = state
            .description
            .as_ref()
            .map(|d| d.unique_id.clone())
            .unwrap_or_default();
        let output = template_id
            .strip_prefix(&unique_id)
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|name| state.outputs.get_mut(name))
            .ok_or_else(|| SosError::not_found("template", template_id))?;
        if record.values.len() != output.structure.leaves().len() {
            return Err(SosError::Encoding(format!(
                "Record does not match template {}",
                template_id
            )));
        }
        output.push(record, self.capacity);
        Ok(())
    }
}
