// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Offering capabilities, capabilities document, procedure descriptions and
//! observations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::swe::{DataComponent, DataValue};
use crate::time::TimeExtent;

/// SensorML 2.0 procedure description format
pub const SENSORML_FORMAT: &str = "http://www.opengis.net/sensorml/2.0";

/// Result format served by GetResult
pub const RESULT_FORMAT_SWE: &str = "http://www.opengis.net/swe/2.0";

/// Observation result format
pub const RESULT_FORMAT_OM: &str = "http://www.opengis.net/om/2.0";

/// Conformance classes advertised in the capabilities document
pub mod profile {
    pub const RESULT_RETRIEVAL: &str = "http://www.opengis.net/spec/SOS/2.0/conf/resultRetrieval";
    pub const RESULT_INSERTION: &str = "http://www.opengis.net/spec/SOS/2.0/conf/resultInsertion";
    pub const OBSERVATION_INSERTION: &str = "http://www.opengis.net/spec/SOS/2.0/conf/obsInsertion";
    pub const SENSOR_INSERTION: &str = "http://www.opengis.net/spec/SOS/2.0/conf/sensorInsertion";
    pub const SENSOR_DELETION: &str = "http://www.opengis.net/spec/SOS/2.0/conf/sensorDeletion";
}

/// Capability metadata of one offering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferingCapabilities {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub procedures: Vec<String>,
    pub observable_properties: BTreeSet<String>,
    pub response_formats: Vec<String>,
    pub procedure_formats: Vec<String>,
    pub phenomenon_time: TimeExtent,
}

impl OfferingCapabilities {
    /// Offering for one procedure with the default formats
    pub fn new(identifier: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            description: None,
            procedures: vec![procedure.into()],
            observable_properties: BTreeSet::new(),
            response_formats: vec![RESULT_FORMAT_OM.to_string(), RESULT_FORMAT_SWE.to_string()],
            procedure_formats: vec![SENSORML_FORMAT.to_string()],
            phenomenon_time: TimeExtent::now(),
        }
    }

    /// First procedure id; offerings carry exactly one in practice
    pub fn main_procedure(&self) -> Option<&str> {
        self.procedures.first().map(String::as_str)
    }
}

/// Service identification section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceIdentification {
    pub title: String,
    pub description: String,
}

/// Capabilities document
///
/// Never mutated in place once published; amendments produce a new document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitiesDocument {
    pub identification: ServiceIdentification,
    pub fees: String,
    pub access_constraints: Vec<String>,
    pub service_provider: String,
    pub profiles: Vec<String>,
    pub layers: Vec<OfferingCapabilities>,
}

impl Default for CapabilitiesDocument {
    fn default() -> Self {
        Self {
            identification: ServiceIdentification {
                title: "SensorHub SOS".to_string(),
                description: String::new(),
            },
            fees: "NONE".to_string(),
            access_constraints: vec!["NONE".to_string()],
            service_provider: String::new(),
            profiles: vec![profile::RESULT_RETRIEVAL.to_string()],
            layers: Vec::new(),
        }
    }
}

impl CapabilitiesDocument {
    pub fn layer(&self, offering: &str) -> Option<&OfferingCapabilities> {
        self.layers.iter().find(|l| l.identifier == offering)
    }

    /// Copy with `caps` appended
    pub fn with_layer(&self, caps: OfferingCapabilities) -> Self {
        let mut doc = self.clone();
        doc.layers.push(caps);
        doc
    }

    /// Copy without the layer `offering`
    pub fn without_layer(&self, offering: &str) -> Self {
        let mut doc = self.clone();
        doc.layers.retain(|l| l.identifier != offering);
        doc
    }

    /// Copy with the layer `caps.identifier` replaced in place
    pub fn with_replaced_layer(&self, caps: OfferingCapabilities) -> Self {
        let mut doc = self.clone();
        if let Some(slot) = doc.layers.iter_mut().find(|l| l.identifier == caps.identifier) {
            *slot = caps;
        }
        doc
    }
}

/// Structured procedure description (SensorML content)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureDescription {
    pub unique_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub outputs: Vec<DataComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_time: Option<TimeExtent>,
}

impl ProcedureDescription {
    pub fn new(unique_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            name: name.into(),
            description: None,
            outputs: Vec::new(),
            valid_time: None,
        }
    }

    pub fn with_output(mut self, output: DataComponent) -> Self {
        self.outputs.push(output);
        self
    }

    /// Observable property definitions across every output
    pub fn observable_properties(&self) -> BTreeSet<String> {
        self.outputs
            .iter()
            .flat_map(|o| o.observable_definitions())
            .collect()
    }
}

/// Single observation with a scalar result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub procedure: String,
    pub observed_property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_of_interest: Option<String>,
    pub phenomenon_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_time: Option<DateTime<Utc>>,
    pub result: DataValue,
}

/// Filter passed to data providers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFilter {
    pub offering: String,
    pub procedures: Vec<String>,
    pub observables: Vec<String>,
    /// Phenomenon time; `None` selects everything
    pub time: Option<TimeExtent>,
}

impl DataFilter {
    pub fn for_offering(offering: impl Into<String>) -> Self {
        Self {
            offering: offering.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_amendments_copy() {
        let doc = CapabilitiesDocument::default();
        let amended = doc.with_layer(OfferingCapabilities::new("urn:a-sos", "urn:a"));
        assert!(doc.layers.is_empty());
        assert_eq!(amended.layers.len(), 1);
        assert!(amended.layer("urn:a-sos").is_some());

        let removed = amended.without_layer("urn:a-sos");
        assert!(removed.layers.is_empty());
        assert_eq!(amended.layers.len(), 1);
    }

    #[test]
    fn test_replaced_layer_keeps_order() {
        let doc = CapabilitiesDocument::default()
            .with_layer(OfferingCapabilities::new("a", "pa"))
            .with_layer(OfferingCapabilities::new("b", "pb"));
        let mut b = OfferingCapabilities::new("b", "pb");
        b.name = Some("renamed".into());
        let doc = doc.with_replaced_layer(b);
        assert_eq!(doc.layers[1].name.as_deref(), Some("renamed"));
        assert_eq!(doc.layers[0].identifier, "a");
    }

    #[test]
    fn test_description_observables() {
        let desc = ProcedureDescription::new("urn:test:sensor:001", "Test").with_output(
            DataComponent::record(
                "weather",
                vec![
                    DataComponent::time("time"),
                    DataComponent::quantity("t", "urn:ogc:def:property:Temperature", "Cel"),
                ],
            ),
        );
        let obs = desc.observable_properties();
        assert_eq!(obs.len(), 1);
        assert!(obs.contains("urn:ogc:def:property:Temperature"));
    }
}
