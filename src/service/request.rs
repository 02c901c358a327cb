// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Decoded SOS requests and their responses
//!
//! Requests arrive either as JSON documents tagged with `request` or as KVP
//! query strings; both decode to [`SosRequest`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, SosError};
use crate::model::{CapabilitiesDocument, Observation, ProcedureDescription};
use crate::streaming::StreamSummary;
use crate::swe::{DataComponent, DataEncoding};
use crate::time::TimeExtent;
use crate::validation::{ExceptionReport, Violation, ViolationKind};

/// Service type every request must carry, when it carries one
pub const SERVICE_TYPE: &str = "SOS";

/// Protocol version advertised and accepted
pub const SERVICE_VERSION: &str = "2.0.0";

/// One decoded SOS request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request")]
pub enum SosRequest {
    GetCapabilities,
    DescribeSensor {
        procedure: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        procedure_description_format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        valid_time: Option<TimeExtent>,
    },
    GetResult {
        offering: String,
        #[serde(default)]
        observed_properties: Vec<String>,
        #[serde(default)]
        procedures: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temporal_filter: Option<TimeExtent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_format: Option<String>,
    },
    InsertSensor {
        procedure_description: ProcedureDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        procedure_description_format: Option<String>,
    },
    UpdateSensor {
        procedure: String,
        procedure_description: ProcedureDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        procedure_description_format: Option<String>,
    },
    DeleteSensor {
        procedure: String,
    },
    InsertObservation {
        offering: String,
        observations: Vec<Observation>,
    },
    InsertResultTemplate {
        offering: String,
        result_structure: DataComponent,
        result_encoding: DataEncoding,
    },
    InsertResult {
        template: String,
        /// Records encoded with the template's encoding
        #[serde(with = "text_payload")]
        values: Vec<u8>,
    },
}

impl SosRequest {
    /// Operation name as it appears on the wire
    pub fn operation(&self) -> &'static str {
        match self {
            SosRequest::GetCapabilities => "GetCapabilities",
            SosRequest::DescribeSensor { .. } => "DescribeSensor",
            SosRequest::GetResult { .. } => "GetResult",
            SosRequest::InsertSensor { .. } => "InsertSensor",
            SosRequest::UpdateSensor { .. } => "UpdateSensor",
            SosRequest::DeleteSensor { .. } => "DeleteSensor",
            SosRequest::InsertObservation { .. } => "InsertObservation",
            SosRequest::InsertResultTemplate { .. } => "InsertResultTemplate",
            SosRequest::InsertResult { .. } => "InsertResult",
        }
    }

    /// Whether the request modifies the service
    pub fn is_transactional(&self) -> bool {
        !matches!(
            self,
            SosRequest::GetCapabilities | SosRequest::DescribeSensor { .. } | SosRequest::GetResult { .. }
        )
    }

    /// Decode a JSON request document
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| SosError::Parse(format!("Invalid request document: {}", e)))
    }

    /// Decode a KVP query string
    ///
    /// Parameter names are case insensitive. InsertResult takes its values
    /// from `payload` (the request body) rather than from the query.
    pub fn from_kvp(query: &str, payload: Option<&[u8]>) -> Result<Self> {
        let params = KvpParams::parse(query);
        let mut report = ExceptionReport::new();

        if let Some(service) = params.get("service") {
            if service != SERVICE_TYPE {
                report.add(Violation::invalid("service", Some(service)));
            }
        }
        if let Some(version) = params.get("version") {
            if version != SERVICE_VERSION {
                report.add(Violation::invalid("version", Some(version)));
            }
        }
        let Some(request) = params.get("request").map(str::to_string) else {
            report.add(Violation::new(ViolationKind::MissingParameterValue, "request", None));
            return Err(SosError::Validation(report));
        };

        let decoded = match request.as_str() {
            "GetCapabilities" => Some(SosRequest::GetCapabilities),
            "DescribeSensor" => {
                let procedure = params.required("procedure", &mut report);
                let valid_time = params.time("validTime", &mut report);
                procedure.map(|procedure| SosRequest::DescribeSensor {
                    procedure,
                    procedure_description_format: params
                        .get("procedureDescriptionFormat")
                        .map(str::to_string),
                    valid_time,
                })
            }
            "GetResult" => {
                let offering = params.required("offering", &mut report);
                let temporal_filter = params.time("temporalFilter", &mut report);
                offering.map(|offering| SosRequest::GetResult {
                    offering,
                    observed_properties: params.list("observedProperty"),
                    procedures: params.list("procedure"),
                    temporal_filter,
                    response_format: params.get("responseFormat").map(str::to_string),
                })
            }
            "DeleteSensor" => params
                .required("procedure", &mut report)
                .map(|procedure| SosRequest::DeleteSensor { procedure }),
            "InsertResult" => {
                let template = params.required("template", &mut report);
                let values = match payload {
                    Some(body) if !body.is_empty() => Some(body.to_vec()),
                    _ => params.get("resultValues").map(|v| v.as_bytes().to_vec()),
                };
                if values.is_none() {
                    report.add(Violation::new(ViolationKind::MissingParameterValue, "resultValues", None));
                }
                template.zip(values).map(|(template, values)| SosRequest::InsertResult { template, values })
            }
            other => {
                report.add(
                    Violation::invalid("request", Some(other))
                        .with_message(format!("Request {} cannot be sent as KVP", other)),
                );
                None
            }
        };
        report.process()?;
        decoded.ok_or_else(|| SosError::Parse(format!("Incomplete {} request", request)))
    }
}

/// Case insensitive view of KVP parameters
struct KvpParams(Vec<(String, String)>);

impl KvpParams {
    fn parse(query: &str) -> Self {
        Self(
            url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str, report: &mut ExceptionReport) -> Option<String> {
        let value = self.get(name).map(str::to_string);
        if value.is_none() {
            report.add(Violation::new(ViolationKind::MissingParameterValue, name, None));
        }
        value
    }

    /// Comma separated list
    fn list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Time parameter, optionally prefixed with the filtered property name
    /// (`om:phenomenonTime,2010-01-01T00:00:00Z/now`)
    fn time(&self, name: &str, report: &mut ExceptionReport) -> Option<TimeExtent> {
        let raw = self.get(name)?;
        let value = match raw.split_once(',') {
            Some((_, time)) => time,
            None => raw,
        };
        match value.trim().parse::<TimeExtent>() {
            Ok(t) => Some(t),
            Err(e) => {
                report.add(Violation::invalid(name, Some(raw)).with_message(e.to_string()));
                None
            }
        }
    }
}

/// Response of a successfully handled request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "response")]
pub enum SosResponse {
    Capabilities(CapabilitiesDocument),
    SensorDescription(ProcedureDescription),
    /// Records were streamed to the response sink
    ResultStream(StreamSummary),
    SensorInserted {
        assigned_offering: String,
        assigned_procedure: String,
    },
    SensorUpdated {
        updated_procedure: String,
    },
    SensorDeleted {
        deleted_procedure: String,
    },
    ObservationsInserted {
        count: usize,
    },
    ResultTemplateInserted {
        accepted_template: String,
    },
    ResultInserted {
        count: usize,
    },
}

impl SosResponse {
    /// Whether the body was already written to the sink
    pub fn is_streamed(&self) -> bool {
        matches!(self, SosResponse::ResultStream(_))
    }
}

mod text_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(values))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_request() {
        let body = br#"{"request":"DeleteSensor","procedure":"urn:test:sensor:001"}"#;
        let request = SosRequest::from_json(body).unwrap();
        assert_eq!(
            request,
            SosRequest::DeleteSensor {
                procedure: "urn:test:sensor:001".into()
            }
        );
        assert!(request.is_transactional());
        assert_eq!(request.operation(), "DeleteSensor");
    }

    #[test]
    fn test_json_insert_result_values_as_text() {
        let body = br#"{"request":"InsertResult","template":"t1","values":"2010-06-01T00:00:00Z,1.5\n"}"#;
        match SosRequest::from_json(body).unwrap() {
            SosRequest::InsertResult { template, values } => {
                assert_eq!(template, "t1");
                assert_eq!(values, b"2010-06-01T00:00:00Z,1.5\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_kvp_get_result() {
        let query = "service=SOS&version=2.0.0&REQUEST=GetResult&offering=urn:x-sos\
                     &observedProperty=urn:a,urn:b&responseFormat=http://www.opengis.net/swe/2.0\
                     &temporalFilter=om:phenomenonTime,2010-06-01T00:00:00Z/2010-06-02T00:00:00Z";
        match SosRequest::from_kvp(query, None).unwrap() {
            SosRequest::GetResult {
                offering,
                observed_properties,
                procedures,
                temporal_filter,
                response_format,
            } => {
                assert_eq!(offering, "urn:x-sos");
                assert_eq!(response_format.as_deref(), Some("http://www.opengis.net/swe/2.0"));
                assert_eq!(observed_properties, vec!["urn:a".to_string(), "urn:b".to_string()]);
                assert!(procedures.is_empty());
                assert!(temporal_filter.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_kvp_percent_decoding() {
        let query = "request=DescribeSensor&procedure=urn%3Atest%3Asensor%3A001&validTime=now";
        match SosRequest::from_kvp(query, None).unwrap() {
            SosRequest::DescribeSensor {
                procedure,
                valid_time,
                ..
            } => {
                assert_eq!(procedure, "urn:test:sensor:001");
                assert!(valid_time.unwrap().is_base_at_now());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_kvp_missing_parameters_collected() {
        let err = SosRequest::from_kvp("service=WMS&request=GetResult", None).unwrap_err();
        match err {
            SosError::Validation(report) => {
                assert_eq!(report.len(), 2);
                assert!(report.has_locator("service"));
                assert!(report.has_locator("offering"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_kvp_missing_request() {
        let err = SosRequest::from_kvp("service=SOS", None).unwrap_err();
        assert_eq!(err.exception_code(), "MissingParameterValue");
    }

    #[test]
    fn test_kvp_insert_result_uses_payload() {
        let request = SosRequest::from_kvp("request=InsertResult&template=t1", Some(b"1,2\n")).unwrap();
        assert_eq!(
            request,
            SosRequest::InsertResult {
                template: "t1".into(),
                values: b"1,2\n".to_vec()
            }
        );
        assert!(SosRequest::from_kvp("request=InsertResult&template=t1", None).is_err());
    }

    #[test]
    fn test_kvp_post_only_operation() {
        match SosRequest::from_kvp("request=InsertSensor", None).unwrap_err() {
            SosError::Validation(report) => {
                assert!(report.has_locator("request"));
                assert_eq!(report.first_code(), "InvalidParameterValue");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
