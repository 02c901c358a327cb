// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

use std::sync::Arc;
use std::thread;

use chrono::{TimeZone, Utc};

use super::*;
use crate::config::{ProviderConfig, StorageProviderConfig};
use crate::error::SosError;
use crate::model::{Observation, OfferingCapabilities, ProcedureDescription};
use crate::modules::{DataKey, LocalModuleRegistry, MemoryObsStorage, ObsStorage};
use crate::streaming::BufferedResponse;
use crate::swe::{DataBlock, DataComponent, DataEncoding, DataValue};
use crate::testing::{sensor_provider, StubFactory, StubModules};
use crate::time::{datetime_to_epoch, TimeExtent};

const SENSOR: &str = "urn:test:sensor:001";
const OFFERING: &str = "urn:test:sensor:001-sos";
const TEMPERATURE: &str = "urn:ogc:def:property:Temperature";

fn transactional_config() -> SosServiceConfig {
    SosServiceConfig {
        enable_transactional: true,
        ..Default::default()
    }
}

fn local_service() -> (SosService, Arc<LocalModuleRegistry>) {
    let modules = Arc::new(LocalModuleRegistry::in_memory());
    let service = SosService::new(transactional_config(), modules.clone());
    service.start();
    (service, modules)
}

fn weather() -> DataComponent {
    DataComponent::record(
        "weather",
        vec![
            DataComponent::time("time"),
            DataComponent::quantity("temp", TEMPERATURE, "Cel"),
        ],
    )
}

fn handle(service: &SosService, request: SosRequest) -> Result<SosResponse> {
    service.handle(request, &mut BufferedResponse::new())
}

fn insert(service: &SosService, uid: &str) -> Result<SosResponse> {
    handle(
        service,
        SosRequest::InsertSensor {
            procedure_description: ProcedureDescription::new(uid, "Test sensor"),
            procedure_description_format: None,
        },
    )
}

fn describe(service: &SosService, procedure: &str) -> Result<SosResponse> {
    handle(
        service,
        SosRequest::DescribeSensor {
            procedure: procedure.into(),
            procedure_description_format: None,
            valid_time: None,
        },
    )
}

fn validation_report(err: SosError) -> crate::validation::ExceptionReport {
    match err {
        SosError::Validation(report) => report,
        other => panic!("expected a validation fault, got {:?}", other),
    }
}

#[test]
fn test_insert_describe_delete_round_trip() {
    let (service, modules) = local_service();

    let response = insert(&service, SENSOR).unwrap();
    assert_eq!(
        response,
        SosResponse::SensorInserted {
            assigned_offering: OFFERING.into(),
            assigned_procedure: SENSOR.into(),
        }
    );
    assert!(service.snapshot().capabilities().layer(OFFERING).is_some());
    assert_eq!(service.config().data_consumers.len(), 1);
    assert_eq!(modules.sensor_ids().len(), 1);

    match describe(&service, SENSOR).unwrap() {
        SosResponse::SensorDescription(d) => assert_eq!(d.unique_id, SENSOR),
        other => panic!("unexpected {:?}", other),
    }

    handle(&service, SosRequest::DeleteSensor { procedure: SENSOR.into() }).unwrap();
    let report = validation_report(describe(&service, SENSOR).unwrap_err());
    assert!(report.has_locator("procedure"));
    assert!(service.snapshot().capabilities().layer(OFFERING).is_none());
    assert!(service.config().data_consumers.is_empty());
    assert!(service.config().data_providers.is_empty());
    assert!(modules.sensor_ids().is_empty());
    assert!(modules.hub_config().sensors.is_empty());
}

#[test]
fn test_describe_sensor_valid_time_outside_observations() {
    let (service, _) = local_service();
    insert(&service, SENSOR).unwrap();
    let response = handle(
        &service,
        SosRequest::DescribeSensor {
            procedure: SENSOR.into(),
            procedure_description_format: None,
            valid_time: Some("2001-01-01T00:00:00Z".parse::<TimeExtent>().unwrap()),
        },
    )
    .unwrap();
    assert!(matches!(response, SosResponse::SensorDescription(d) if d.unique_id == SENSOR));
}

#[test]
fn test_short_procedure_id_rejected() {
    let (service, modules) = local_service();
    let report = validation_report(insert(&service, "short").unwrap_err());
    assert!(report.has_locator("procedureDescription"));
    assert!(service.snapshot().offerings().is_empty());
    assert!(modules.sensor_ids().is_empty());
}

#[test]
fn test_missing_procedure_id_rejected() {
    let (service, _) = local_service();
    let err = insert(&service, "  ").unwrap_err();
    assert_eq!(err.exception_code(), "MissingParameterValue");
}

#[test]
fn test_duplicate_insert_rejected() {
    let (service, modules) = local_service();
    insert(&service, SENSOR).unwrap();
    let report = validation_report(insert(&service, SENSOR).unwrap_err());
    assert!(report.has_locator("procedureDescription"));
    assert_eq!(service.snapshot().offerings().len(), 1);
    assert_eq!(modules.sensor_ids().len(), 1);
}

#[test]
fn test_concurrent_inserts_single_winner() {
    let (service, modules) = local_service();
    let service = Arc::new(service);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            thread::spawn(move || insert(&service, SENSOR).is_ok())
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(wins, 1);
    assert_eq!(service.snapshot().offerings().len(), 1);
    assert_eq!(modules.sensor_ids().len(), 1);
}

#[test]
fn test_transactional_operations_disabled() {
    let modules = Arc::new(StubModules::new());
    modules.add_factory(OFFERING, StubFactory::arc(OfferingCapabilities::new(OFFERING, SENSOR)));
    let config = SosServiceConfig {
        data_providers: vec![sensor_provider(OFFERING)],
        ..Default::default()
    };
    let service = SosService::new(config.clone(), modules.clone());
    service.start();
    let before = service.snapshot().capabilities().clone();

    let requests = vec![
        SosRequest::InsertSensor {
            procedure_description: ProcedureDescription::new("urn:test:sensor:002", "Other"),
            procedure_description_format: None,
        },
        SosRequest::UpdateSensor {
            procedure: SENSOR.into(),
            procedure_description: ProcedureDescription::new(SENSOR, "Renamed"),
            procedure_description_format: None,
        },
        SosRequest::DeleteSensor { procedure: SENSOR.into() },
        SosRequest::InsertObservation {
            offering: OFFERING.into(),
            observations: Vec::new(),
        },
        SosRequest::InsertResultTemplate {
            offering: OFFERING.into(),
            result_structure: weather(),
            result_encoding: DataEncoding::text(),
        },
        SosRequest::InsertResult {
            template: "any".into(),
            values: b"1,2\n".to_vec(),
        },
    ];
    for request in requests {
        let operation = request.operation();
        let err = handle(&service, request).unwrap_err();
        assert!(matches!(err, SosError::OperationNotSupported(ref op) if op == operation));
        assert_eq!(err.http_status(), 501);
    }
    assert_eq!(modules.saves(), 0);
    assert_eq!(service.snapshot().capabilities(), &before);
    assert_eq!(service.config(), config);
}

#[test]
fn test_describe_sensor_reports_every_violation() {
    let (service, _) = local_service();
    let err = handle(
        &service,
        SosRequest::DescribeSensor {
            procedure: "urn:test:unknown".into(),
            procedure_description_format: Some("text/html".into()),
            valid_time: None,
        },
    )
    .unwrap_err();
    let report = validation_report(err);
    assert_eq!(report.len(), 2);
    assert!(report.has_locator("procedure"));
    assert!(report.has_locator("procedureDescriptionFormat"));
}

#[test]
fn test_result_template_and_result_insertion() {
    let (service, modules) = local_service();
    insert(&service, SENSOR).unwrap();

    let template = match handle(
        &service,
        SosRequest::InsertResultTemplate {
            offering: OFFERING.into(),
            result_structure: weather(),
            result_encoding: DataEncoding::text(),
        },
    )
    .unwrap()
    {
        SosResponse::ResultTemplateInserted { accepted_template } => accepted_template,
        other => panic!("unexpected {:?}", other),
    };
    assert!(service.snapshot().lookup_by_template(&template).is_ok());

    let values = b"2010-06-01T00:00:00Z,20.5\n2010-06-01T00:01:00Z,20.7\n2010-06-01T00:02:00Z,20.9\n";
    let response = handle(
        &service,
        SosRequest::InsertResult {
            template: template.clone(),
            values: values.to_vec(),
        },
    )
    .unwrap();
    assert_eq!(response, SosResponse::ResultInserted { count: 3 });

    let sensor_id = modules.sensor_ids().remove(0);
    assert_eq!(modules.sensor(&sensor_id).unwrap().output("weather").unwrap().len(), 3);

    // phenomenon time now starts at the first record
    let caps = service.snapshot().lookup_offering(OFFERING).unwrap().clone();
    assert!(caps.observable_properties.contains(TEMPERATURE));
    assert!(caps.phenomenon_time.is_end_now());

    let mut sink = BufferedResponse::new();
    let response = service
        .handle(
            SosRequest::GetResult {
                offering: OFFERING.into(),
                observed_properties: vec![TEMPERATURE.into()],
                procedures: vec![SENSOR.into()],
                temporal_filter: None,
                response_format: None,
            },
            &mut sink,
        )
        .unwrap();
    assert!(response.is_streamed());
    assert_eq!(sink.flushes, 4);
    assert_eq!(String::from_utf8(sink.body).unwrap().lines().count(), 3);
}

#[test]
fn test_malformed_result_rejected() {
    let (service, _) = local_service();
    insert(&service, SENSOR).unwrap();
    let template = match handle(
        &service,
        SosRequest::InsertResultTemplate {
            offering: OFFERING.into(),
            result_structure: weather(),
            result_encoding: DataEncoding::text(),
        },
    )
    .unwrap()
    {
        SosResponse::ResultTemplateInserted { accepted_template } => accepted_template,
        other => panic!("unexpected {:?}", other),
    };
    let err = handle(
        &service,
        SosRequest::InsertResult {
            template,
            values: b"2010-06-01T00:00:00Z,1.0,extra\n".to_vec(),
        },
    )
    .unwrap_err();
    assert_eq!(err.http_status(), 400);
}

#[test]
fn test_insert_result_unknown_template() {
    let (service, _) = local_service();
    let err = handle(
        &service,
        SosRequest::InsertResult {
            template: "urn:nope".into(),
            values: b"1\n".to_vec(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, SosError::NotFound { parameter: "template", .. }));
}

#[test]
fn test_observations_served_by_get_result() {
    let (service, _) = local_service();
    insert(&service, SENSOR).unwrap();
    let observations: Vec<Observation> = (0..2)
        .map(|i| Observation {
            procedure: SENSOR.into(),
            observed_property: TEMPERATURE.into(),
            feature_of_interest: None,
            phenomenon_time: Utc.with_ymd_and_hms(2010, 6, 1, 0, i, 0).unwrap(),
            result_time: None,
            result: DataValue::Double(20.0 + f64::from(i)),
        })
        .collect();
    let response = handle(
        &service,
        SosRequest::InsertObservation {
            offering: OFFERING.into(),
            observations,
        },
    )
    .unwrap();
    assert_eq!(response, SosResponse::ObservationsInserted { count: 2 });

    let mut sink = BufferedResponse::new();
    let response = service
        .handle(
            SosRequest::GetResult {
                offering: OFFERING.into(),
                observed_properties: vec![TEMPERATURE.into()],
                procedures: Vec::new(),
                temporal_filter: None,
                response_format: None,
            },
            &mut sink,
        )
        .unwrap();
    match response {
        SosResponse::ResultStream(summary) => assert_eq!(summary.records, 2),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_observation_from_foreign_procedure_rejected() {
    let (service, _) = local_service();
    insert(&service, SENSOR).unwrap();
    let err = handle(
        &service,
        SosRequest::InsertObservation {
            offering: OFFERING.into(),
            observations: vec![Observation {
                procedure: "urn:test:sensor:999".into(),
                observed_property: TEMPERATURE.into(),
                feature_of_interest: None,
                phenomenon_time: Utc::now(),
                result_time: None,
                result: DataValue::Double(1.0),
            }],
        },
    )
    .unwrap_err();
    assert!(validation_report(err).has_locator("procedure"));
}

#[test]
fn test_update_sensor() {
    let (service, modules) = local_service();
    insert(&service, SENSOR).unwrap();

    let updated = ProcedureDescription::new(SENSOR, "Renamed").with_output(weather());
    handle(
        &service,
        SosRequest::UpdateSensor {
            procedure: SENSOR.into(),
            procedure_description: updated,
            procedure_description_format: None,
        },
    )
    .unwrap();
    match describe(&service, SENSOR).unwrap() {
        SosResponse::SensorDescription(d) => assert_eq!(d.name, "Renamed"),
        other => panic!("unexpected {:?}", other),
    }
    let hub = modules.hub_config();
    assert_eq!(hub.sensors[0].description.as_ref().unwrap().name, "Renamed");

    // a description of another procedure is refused
    let err = handle(
        &service,
        SosRequest::UpdateSensor {
            procedure: SENSOR.into(),
            procedure_description: ProcedureDescription::new("urn:test:sensor:002", "Other"),
            procedure_description_format: None,
        },
    )
    .unwrap_err();
    assert!(validation_report(err).has_locator("procedureDescription"));
}

fn storage_service() -> SosService {
    let storage = Arc::new(MemoryObsStorage::new("db"));
    storage.add_data_store("weather", weather(), DataEncoding::text()).unwrap();
    storage
        .store_description(ProcedureDescription::new("urn:test:storage:001", "Archive").with_output(weather()))
        .unwrap();
    let first = datetime_to_epoch(Utc.with_ymd_and_hms(2010, 5, 15, 0, 0, 0).unwrap());
    let last = datetime_to_epoch(Utc.with_ymd_and_hms(2010, 9, 23, 0, 0, 0).unwrap());
    for t in [first, (first + last) / 2.0, last] {
        storage
            .store_record(
                "weather",
                DataKey::new(None, t),
                DataBlock::new(vec![DataValue::Time(t), DataValue::Double(12.0)]),
            )
            .unwrap();
    }

    let modules = Arc::new(LocalModuleRegistry::in_memory());
    modules.add_storage(storage);
    let config = SosServiceConfig {
        data_providers: vec![ProviderConfig::Storage(StorageProviderConfig {
            uri: "urn:test:storage-sos".into(),
            name: None,
            enabled: true,
            storage_id: "db".into(),
            hidden_outputs: Vec::new(),
        })],
        ..transactional_config()
    };
    let service = SosService::new(config, modules);
    service.start();
    service
}

fn get_result(service: &SosService, time: &str) -> Result<SosResponse> {
    handle(
        service,
        SosRequest::GetResult {
            offering: "urn:test:storage-sos".into(),
            observed_properties: Vec::new(),
            procedures: Vec::new(),
            temporal_filter: Some(time.parse::<TimeExtent>().unwrap()),
            response_format: None,
        },
    )
}

#[test]
fn test_storage_time_extent() {
    let service = storage_service();
    let caps = service
        .snapshot()
        .lookup_offering("urn:test:storage-sos")
        .unwrap()
        .clone();
    assert_eq!(
        caps.phenomenon_time.to_iso_string(),
        "2010-05-15T00:00:00Z/2010-09-23T00:00:00Z"
    );

    match get_result(&service, "2010-06-01T00:00:00Z/2010-09-30T00:00:00Z").unwrap() {
        SosResponse::ResultStream(summary) => assert_eq!(summary.records, 2),
        other => panic!("unexpected {:?}", other),
    }

    assert!(get_result(&service, "2010-06-01").is_ok());
    let report = validation_report(get_result(&service, "2011-01-01").unwrap_err());
    assert!(report.has_locator("phenomenonTime"));
    let report = validation_report(get_result(&service, "now").unwrap_err());
    assert!(report.has_locator("phenomenonTime"));
}

#[test]
fn test_storage_offering_has_no_consumer() {
    let service = storage_service();
    let err = handle(
        &service,
        SosRequest::InsertObservation {
            offering: "urn:test:storage-sos".into(),
            observations: Vec::new(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, SosError::NoConsumer(_)));
}

#[test]
fn test_get_result_collects_violations() {
    let service = storage_service();
    let err = handle(
        &service,
        SosRequest::GetResult {
            offering: "urn:test:storage-sos".into(),
            observed_properties: vec!["urn:unknown:property".into()],
            procedures: vec!["urn:unknown:procedure".into()],
            temporal_filter: None,
            response_format: None,
        },
    )
    .unwrap_err();
    let report = validation_report(err);
    assert_eq!(report.len(), 2);
    assert!(report.has_locator("observedProperty"));
    assert!(report.has_locator("procedure"));
}

#[test]
fn test_get_result_response_format() {
    let service = storage_service();
    let request = |format: &str, observed: Vec<String>| SosRequest::GetResult {
        offering: "urn:test:storage-sos".into(),
        observed_properties: observed,
        procedures: Vec::new(),
        temporal_filter: None,
        response_format: Some(format.to_string()),
    };

    let err = handle(
        &service,
        request("application/x-netcdf", vec!["urn:unknown:property".into()]),
    )
    .unwrap_err();
    let report = validation_report(err);
    assert_eq!(report.len(), 2);
    assert!(report.has_locator("responseFormat"));
    assert!(report.has_locator("observedProperty"));

    assert!(handle(&service, request(crate::model::RESULT_FORMAT_SWE, Vec::new())).is_ok());
}

#[test]
fn test_stop_and_reload() {
    let service = storage_service();
    assert!(service.is_started());
    service.stop();
    assert!(!service.is_started());
    assert!(service.snapshot().offerings().is_empty());

    let doc = service.reload_config(service.config());
    assert_eq!(doc.layers.len(), 1);
    assert_eq!(doc.profiles.len(), 5);
}
