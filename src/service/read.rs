// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! GetCapabilities, DescribeSensor and GetResult

use super::{SosResponse, SosService};
use crate::error::Result;
use crate::model::DataFilter;
use crate::streaming::{self, ResponseSink};
use crate::time::TimeExtent;
use crate::validation::{self, ExceptionReport};

impl SosService {
    pub(super) fn get_capabilities(&self) -> Result<SosResponse> {
        let doc = self.registry.refresh_capabilities();
        Ok(SosResponse::Capabilities((*doc).clone()))
    }

    pub(super) fn describe_sensor(
        &self,
        procedure: &str,
        format: Option<&str>,
        valid_time: Option<TimeExtent>,
    ) -> Result<SosResponse> {
        let snapshot = self.registry.snapshot();
        let mut report = ExceptionReport::new();
        let offering = validation::check_procedure(&snapshot, procedure, &mut report);
        let caps = offering
            .as_deref()
            .and_then(|o| snapshot.lookup_offering(o).ok());
        validation::check_procedure_format(&snapshot, caps, format, &mut report);
        report.process()?;

        let offering = offering.unwrap_or_default();
        let factory = snapshot.provider(&offering)?;
        let at = valid_time.filter(|t| !t.is_base_at_now()).map(|t| t.resolve().0);
        let description = factory.generate_procedure_description(at)?;
        Ok(SosResponse::SensorDescription(description))
    }

    pub(super) fn get_result(
        &self,
        offering: &str,
        observables: Vec<String>,
        procedures: Vec<String>,
        time: Option<TimeExtent>,
        format: Option<&str>,
        sink: &mut dyn ResponseSink,
    ) -> Result<SosResponse> {
        let snapshot = self.registry.snapshot();
        let mut report = ExceptionReport::new();
        if let Some(caps) = validation::check_offering(&snapshot, offering, &mut report) {
            validation::check_observables(caps, &observables, &mut report);
            validation::check_procedures(caps, &procedures, &mut report);
            if let Some(format) = format {
                validation::check_response_format(caps, format, &mut report);
            }
            if let Some(requested) = &time {
                validation::check_time(&self.registry, offering, requested, &mut report);
            }
        }
        report.process()?;

        let factory = snapshot.provider(offering)?;
        let filter = DataFilter {
            offering: offering.to_string(),
            procedures,
            observables,
            time,
        };
        let provider = factory.new_provider(&filter)?;
        let summary = streaming::write_result_stream(provider, sink)?;
        log::debug!("GetResult on {} streamed {} record(s)", offering, summary.records);
        Ok(SosResponse::ResultStream(summary))
    }
}
