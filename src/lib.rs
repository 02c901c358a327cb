// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! SensorHub SOS: Sensor Observation Service hub
//!
//! Serves live virtual sensors and observation storages as uniform SOS
//! offerings. Each offering is backed by a [`DataProviderFactory`] for reads
//! and optionally by a [`DataConsumer`] accepting transactional inserts.
//!
//! ```no_run
//! use std::sync::Arc;
//! use soshub::config::HubConfig;
//! use soshub::modules::LocalModuleRegistry;
//! use soshub::SosService;
//!
//! # fn main() -> soshub::Result<()> {
//! let hub = HubConfig::from_toml_file("soshub.toml")?;
//! let sos = hub.sos.clone();
//! let modules = Arc::new(LocalModuleRegistry::new(hub, None)?);
//! let service = SosService::new(sos, modules);
//! let capabilities = service.start();
//! println!("{} offering(s)", capabilities.layers.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http_server;
pub mod model;
pub mod modules;
pub mod provider;
pub mod registry;
pub mod service;
pub mod streaming;
pub mod swe;
pub mod time;
pub mod validation;

#[cfg(test)]
mod testing;

pub use config::{HubConfig, SosServiceConfig};
pub use error::{Result, SosError};
pub use provider::{DataConsumer, DataProvider, DataProviderFactory, ModuleRegistry};
pub use registry::OfferingRegistry;
pub use service::{SosRequest, SosResponse, SosService};
pub use time::TimeExtent;
