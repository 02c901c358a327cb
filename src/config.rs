// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Hub configuration
//!
//! One TOML file holds the HTTP server section, the SOS service section
//! (providers, consumers, transactional flag) and the modules the local
//! module registry creates at start-up. InsertSensor/DeleteSensor write the
//! file back through [`crate::ModuleRegistry::save_configuration`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SosError};
use crate::model::ProcedureDescription;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body in bytes
    #[serde(default = "max_body_default")]
    pub max_body_size: usize,
    /// Log every request at info level
    #[serde(default = "enabled_default")]
    pub request_logging: bool,
}

fn max_body_default() -> usize {
    4 * 1_048_576
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8181,
            max_body_size: max_body_default(),
            request_logging: true,
        }
    }
}

/// Service identification published in the capabilities document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitiesInfo {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "none_string")]
    pub fees: String,
    #[serde(default)]
    pub access_constraints: Vec<String>,
    #[serde(default)]
    pub service_provider: String,
}

fn none_string() -> String {
    "NONE".into()
}

impl Default for CapabilitiesInfo {
    fn default() -> Self {
        Self {
            title: "SensorHub SOS".into(),
            description: "Sensor Observation Service".into(),
            fees: none_string(),
            access_constraints: vec![none_string()],
            service_provider: String::new(),
        }
    }
}

/// Data provider backed by a virtual sensor module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProviderConfig {
    /// Offering identifier
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    pub sensor_id: String,
}

/// Data provider backed by an observation storage module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageProviderConfig {
    /// Offering identifier
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    pub storage_id: String,
    /// Outputs never exposed through the offering
    #[serde(default)]
    pub hidden_outputs: Vec<String>,
}

fn enabled_default() -> bool {
    true
}

/// One data provider entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Sensor(SensorProviderConfig),
    Storage(StorageProviderConfig),
}

impl ProviderConfig {
    pub fn uri(&self) -> &str {
        match self {
            ProviderConfig::Sensor(c) => &c.uri,
            ProviderConfig::Storage(c) => &c.uri,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            ProviderConfig::Sensor(c) => c.enabled,
            ProviderConfig::Storage(c) => c.enabled,
        }
    }

    /// Module backing this provider
    pub fn module_id(&self) -> &str {
        match self {
            ProviderConfig::Sensor(c) => &c.sensor_id,
            ProviderConfig::Storage(c) => &c.storage_id,
        }
    }
}

/// Data consumer entry: offering bound to a consumer module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub offering: String,
    pub module_id: String,
}

/// SOS service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosServiceConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Endpoint path, e.g. `/sos`
    pub endpoint: String,
    #[serde(default)]
    pub enable_transactional: bool,
    #[serde(default)]
    pub capabilities_info: CapabilitiesInfo,
    #[serde(default)]
    pub data_providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub data_consumers: Vec<ConsumerConfig>,
}

impl Default for SosServiceConfig {
    fn default() -> Self {
        Self {
            id: "sos-service".into(),
            name: "SOS Service".into(),
            enabled: true,
            endpoint: "/sos".into(),
            enable_transactional: false,
            capabilities_info: CapabilitiesInfo::default(),
            data_providers: Vec::new(),
            data_consumers: Vec::new(),
        }
    }
}

impl SosServiceConfig {
    pub fn provider(&self, uri: &str) -> Option<&ProviderConfig> {
        self.data_providers.iter().find(|p| p.uri() == uri)
    }

    pub fn consumer(&self, offering: &str) -> Option<&ConsumerConfig> {
        self.data_consumers.iter().find(|c| c.offering == offering)
    }

    /// Drop the provider and consumer entries of `offering`
    pub fn remove_offering(&mut self, offering: &str) {
        self.data_providers.retain(|p| p.uri() != offering);
        self.data_consumers.retain(|c| c.offering != offering);
    }
}

/// Virtual sensor module, created by InsertSensor or declared up front
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualSensorConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub auto_start: bool,
    /// Records kept per output
    #[serde(default = "buffer_default")]
    pub buffer_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<ProcedureDescription>,
}

fn buffer_default() -> usize {
    1024
}

impl VirtualSensorConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            auto_start: false,
            buffer_size: buffer_default(),
            description: None,
        }
    }
}

/// In-memory observation storage module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub id: String,
    pub name: String,
    /// JSON file with data stores loaded at start-up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preload_file: Option<String>,
}

/// Hub configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub sos: SosServiceConfig,
    #[serde(default)]
    pub sensors: Vec<VirtualSensorConfig>,
    #[serde(default)]
    pub storages: Vec<StorageConfig>,
}

impl HubConfig {
    /// Load from TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SosError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SosError::Configuration(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SosError::Configuration(format!("TOML write error: {}", e)))
    }

    /// Write to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Cross-reference checks between sections
    pub fn validate(&self) -> Result<()> {
        if !self.sos.endpoint.starts_with('/') {
            return Err(SosError::Configuration(format!(
                "Endpoint must start with '/': {}",
                self.sos.endpoint
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for provider in &self.sos.data_providers {
            if !seen.insert(provider.uri()) {
                return Err(SosError::Configuration(format!(
                    "Duplicate provider for offering {}",
                    provider.uri()
                )));
            }
            let known = match provider {
                ProviderConfig::Sensor(c) => self.sensors.iter().any(|s| s.id == c.sensor_id),
                ProviderConfig::Storage(c) => self.storages.iter().any(|s| s.id == c.storage_id),
            };
            if !known {
                return Err(SosError::Configuration(format!(
                    "Provider {} references unknown module {}",
                    provider.uri(),
                    provider.module_id()
                )));
            }
        }
        Ok(())
    }

    /// Generate sample config
    pub fn sample_toml() -> String {
        r#"# SensorHub SOS configuration
log_level = "Info"

[server]
host = "0.0.0.0"
port = 8181
max_body_size = 4194304
request_logging = true

[sos]
id = "sos-service"
name = "SOS Service"
endpoint = "/sos"
enable_transactional = true

[sos.capabilities_info]
title = "SensorHub SOS"
description = "Sensor Observation Service"
fees = "NONE"
access_constraints = ["NONE"]
service_provider = "nervosys"

# Historical weather data served from a storage
[[sos.data_providers]]
type = "storage"
uri = "urn:weather:station:01-sos"
name = "Weather station 01"
storage_id = "weather-db"
hidden_outputs = []

[[storages]]
id = "weather-db"
name = "Weather database"
# preload_file = "weather.json"
"#
        .into()
    }
}
