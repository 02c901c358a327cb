// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Offering registry and capabilities cache
//!
//! All registry state lives in one immutable [`RegistrySnapshot`] held in an
//! `ArcSwap`. Readers take a snapshot with a lock-free load and keep working
//! on it even if a workflow publishes a new one meanwhile. Writers build a
//! modified copy and publish it in a single swap, serialized by `writer`.
//!
//! Invariant: every layer of the capabilities document has exactly one
//! procedure index entry pointing at it, and every procedure index entry
//! points at a layer.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SosServiceConfig;
use crate::error::{Result, SosError};
use crate::model::{profile, CapabilitiesDocument, OfferingCapabilities, ServiceIdentification};
use crate::provider::{DataConsumer, DataProviderFactory, ModuleRegistry};
use crate::swe::{DataComponent, DataEncoding};
use crate::validation::{ExceptionReport, Violation};

/// Result template bound to an offering
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateBinding {
    pub offering: String,
    pub structure: DataComponent,
    pub encoding: DataEncoding,
}

/// Immutable registry state
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    capabilities: Arc<CapabilitiesDocument>,
    /// procedure id -> offering id
    procedure_index: HashMap<String, String>,
    templates: HashMap<String, TemplateBinding>,
    /// offering id -> factory
    providers: HashMap<String, Arc<dyn DataProviderFactory>>,
    /// offering id -> consumer
    consumers: HashMap<String, Arc<dyn DataConsumer>>,
}

impl std::fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("offerings", &self.capabilities.layers.len())
            .field("procedures", &self.procedure_index)
            .field("templates", &self.templates.keys().collect::<Vec<_>>())
            .field("consumers", &self.consumers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RegistrySnapshot {
    pub fn capabilities(&self) -> &Arc<CapabilitiesDocument> {
        &self.capabilities
    }

    pub fn offerings(&self) -> &[OfferingCapabilities] {
        &self.capabilities.layers
    }

    pub fn lookup_offering(&self, offering: &str) -> Result<&OfferingCapabilities> {
        self.capabilities
            .layer(offering)
            .ok_or_else(|| SosError::not_found("offering", offering))
    }

    pub fn lookup_by_procedure(&self, procedure: &str) -> Result<&str> {
        self.procedure_index
            .get(procedure)
            .map(String::as_str)
            .ok_or_else(|| SosError::not_found("procedure", procedure))
    }

    pub fn lookup_by_template(&self, template: &str) -> Result<&TemplateBinding> {
        self.templates
            .get(template)
            .ok_or_else(|| SosError::not_found("template", template))
    }

    pub fn has_procedure(&self, procedure: &str) -> bool {
        self.procedure_index.contains_key(procedure)
    }

    pub fn procedures(&self) -> impl Iterator<Item = &str> {
        self.procedure_index.keys().map(String::as_str)
    }

    pub fn provider(&self, offering: &str) -> Result<Arc<dyn DataProviderFactory>> {
        self.providers
            .get(offering)
            .cloned()
            .ok_or_else(|| SosError::not_found("offering", offering))
    }

    pub fn consumer(&self, offering: &str) -> Option<Arc<dyn DataConsumer>> {
        self.consumers.get(offering).cloned()
    }

    /// Consumer of an existing offering; `NoConsumer` when none is bound
    pub fn consumer_for(&self, offering: &str) -> Result<Arc<dyn DataConsumer>> {
        self.lookup_offering(offering)?;
        self.consumer(offering)
            .ok_or_else(|| SosError::NoConsumer(offering.to_string()))
    }

    fn insert_layer(
        &mut self,
        caps: OfferingCapabilities,
        provider: Arc<dyn DataProviderFactory>,
    ) -> Result<()> {
        let procedure = caps
            .main_procedure()
            .ok_or_else(|| {
                SosError::Backend(format!("Offering {} declares no procedure", caps.identifier))
            })?
            .to_string();
        if let Some(existing) = self.procedure_index.get(&procedure) {
            return Err(already_registered(&procedure, existing));
        }
        if self.capabilities.layer(&caps.identifier).is_some() {
            return Err(already_registered(&procedure, &caps.identifier));
        }
        self.procedure_index.insert(procedure, caps.identifier.clone());
        self.providers.insert(caps.identifier.clone(), provider);
        self.capabilities = Arc::new(self.capabilities.with_layer(caps));
        Ok(())
    }
}

fn already_registered(procedure: &str, offering: &str) -> SosError {
    SosError::Validation(ExceptionReport::single(
        Violation::invalid("procedureDescription", Some(procedure))
            .with_message(format!("Procedure {} is already served by offering {}", procedure, offering)),
    ))
}

/// What `unregister_offering` removed
pub struct RemovedOffering {
    pub offering: OfferingCapabilities,
    pub provider: Option<Arc<dyn DataProviderFactory>>,
    pub consumer: Option<Arc<dyn DataConsumer>>,
    pub templates: Vec<String>,
}

/// Base document built from the service configuration
pub fn base_document(config: &SosServiceConfig) -> CapabilitiesDocument {
    let info = &config.capabilities_info;
    let mut profiles = vec![profile::RESULT_RETRIEVAL.to_string()];
    if config.enable_transactional {
        profiles.extend(
            [
                profile::RESULT_INSERTION,
                profile::OBSERVATION_INSERTION,
                profile::SENSOR_INSERTION,
                profile::SENSOR_DELETION,
            ]
            .map(String::from),
        );
    }
    CapabilitiesDocument {
        identification: ServiceIdentification {
            title: info.title.clone(),
            description: info.description.clone(),
        },
        fees: info.fees.clone(),
        access_constraints: info.access_constraints.clone(),
        service_provider: info.service_provider.clone(),
        profiles,
        layers: Vec::new(),
    }
}

/// Owner of the current registry snapshot
pub struct OfferingRegistry {
    current: ArcSwap<RegistrySnapshot>,
    writer: Mutex<()>,
}

impl Default for OfferingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OfferingRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Current snapshot (lock-free)
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Rebuild every index and the document from configuration
    pub fn rebuild(
        &self,
        config: &SosServiceConfig,
        modules: &dyn ModuleRegistry,
    ) -> Arc<CapabilitiesDocument> {
        let _guard = self.writer.lock();
        let mut next = RegistrySnapshot {
            capabilities: Arc::new(base_document(config)),
            ..Default::default()
        };

        for provider_config in config.data_providers.iter().filter(|p| p.enabled()) {
            let uri = provider_config.uri();
            let factory = match modules.provider_factory(provider_config) {
                Ok(f) => f,
                Err(e) => {
                    log::error!("Error while initializing provider {}: {}", uri, e);
                    continue;
                }
            };
            if !factory.is_enabled() {
                log::debug!("Provider {} is disabled, skipping", uri);
                continue;
            }
            let inserted = factory
                .generate_capabilities()
                .and_then(|caps| next.insert_layer(caps, factory.clone()));
            if let Err(e) = inserted {
                log::error!("Error while generating capabilities for provider {}: {}", uri, e);
                factory.cleanup();
            }
        }

        for consumer_config in &config.data_consumers {
            match modules.consumer_module(&consumer_config.module_id) {
                Ok(consumer) => {
                    next.consumers.insert(consumer_config.offering.clone(), consumer);
                }
                Err(e) => log::error!(
                    "Error while initializing consumer {}: {}",
                    consumer_config.offering,
                    e
                ),
            }
        }

        let doc = next.capabilities.clone();
        let previous = self.current.swap(Arc::new(next));
        let current = self.current.load();
        for (offering, factory) in &previous.providers {
            let kept = current
                .providers
                .get(offering)
                .is_some_and(|f| Arc::ptr_eq(f, factory));
            if !kept {
                factory.cleanup();
            }
        }
        log::info!("Capabilities rebuilt with {} offering(s)", doc.layers.len());
        doc
    }

    /// Publish a new offering, its provider and optional consumer in one swap
    pub fn register_offering(
        &self,
        caps: OfferingCapabilities,
        consumer: Option<Arc<dyn DataConsumer>>,
        provider: Arc<dyn DataProviderFactory>,
    ) -> Result<()> {
        let _guard = self.writer.lock();
        let mut next = (**self.current.load()).clone();
        let offering = caps.identifier.clone();
        next.insert_layer(caps, provider)?;
        if let Some(consumer) = consumer {
            next.consumers.insert(offering.clone(), consumer);
        }
        self.current.store(Arc::new(next));
        log::info!("Offering {} registered", offering);
        Ok(())
    }

    /// Remove the offering serving `procedure` with everything bound to it
    pub fn unregister_offering(&self, procedure: &str) -> Result<RemovedOffering> {
        let _guard = self.writer.lock();
        let mut next = (**self.current.load()).clone();
        let offering_id = next
            .procedure_index
            .remove(procedure)
            .ok_or_else(|| SosError::not_found("procedure", procedure))?;
        let offering = next.lookup_offering(&offering_id)?.clone();
        let provider = next.providers.remove(&offering_id);
        let consumer = next.consumers.remove(&offering_id);
        let templates: Vec<String> = next
            .templates
            .iter()
            .filter(|(_, b)| b.offering == offering_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &templates {
            next.templates.remove(id);
        }
        next.capabilities = Arc::new(next.capabilities.without_layer(&offering_id));
        self.current.store(Arc::new(next));
        log::info!("Offering {} unregistered", offering_id);
        Ok(RemovedOffering {
            offering,
            provider,
            consumer,
            templates,
        })
    }

    /// Bind a result template id to an offering
    pub fn register_template(&self, template: &str, binding: TemplateBinding) -> Result<()> {
        let _guard = self.writer.lock();
        let current = self.current.load();
        current.lookup_offering(&binding.offering)?;
        if let Some(existing) = current.templates.get(template) {
            if existing.offering != binding.offering {
                return Err(SosError::Backend(format!(
                    "Template {} is already bound to offering {}",
                    template, existing.offering
                )));
            }
            if *existing == binding {
                return Ok(());
            }
        }
        let mut next = (**current).clone();
        next.templates.insert(template.to_string(), binding);
        self.current.store(Arc::new(next));
        log::debug!("Result template {} registered", template);
        Ok(())
    }

    /// Refresh one offering's metadata from its factory (best effort)
    ///
    /// Returns the refreshed metadata, or the cached one if the factory failed.
    pub fn refresh_offering(&self, offering: &str) -> Result<OfferingCapabilities> {
        let snapshot = self.snapshot();
        let cached = snapshot.lookup_offering(offering)?.clone();
        let factory = snapshot.provider(offering)?;
        let refreshed = match factory.update_capabilities() {
            Ok(caps) if caps.identifier == cached.identifier && caps.procedures == cached.procedures => caps,
            Ok(_) => {
                log::warn!("Provider {} changed its offering identity, ignoring refresh", offering);
                return Ok(cached);
            }
            Err(e) => {
                log::warn!("Error while updating capabilities of {}: {}", offering, e);
                return Ok(cached);
            }
        };
        if refreshed != cached {
            let _guard = self.writer.lock();
            let current = self.current.load();
            let same_provider = current
                .providers
                .get(offering)
                .is_some_and(|f| Arc::ptr_eq(f, &factory));
            if same_provider {
                let mut next = (**current).clone();
                next.capabilities = Arc::new(next.capabilities.with_replaced_layer(refreshed.clone()));
                self.current.store(Arc::new(next));
            }
        }
        Ok(refreshed)
    }

    /// Refresh every offering's metadata (best effort)
    pub fn refresh_capabilities(&self) -> Arc<CapabilitiesDocument> {
        let offerings: Vec<String> = self
            .snapshot()
            .offerings()
            .iter()
            .map(|o| o.identifier.clone())
            .collect();
        for offering in offerings {
            // An offering deleted meanwhile is simply skipped
            let _ = self.refresh_offering(&offering);
        }
        self.snapshot().capabilities.clone()
    }

    /// Drop every offering and clean up their factories
    pub fn clear(&self) {
        let _guard = self.writer.lock();
        let previous = self.current.swap(Arc::new(RegistrySnapshot::default()));
        for factory in previous.providers.values() {
            factory.cleanup();
        }
    }
}
