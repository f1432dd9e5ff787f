//! Scheme to factory resolution.
//!
//! A [`Registry`] keeps two layers:
//! - a snapshot of discovered factories, taken from a [`Discovery`] at
//!   construction and again on every [`reload`](Registry::reload);
//! - explicit overrides added with [`register_service`](Registry::register_service).
//!
//! Overrides win over discovered factories claiming the same scheme.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::core::{ContainerReader, ContainerWriter, Result};
use crate::error::VdmError;
use crate::factory::{ContainerFactory, Descriptor, DirFactory, ZipFactory};

/// Supplies the set of installed factories. How they are found is up to the implementation.
pub trait Discovery: Send + Sync {
    fn discover(&self) -> Vec<Arc<dyn ContainerFactory>>;
}

impl<F> Discovery for F
where
    F: Fn() -> Vec<Arc<dyn ContainerFactory>> + Send + Sync,
{
    fn discover(&self) -> Vec<Arc<dyn ContainerFactory>> {
        self()
    }
}

/// The backends compiled into this crate: `dir` and `zip`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinDiscovery;

impl Discovery for BuiltinDiscovery {
    fn discover(&self) -> Vec<Arc<dyn ContainerFactory>> {
        vec![Arc::new(DirFactory), Arc::new(ZipFactory)]
    }
}

type Snapshot = Arc<[Arc<dyn ContainerFactory>]>;

pub struct Registry {
    discovery: Box<dyn Discovery>,
    discovered: RwLock<Snapshot>,
    overrides: RwLock<HashMap<String, Arc<dyn ContainerFactory>>>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    pub fn new(discovery: Box<dyn Discovery>) -> Self {
        let discovered: Snapshot = discovery.discover().into();
        debug!(factories = discovered.len(), "registry created");
        Self {
            discovery,
            discovered: RwLock::new(discovered),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry, built with [`BuiltinDiscovery`] on first use.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| Registry::new(Box::new(BuiltinDiscovery)))
    }

    /// Adds or replaces the override for `scheme`. Returns the previous override.
    pub fn register_service(
        &self,
        scheme: &str,
        factory: Arc<dyn ContainerFactory>,
    ) -> Option<Arc<dyn ContainerFactory>> {
        info!(scheme, "factory registered");
        self.overrides.write().insert(scheme.to_string(), factory)
    }

    pub fn remove_service(&self, scheme: &str) -> Option<Arc<dyn ContainerFactory>> {
        let removed = self.overrides.write().remove(scheme);
        if removed.is_some() {
            info!(scheme, "factory removed");
        }
        removed
    }

    /// Asks the discovery for a fresh snapshot. Overrides are kept.
    pub fn reload(&self) {
        let discovered: Snapshot = self.discovery.discover().into();
        debug!(factories = discovered.len(), "registry reloaded");
        *self.discovered.write() = discovered;
    }

    /// Drops every override and reloads the discovered factories.
    pub fn reset(&self) {
        self.overrides.write().clear();
        self.reload();
    }

    pub fn service(&self, scheme: &str) -> Result<Arc<dyn ContainerFactory>> {
        if let Some(factory) = self.overrides.read().get(scheme) {
            return Ok(factory.clone());
        }
        let discovered = self.discovered.read().clone();
        discovered
            .iter()
            .find(|factory| factory.supports(scheme))
            .cloned()
            .ok_or_else(|| VdmError::not_found(format!("scheme `{scheme}`")))
    }

    pub fn reader(&self, scheme: &str, descriptor: impl Into<Descriptor>) -> Result<Box<dyn ContainerReader>> {
        self.service(scheme)?.reader(descriptor.into())
    }

    pub fn writer(&self, scheme: &str, descriptor: impl Into<Descriptor>) -> Result<Box<dyn ContainerWriter>> {
        self.service(scheme)?.writer(descriptor.into())
    }

    /// Every resolvable scheme, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: BTreeSet<String> = self.overrides.read().keys().cloned().collect();
        for factory in self.discovered.read().iter() {
            schemes.extend(factory.schemes().iter().map(|s| s.to_string()));
        }
        schemes.into_iter().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new(Box::new(BuiltinDiscovery))
    }
}
