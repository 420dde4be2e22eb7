// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The backend contract returned by the resolver, and its default implementation.

use crate::config::FACTORY_DEFAULT;
use crate::error::ConfigurationError;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// A named handle to a logging backend.
pub trait Log: Send + Sync + Debug {
    fn name(&self) -> &str;
}

pub type LogHandle = Arc<dyn Log>;

/// Factory for [`Log`] handles; one instance is cached per isolation scope.
pub trait LogFactory: Send + Sync + Debug {
    /// Name the factory was registered under.
    fn type_name(&self) -> &str;

    fn attribute(&self, name: &str) -> Option<String>;

    fn attribute_names(&self) -> Vec<String>;

    fn set_attribute(&self, name: &str, value: &str);

    fn remove_attribute(&self, name: &str);

    /// Returns the handle for `name`, creating it when needed.
    fn instance(&self, name: &str) -> Result<LogHandle, ConfigurationError>;

    /// Teardown hook called when the factory is evicted from the cache.
    fn release(&self);
}

/// Configuration attributes of a factory, sorted by name.
#[derive(Debug, Default)]
pub struct Attributes(RwLock<BTreeMap<String, String>>);

impl Attributes {
    pub fn get(&self, name: &str) -> Option<String> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn set(&self, name: &str, value: &str) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }

    pub fn remove(&self, name: &str) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}

#[derive(Debug)]
pub struct NamedLog {
    name: String,
}

impl Log for NamedLog {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory used when no source names another one. Hands out one handle per
/// name until released.
#[derive(Debug, Default)]
pub struct DefaultLogFactory {
    attributes: Attributes,
    instances: Mutex<HashMap<String, LogHandle>>,
}

impl DefaultLogFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_instances(&self) -> usize {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LogFactory for DefaultLogFactory {
    fn type_name(&self) -> &str {
        FACTORY_DEFAULT
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name)
    }

    fn attribute_names(&self) -> Vec<String> {
        self.attributes.names()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.attributes.set(name, value);
    }

    fn remove_attribute(&self, name: &str) {
        self.attributes.remove(name);
    }

    fn instance(&self, name: &str) -> Result<LogHandle, ConfigurationError> {
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let handle = instances.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!("Creating log instance {name}");
            Arc::new(NamedLog {
                name: name.to_string(),
            })
        });
        Ok(Arc::clone(handle))
    }

    fn release(&self) {
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tracing::debug!("Releasing {} cached log instances", instances.len());
        instances.clear();
    }
}
