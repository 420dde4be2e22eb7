// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Registry of factory constructors keyed by type name.
//!
//! Each isolation scope owns one registry, and so does every resolver. Hosts
//! that load plugins across a module boundary register them with the
//! [`ContractId`] the plugin was built against, which lets the instantiator
//! detect a plugin compiled against another copy of the factory contract.

use crate::error::BoxError;
use crate::factory::LogFactory;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

const CONTRACT_NAME: &str = "logfactory::LogFactory";

/// Identifies one copy of the factory contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContractId {
    name: Cow<'static, str>,
    build: Cow<'static, str>,
}

impl ContractId {
    /// The contract as compiled into this crate.
    pub const fn current() -> Self {
        Self {
            name: Cow::Borrowed(CONTRACT_NAME),
            build: Cow::Borrowed(env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn new(name: impl Into<String>, build: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            build: Cow::Owned(build.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(&self) -> &str {
        &self.build
    }

    /// Same contract name, possibly from a different copy.
    pub fn same_name(&self, other: &ContractId) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.name, self.build)
    }
}

pub type FactoryConstructor =
    Arc<dyn Fn() -> Result<Arc<dyn LogFactory>, BoxError> + Send + Sync>;

/// A registered factory type.
#[derive(Clone)]
pub struct PluginEntry {
    type_name: String,
    contract: ContractId,
    constructor: FactoryConstructor,
}

impl PluginEntry {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn contract(&self) -> &ContractId {
        &self.contract
    }

    pub fn construct(&self) -> Result<Arc<dyn LogFactory>, BoxError> {
        (self.constructor)()
    }
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry")
            .field("type_name", &self.type_name)
            .field("contract", &self.contract)
            .finish()
    }
}

/// Shared, cloneable map from type name to constructor.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    entries: Arc<RwLock<HashMap<String, PluginEntry>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor built against this crate's contract. Returns
    /// the entry it replaced, if any.
    pub fn register<F>(&self, type_name: &str, constructor: F) -> Option<PluginEntry>
    where
        F: Fn() -> Result<Arc<dyn LogFactory>, BoxError> + Send + Sync + 'static,
    {
        self.register_with_contract(type_name, ContractId::current(), constructor)
    }

    pub fn register_with_contract<F>(
        &self,
        type_name: &str,
        contract: ContractId,
        constructor: F,
    ) -> Option<PluginEntry>
    where
        F: Fn() -> Result<Arc<dyn LogFactory>, BoxError> + Send + Sync + 'static,
    {
        let entry = PluginEntry {
            type_name: type_name.to_string(),
            contract,
            constructor: Arc::new(constructor),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_name.to_string(), entry)
    }

    /// Registers only when nothing is registered under `type_name` yet.
    pub fn register_if_absent<F>(&self, type_name: &str, constructor: F) -> bool
    where
        F: Fn() -> Result<Arc<dyn LogFactory>, BoxError> + Send + Sync + 'static,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(type_name) {
            return false;
        }
        entries.insert(
            type_name.to_string(),
            PluginEntry {
                type_name: type_name.to_string(),
                contract: ContractId::current(),
                constructor: Arc::new(constructor),
            },
        );
        true
    }

    pub fn get(&self, type_name: &str) -> Option<PluginEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(type_name)
    }

    /// Registered names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<String>>();
        names.sort();
        names
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
