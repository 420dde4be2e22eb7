// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Builds a factory from a type name.
//!
//! The caller's scope is searched first so hosts can substitute
//! implementations; the resolver's own registry is the fallback, which keeps
//! the default factory reachable from every scope. A type found in the scope
//! but compiled against another copy of the contract is rejected outright.

use crate::diagnostics::Diagnostics;
use crate::error::ConfigurationError;
use crate::factory::LogFactory;
use crate::plugin::{ContractId, PluginEntry};
use crate::scope::{IsolationScope, ScopeId};
use std::sync::Arc;

pub(crate) struct Instantiator<'a> {
    own_scope: &'a IsolationScope,
    contract: &'a ContractId,
    diagnostics: &'a Diagnostics,
}

impl<'a> Instantiator<'a> {
    pub(crate) fn new(
        own_scope: &'a IsolationScope,
        contract: &'a ContractId,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            own_scope,
            contract,
            diagnostics,
        }
    }

    /// Looks `type_name` up in `scope` (when allowed), then in the resolver's
    /// own registry, and constructs it.
    pub(crate) fn instantiate(
        &self,
        type_name: &str,
        scope: Option<&IsolationScope>,
        use_scope_namespace: bool,
    ) -> Result<Arc<dyn LogFactory>, ConfigurationError> {
        let diagnostics = self.diagnostics;

        if let Some(scope) = scope.filter(|_| use_scope_namespace) {
            if let Some((provider, entry)) = scope.find_plugin(type_name) {
                self.check_contract(&entry, &provider, scope)?;
                diagnostics.log_with(|| format!("Loaded type {type_name} from scope {provider}"));
                return self.construct(&entry);
            }
            diagnostics.log_with(|| {
                format!(
                    "Unable to load factory type '{type_name}' via scope {} - trying the registry of this resolver.",
                    scope.id()
                )
            });
        }

        match self.own_scope.find_plugin(type_name) {
            Some((provider, entry)) => {
                self.check_contract(&entry, &provider, self.own_scope)?;
                self.construct(&entry)
            }
            None => {
                diagnostics.log_with(|| {
                    format!(
                        "Unable to locate any type called '{type_name}' via scope {}",
                        self.own_scope.id()
                    )
                });
                Err(ConfigurationError::TypeNotFound {
                    type_name: type_name.to_string(),
                    searched: searched(scope.filter(|_| use_scope_namespace), self.own_scope),
                })
            }
        }
    }

    fn check_contract(
        &self,
        entry: &PluginEntry,
        provider: &ScopeId,
        scope: &IsolationScope,
    ) -> Result<(), ConfigurationError> {
        let found = entry.contract();
        if found == self.contract {
            return Ok(());
        }

        let diagnostics = self.diagnostics;
        diagnostics.log_with(|| {
            format!(
                "Factory type {} loaded from scope {provider} implements {found}, not {} as seen by this resolver.",
                entry.type_name(),
                self.contract
            )
        });
        diagnostics.log_with(|| format!("[BAD SCOPE TREE] {}", scope.describe_ancestry()));

        let type_name = entry.type_name().to_string();
        let expected = self.contract.clone();
        let found = found.clone();
        if found.same_name(&expected) {
            diagnostics.log_with(|| {
                format!("[CUSTOM LOG FACTORY] {type_name} implements the factory contract but was loaded through an incompatible scope.")
            });
            Err(ConfigurationError::IncompatibleContract {
                type_name,
                found,
                expected,
            })
        } else {
            diagnostics.log_with(|| {
                format!("[CUSTOM LOG FACTORY] {type_name} does not implement the factory contract.")
            });
            Err(ConfigurationError::NotAFactory {
                type_name,
                found,
                expected,
            })
        }
    }

    fn construct(&self, entry: &PluginEntry) -> Result<Arc<dyn LogFactory>, ConfigurationError> {
        entry.construct().map_err(|source| {
            self.diagnostics.log("Unable to create factory instance.");
            ConfigurationError::Construction {
                type_name: entry.type_name().to_string(),
                source,
            }
        })
    }
}

fn searched(scope: Option<&IsolationScope>, own_scope: &IsolationScope) -> String {
    match scope {
        Some(scope) => format!("scope {} or {}", scope.id(), own_scope.id()),
        None => format!("scope {}", own_scope.id()),
    }
}
