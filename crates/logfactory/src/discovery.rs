// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Gathers the configuration sources that decide which factory type to build.
//!
//! Sources, strongest first: the explicit override setting, the discovery
//! registry resource, the highest priority properties file, the built-in
//! default. Read and parse failures in the discovery registry and properties
//! files are reported to diagnostics and treated as "not found".

use crate::config::{
    ResolverConfig, FACTORY_DEFAULT, FACTORY_ENV, FACTORY_PROPERTIES, FACTORY_PROPERTY,
    PRIORITY_KEY, SERVICE_ID, TCCL_KEY,
};
use crate::diagnostics::Diagnostics;
use crate::properties::Properties;
use crate::scope::IsolationScope;
use serde::Serialize;
use std::fmt;

/// Where a factory type name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeNameSource {
    Override,
    ServiceRegistry,
    PropertiesFile,
    Default,
}

impl fmt::Display for TypeNameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => write!(f, "the {FACTORY_ENV} setting"),
            Self::ServiceRegistry => write!(f, "resource '{SERVICE_ID}'"),
            Self::PropertiesFile => write!(f, "a {FACTORY_PROPERTIES} file"),
            Self::Default => f.write_str("the built-in default"),
        }
    }
}

/// One parsed properties file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSource {
    pub origin: String,
    pub priority: f64,
    pub properties: Properties,
}

impl ConfigSource {
    pub fn type_name(&self) -> Option<&str> {
        self.properties
            .get(FACTORY_PROPERTY)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Whether plugin types may come from the caller's scope. Any value other
    /// than a case-insensitive `true` restricts lookup to the resolver's own
    /// registry.
    pub fn use_scope_namespace(&self) -> bool {
        self.properties
            .get(TCCL_KEY)
            .map_or(true, |value| value.trim().eq_ignore_ascii_case("true"))
    }
}

/// Index of the winning source: highest priority, first one on ties.
pub fn select_source(sources: &[ConfigSource]) -> Option<usize> {
    let mut winner: Option<usize> = None;
    for (index, source) in sources.iter().enumerate() {
        match winner {
            Some(best) if source.priority <= sources[best].priority => {}
            _ => winner = Some(index),
        }
    }
    winner
}

pub(crate) struct Discovery<'a> {
    config: &'a ResolverConfig,
    diagnostics: &'a Diagnostics,
    default_scope: Option<&'a IsolationScope>,
}

impl<'a> Discovery<'a> {
    pub(crate) fn new(config: &'a ResolverConfig, diagnostics: &'a Diagnostics) -> Self {
        Self {
            config,
            diagnostics,
            default_scope: None,
        }
    }

    /// Scope whose namespace is searched when the caller has none.
    pub(crate) fn with_default_scope(mut self, scope: &'a IsolationScope) -> Self {
        self.default_scope = Some(scope);
        self
    }

    fn search_scope<'s>(
        &'s self,
        scope: Option<&'s IsolationScope>,
    ) -> Option<&'s IsolationScope> {
        scope.or(self.default_scope)
    }

    pub(crate) fn factory_override(&self) -> Option<&'a str> {
        let diagnostics = self.diagnostics;
        diagnostics.log_with(|| {
            format!("[LOOKUP] Looking for setting [{FACTORY_ENV}] to define the factory type to use...")
        });
        let name = self.config.factory_override.as_deref();
        if name.is_none() {
            diagnostics.log_with(|| format!("[LOOKUP] No setting [{FACTORY_ENV}] defined."));
        }
        name
    }

    /// First non-blank, non-comment line of the discovery registry resource.
    pub(crate) fn service_entry(&self, scope: Option<&IsolationScope>) -> Option<String> {
        let diagnostics = self.diagnostics;
        diagnostics.log_with(|| {
            format!("[LOOKUP] Looking for a resource file of name [{SERVICE_ID}] to define the factory type to use...")
        });
        let Some(scope) = self.search_scope(scope) else {
            diagnostics.log("[LOOKUP] No scope to search for the discovery registry resource.");
            return None;
        };

        let resource = match scope.find_resource(SERVICE_ID) {
            Ok(Some(resource)) => resource,
            Ok(None) => {
                diagnostics.log_with(|| format!("[LOOKUP] No resource file with name '{SERVICE_ID}' found."));
                return None;
            }
            Err(e) => {
                diagnostics.log_with(|| {
                    format!("[LOOKUP] Unable to read resource '{SERVICE_ID}': [{e}]. Trying alternative implementations...")
                });
                return None;
            }
        };

        let entry = resource
            .contents
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string);
        match &entry {
            Some(name) => diagnostics.log_with(|| {
                format!(
                    "[LOOKUP] Resource '{}' names factory type '{name}'",
                    resource.origin
                )
            }),
            None => diagnostics.log_with(|| {
                format!("[LOOKUP] Resource '{}' names no factory type.", resource.origin)
            }),
        }
        entry
    }

    /// Every readable properties file in search order.
    pub(crate) fn config_sources(&self, scope: Option<&IsolationScope>) -> Vec<ConfigSource> {
        let Some(scope) = self.search_scope(scope) else {
            return Vec::new();
        };
        let diagnostics = self.diagnostics;

        scope
            .find_resources(FACTORY_PROPERTIES)
            .into_iter()
            .filter_map(|found| match found {
                Ok(resource) => Some(resource),
                Err(e) => {
                    diagnostics.log_with(|| {
                        format!("[LOOKUP] Unable to read properties file: [{e}]. Skipping it.")
                    });
                    None
                }
            })
            .filter_map(|resource| match Properties::parse(&resource.contents) {
                Ok(properties) => {
                    let priority = self.priority_of(&resource.origin, &properties);
                    Some(ConfigSource {
                        origin: resource.origin,
                        priority,
                        properties,
                    })
                }
                Err(e) => {
                    diagnostics.log_with(|| {
                        format!("[LOOKUP] Properties file at '{}' is malformed: [{e}]. Skipping it.", resource.origin)
                    });
                    None
                }
            })
            .collect()
    }

    /// The winning properties file, with the reasoning written to diagnostics.
    pub(crate) fn winning_source(&self, sources: Vec<ConfigSource>) -> Option<ConfigSource> {
        let diagnostics = self.diagnostics;
        if diagnostics.enabled() {
            for (index, source) in sources.iter().enumerate() {
                if index == 0 {
                    diagnostics.log(format!(
                        "[LOOKUP] Properties file found at '{}' with priority {}",
                        source.origin, source.priority
                    ));
                    continue;
                }
                let best = select_source(&sources[..index]).map(|best| &sources[best]);
                if let Some(best) = best {
                    let verb = if source.priority > best.priority {
                        "overrides"
                    } else {
                        "does not override"
                    };
                    diagnostics.log(format!(
                        "[LOOKUP] Properties file at '{}' with priority {} {verb} file at '{}' with priority {}",
                        source.origin, source.priority, best.origin, best.priority
                    ));
                }
            }
        }

        let winner = select_source(&sources).and_then(|index| sources.into_iter().nth(index));
        match &winner {
            Some(source) => diagnostics.log_with(|| {
                format!(
                    "[LOOKUP] Properties file of name '{FACTORY_PROPERTIES}' found at '{}'",
                    source.origin
                )
            }),
            None => diagnostics.log_with(|| {
                format!("[LOOKUP] No properties file of name '{FACTORY_PROPERTIES}' found.")
            }),
        }
        winner
    }

    pub(crate) fn properties_entry<'s>(&self, winner: Option<&'s ConfigSource>) -> Option<&'s str> {
        let diagnostics = self.diagnostics;
        let Some(source) = winner else {
            diagnostics.log("[LOOKUP] No properties file available to determine the factory type from.");
            return None;
        };
        diagnostics.log_with(|| {
            format!("[LOOKUP] Looking in properties file for entry with key '{FACTORY_PROPERTY}' to define the factory type to use...")
        });
        let name = source.type_name();
        match name {
            Some(name) => diagnostics.log_with(|| {
                format!("[LOOKUP] Properties file specifies factory type '{name}'")
            }),
            None => diagnostics
                .log("[LOOKUP] Properties file has no entry specifying the factory type."),
        }
        name
    }

    fn priority_of(&self, origin: &str, properties: &Properties) -> f64 {
        let Some(raw) = properties.get(PRIORITY_KEY) else {
            return 0.0;
        };
        match raw.trim().parse::<f64>() {
            Ok(priority) if !priority.is_nan() => priority,
            _ => {
                self.diagnostics.log_with(|| {
                    format!("[LOOKUP] Properties file at '{origin}' has invalid priority '{raw}'; using 0.0")
                });
                0.0
            }
        }
    }
}

/// Dry-run description of how a scope's factory would be chosen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionPlan {
    /// `None` for the process-wide default scope.
    pub scope: Option<String>,
    pub scope_tree: Option<String>,
    pub sources: Vec<SourceSummary>,
    pub winning_source: Option<String>,
    pub use_scope_namespace: bool,
    pub type_name: String,
    pub type_source: TypeNameSource,
    /// Attributes that would be applied to the factory.
    pub attributes: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub origin: String,
    pub priority: f64,
    pub type_name: Option<String>,
}

impl<'a> Discovery<'a> {
    /// Plans a resolution without instantiating anything. A discovery registry
    /// entry is reported as chosen even though, at resolution time, a type it
    /// names that fails to instantiate falls through to the properties file.
    pub(crate) fn plan(&self, scope: Option<&IsolationScope>) -> ResolutionPlan {
        let sources = self.config_sources(scope);
        let summaries = sources
            .iter()
            .map(|source| SourceSummary {
                origin: source.origin.clone(),
                priority: source.priority,
                type_name: source.type_name().map(str::to_string),
            })
            .collect();
        let winner = self.winning_source(sources);

        let (type_name, type_source) = if let Some(name) = self.factory_override() {
            (name.to_string(), TypeNameSource::Override)
        } else if let Some(name) = self.service_entry(scope) {
            (name, TypeNameSource::ServiceRegistry)
        } else if let Some(name) = self.properties_entry(winner.as_ref()) {
            (name.to_string(), TypeNameSource::PropertiesFile)
        } else {
            (FACTORY_DEFAULT.to_string(), TypeNameSource::Default)
        };

        ResolutionPlan {
            scope: scope.map(|scope| scope.id().to_string()),
            scope_tree: scope.map(IsolationScope::describe_ancestry),
            sources: summaries,
            winning_source: winner.as_ref().map(|source| source.origin.clone()),
            use_scope_namespace: winner
                .as_ref()
                .map_or(true, ConfigSource::use_scope_namespace),
            type_name,
            type_source,
            attributes: winner.map(|source| source.properties).unwrap_or_default(),
        }
    }
}
