// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::diagnostics::DiagnosticsDest;
use std::env;
use std::path::PathBuf;

/// Process setting naming the factory type to force.
pub const FACTORY_ENV: &str = "LOGFACTORY_FACTORY";
/// Process setting enabling the diagnostics stream (`STDOUT`, `STDERR` or a file path).
pub const DIAGNOSTICS_DEST_ENV: &str = "LOGFACTORY_DIAGNOSTICS_DEST";
/// Platform path list searched for resources when the caller has no scope.
pub const SEARCH_PATH_ENV: &str = "LOGFACTORY_SEARCH_PATH";

/// Key naming the factory type inside a properties file.
pub const FACTORY_PROPERTY: &str = "logfactory.factory";
/// Key holding the floating-point priority of a properties file.
pub const PRIORITY_KEY: &str = "priority";
/// Key controlling whether the caller's scope is searched for plugin types.
pub const TCCL_KEY: &str = "use_tccl";
/// Properties file searched for in every scope namespace.
pub const FACTORY_PROPERTIES: &str = "logfactory.properties";
/// Discovery-registry resource whose first line names a factory type.
pub const SERVICE_ID: &str = "META-INF/services/logfactory.LogFactory";
/// Type used when no source names one.
pub const FACTORY_DEFAULT: &str = "logfactory::DefaultLogFactory";

/// Process-wide settings consulted by a [`crate::Resolver`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverConfig {
    /// Explicit factory type; beats every discovered source.
    pub factory_override: Option<String>,
    /// Where diagnostics go; `None` keeps the sink inert.
    pub diagnostics_dest: Option<DiagnosticsDest>,
    /// Directories forming the resolver's own namespace, searched for the
    /// default scope.
    pub search_path: Vec<PathBuf>,
}

impl ResolverConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset, blank and non-unicode values are all treated as absent.
    pub fn from_env() -> Self {
        let factory_override = read_setting(FACTORY_ENV);
        let diagnostics_dest =
            read_setting(DIAGNOSTICS_DEST_ENV).map(|dest| DiagnosticsDest::parse(&dest));
        let search_path = env::var_os(SEARCH_PATH_ENV)
            .map(|paths| {
                env::split_paths(&paths)
                    .filter(|path| !path.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            factory_override,
            diagnostics_dest,
            search_path,
        }
    }

    pub fn with_factory_override(mut self, type_name: impl Into<String>) -> Self {
        self.factory_override = normalize(type_name.into());
        self
    }

    pub fn with_diagnostics(mut self, dest: DiagnosticsDest) -> Self {
        self.diagnostics_dest = Some(dest);
        self
    }

    pub fn with_search_path<I, P>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_path = roots.into_iter().map(Into::into).collect();
        self
    }
}

fn read_setting(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => normalize(value),
        Err(env::VarError::NotPresent) => None,
        Err(env::VarError::NotUnicode(_)) => {
            tracing::warn!("{key} is not valid unicode, ignoring it");
            None
        }
    }
}

fn normalize(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
