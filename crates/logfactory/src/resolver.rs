// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The resolver ties scope detection, discovery, instantiation and caching
//! together.
//!
//! ```
//! use logfactory::{Resolver, ResolverConfig};
//!
//! let resolver = Resolver::new(ResolverConfig::default());
//! let log = resolver.get_instance("app.http").unwrap();
//! assert_eq!(log.name(), "app.http");
//! ```

use crate::cache::ScopeCache;
use crate::config::{ResolverConfig, FACTORY_DEFAULT};
use crate::diagnostics::Diagnostics;
use crate::discovery::{ConfigSource, Discovery, ResolutionPlan, TypeNameSource};
use crate::error::ConfigurationError;
use crate::factory::{DefaultLogFactory, LogFactory, LogHandle};
use crate::instantiate::Instantiator;
use crate::plugin::{ContractId, PluginRegistry};
use crate::resource::{MemoryNamespace, ResourceNamespace, SearchPath};
use crate::scope::{IsolationScope, ScopeId, ScopeProvider, ThreadScopeProvider};
use std::fmt;
use std::io::Write;
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<Resolver> = OnceLock::new();

/// Process-wide resolver configured from the environment, created on first use.
///
/// Tear it down with `global().release_all()`.
pub fn global() -> &'static Resolver {
    GLOBAL.get_or_init(|| {
        let resolver = Resolver::from_env();
        tracing::debug!("Created process-wide resolver {}", resolver.id());
        resolver
    })
}

/// Shorthand for `global().get_instance(name)`.
pub fn get_log(name: &str) -> Result<LogHandle, ConfigurationError> {
    global().get_instance(name)
}

/// Finds, builds and caches the [`LogFactory`] for the caller's isolation scope.
pub struct Resolver {
    config: ResolverConfig,
    own_scope: Arc<IsolationScope>,
    contract: ContractId,
    scopes: Box<dyn ScopeProvider>,
    cache: ScopeCache,
    diagnostics: Diagnostics,
}

pub struct ResolverBuilder {
    config: ResolverConfig,
    plugins: PluginRegistry,
    resources: Option<Arc<dyn ResourceNamespace>>,
    scopes: Box<dyn ScopeProvider>,
    diagnostics_writer: Option<Box<dyn Write + Send>>,
}

impl ResolverBuilder {
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Factory types shipped alongside the resolver, reachable from every scope.
    pub fn plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    /// The resolver's own namespace, searched for configuration when the
    /// caller has no scope. Defaults to the configured search path.
    pub fn resources(mut self, resources: impl ResourceNamespace + 'static) -> Self {
        self.resources = Some(Arc::new(resources));
        self
    }

    pub fn scope_provider(mut self, scopes: impl ScopeProvider + 'static) -> Self {
        self.scopes = Box::new(scopes);
        self
    }

    /// Sends diagnostics to `writer`, overriding the configured destination.
    pub fn diagnostics_writer(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.diagnostics_writer = Some(writer);
        self
    }

    pub fn build(self) -> Resolver {
        self.plugins.register_if_absent(FACTORY_DEFAULT, || {
            Ok(Arc::new(DefaultLogFactory::new()))
        });
        let resources: Arc<dyn ResourceNamespace> = match self.resources {
            Some(resources) => resources,
            None if self.config.search_path.is_empty() => {
                Arc::new(MemoryNamespace::new("logfactory"))
            }
            None => Arc::new(SearchPath::new(self.config.search_path.iter().cloned())),
        };
        let own_scope = IsolationScope::builder("logfactory")
            .shared_resources(resources)
            .plugins(self.plugins)
            .build();

        let tag = own_scope.id().to_string();
        let diagnostics = match self.diagnostics_writer {
            Some(writer) => Diagnostics::with_writer(writer, &tag),
            None => Diagnostics::new(self.config.diagnostics_dest.clone(), &tag),
        };

        let resolver = Resolver {
            config: self.config,
            own_scope,
            contract: ContractId::current(),
            scopes: self.scopes,
            cache: ScopeCache::new(),
            diagnostics,
        };
        resolver.log_environment();
        resolver
    }
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder {
            config: ResolverConfig::default(),
            plugins: PluginRegistry::new(),
            resources: None,
            scopes: Box::new(ThreadScopeProvider),
            diagnostics_writer: None,
        }
    }

    pub fn new(config: ResolverConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn from_env() -> Self {
        Self::new(ResolverConfig::from_env())
    }

    /// Identity of this resolver, also used as the diagnostics prefix.
    pub fn id(&self) -> &ScopeId {
        self.own_scope.id()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Registry of the types this resolver can always build.
    pub fn plugins(&self) -> &PluginRegistry {
        self.own_scope.plugins()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The factory for the caller's current scope.
    pub fn get_factory(&self) -> Result<Arc<dyn LogFactory>, ConfigurationError> {
        let scope = self.current_scope();
        self.factory_for(scope.as_deref())
    }

    /// The factory for an explicit scope; `None` is the default scope.
    pub fn factory_for(
        &self,
        scope: Option<&IsolationScope>,
    ) -> Result<Arc<dyn LogFactory>, ConfigurationError> {
        self.cache
            .get_or_create(scope.map(IsolationScope::id), || self.resolve(scope))
    }

    pub fn get_instance(&self, name: &str) -> Result<LogHandle, ConfigurationError> {
        self.get_factory()?.instance(name)
    }

    /// Handle named after the type `T`.
    pub fn get_instance_for<T: ?Sized>(&self) -> Result<LogHandle, ConfigurationError> {
        self.get_instance(std::any::type_name::<T>())
    }

    /// Evicts and tears down the factory cached for `scope`.
    pub fn release(&self, scope: Option<&ScopeId>) -> bool {
        self.diagnostics.log_with(|| {
            format!("Releasing factory for scope {}", describe_key(scope))
        });
        let released = self.cache.release(scope);
        if released {
            tracing::debug!("Released factory for scope {}", describe_key(scope));
        }
        released
    }

    /// Evicts and tears down every cached factory.
    pub fn release_all(&self) -> usize {
        self.diagnostics.log("Releasing factory for all scopes.");
        let released = self.cache.release_all();
        tracing::debug!("Released {released} factories");
        released
    }

    /// Releases `scope` when the returned guard is dropped, for hosts that
    /// unload a scope as a unit.
    pub fn release_on_drop(&self, scope: Option<ScopeId>) -> ReleaseGuard<'_> {
        ReleaseGuard {
            resolver: self,
            scope,
        }
    }

    /// Whether a factory is cached for `scope`.
    pub fn is_cached(&self, scope: Option<&ScopeId>) -> bool {
        self.cache.contains(scope)
    }

    pub fn cached_factories(&self) -> usize {
        self.cache.len()
    }

    /// Describes how the caller's scope would be resolved, without building
    /// or caching anything.
    pub fn explain(&self) -> ResolutionPlan {
        let scope = self.current_scope();
        self.explain_for(scope.as_deref())
    }

    pub fn explain_for(&self, scope: Option<&IsolationScope>) -> ResolutionPlan {
        self.discovery().plan(scope)
    }

    fn discovery(&self) -> Discovery<'_> {
        Discovery::new(&self.config, &self.diagnostics).with_default_scope(&self.own_scope)
    }

    fn current_scope(&self) -> Option<Arc<IsolationScope>> {
        match self.scopes.current_scope() {
            Ok(Some(scope)) => Some(scope),
            Ok(None) => {
                self.diagnostics.log("Context scope is null.");
                None
            }
            Err(e) => {
                self.diagnostics.log_with(|| {
                    format!("[LOOKUP] {e}; using the default scope instead.")
                });
                None
            }
        }
    }

    fn resolve(
        &self,
        scope: Option<&IsolationScope>,
    ) -> Result<Arc<dyn LogFactory>, ConfigurationError> {
        let diagnostics = &self.diagnostics;
        diagnostics.log_with(|| {
            format!(
                "[LOOKUP] Factory implementation requested for the first time for scope {}",
                describe_key(scope.map(IsolationScope::id))
            )
        });
        match scope {
            Some(scope) => diagnostics
                .log_with(|| format!("[LOOKUP] Scope tree: {}", scope.describe_ancestry())),
            None => diagnostics.log_with(|| {
                format!(
                    "[LOOKUP] No caller scope; searching the {} of this resolver.",
                    self.own_scope.resources().describe()
                )
            }),
        }

        let discovery = self.discovery();
        let instantiator = Instantiator::new(&self.own_scope, &self.contract, diagnostics);

        let winner = discovery.winning_source(discovery.config_sources(scope));
        let use_scope_namespace = winner
            .as_ref()
            .map_or(true, ConfigSource::use_scope_namespace);
        if !use_scope_namespace {
            diagnostics.log("[LOOKUP] Properties file disables lookups in the caller's scope.");
        }

        let create = |type_name: &str, origin: TypeNameSource| {
            diagnostics.log_with(|| {
                format!("[LOOKUP] Creating an instance of factory type '{type_name}' as specified by {origin}")
            });
            instantiator
                .instantiate(type_name, scope, use_scope_namespace)
                .map_err(|source| ConfigurationError::Resolution {
                    type_name: type_name.to_string(),
                    origin,
                    source: Box::new(source),
                })
        };

        let mut factory = None;

        if let Some(type_name) = discovery.factory_override() {
            factory = Some(create(type_name, TypeNameSource::Override)?);
        }

        if factory.is_none() {
            if let Some(type_name) = discovery.service_entry(scope) {
                match create(type_name.as_str(), TypeNameSource::ServiceRegistry) {
                    Ok(created) => factory = Some(created),
                    Err(e) => diagnostics.log_with(|| {
                        format!("[LOOKUP] Unable to create the factory named by '{}': [{}]. Trying alternative implementations...", crate::config::SERVICE_ID, error_chain(&e))
                    }),
                }
            }
        }

        if factory.is_none() {
            if let Some(type_name) = discovery.properties_entry(winner.as_ref()) {
                factory = Some(create(type_name, TypeNameSource::PropertiesFile)?);
            }
        }

        let factory = match factory {
            Some(factory) => factory,
            None => {
                diagnostics.log_with(|| {
                    format!("[LOOKUP] Loading the default factory '{FACTORY_DEFAULT}' from the registry of this resolver (not the caller's scope).")
                });
                instantiator
                    .instantiate(FACTORY_DEFAULT, None, false)
                    .map_err(|source| ConfigurationError::Resolution {
                        type_name: FACTORY_DEFAULT.to_string(),
                        origin: TypeNameSource::Default,
                        source: Box::new(source),
                    })?
            }
        };

        diagnostics.log_with(|| {
            format!(
                "Created object {}@{:p} to manage scope {}",
                factory.type_name(),
                Arc::as_ptr(&factory),
                describe_key(scope.map(IsolationScope::id))
            )
        });

        if let Some(source) = &winner {
            for (name, value) in source.properties.iter() {
                factory.set_attribute(name, value);
            }
        }
        Ok(factory)
    }

    fn log_environment(&self) {
        let diagnostics = &self.diagnostics;
        if !diagnostics.enabled() {
            return;
        }
        diagnostics.log(format!(
            "[ENV] Resolver {} built against contract {}",
            self.own_scope.id(),
            self.contract
        ));
        diagnostics.log(format!(
            "[ENV] Resources of this resolver come from the {}",
            self.own_scope.resources().describe()
        ));
        diagnostics.log(format!(
            "[ENV] Factory types registered with this resolver: {}",
            self.plugins().type_names().join(", ")
        ));
        diagnostics.log("BOOTSTRAP COMPLETED");
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("id", self.own_scope.id())
            .field("config", &self.config)
            .field("cached_factories", &self.cache.len())
            .finish()
    }
}

/// Releases one scope's factory when dropped.
#[must_use = "the scope is released as soon as the guard is dropped"]
pub struct ReleaseGuard<'a> {
    resolver: &'a Resolver,
    scope: Option<ScopeId>,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.resolver.release(self.scope.as_ref());
    }
}

fn describe_key(scope: Option<&ScopeId>) -> String {
    scope.map_or_else(|| "null".to_string(), ToString::to_string)
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}
