// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Resolves the logging backend factory for the caller's isolation scope.
//!
//! A host owns a tree of [`IsolationScope`]s, each with a resource namespace
//! and a registry of factory types. On the first request from a scope the
//! [`Resolver`] decides which factory type to build from, strongest first:
//! the `LOGFACTORY_FACTORY` setting, the discovery registry resource, the
//! highest priority `logfactory.properties` file and the built-in
//! [`DefaultLogFactory`]. The factory is then cached until the scope is
//! released.
//!
//! Setting `LOGFACTORY_DIAGNOSTICS_DEST` to `STDOUT`, `STDERR` or a file path
//! traces every decision the resolver makes.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod factory;
mod instantiate;
pub mod plugin;
pub mod properties;
pub mod resolver;
pub mod resource;
pub mod scope;

pub use config::ResolverConfig;
pub use diagnostics::{Diagnostics, DiagnosticsDest, SharedBuffer};
pub use discovery::{ConfigSource, ResolutionPlan, SourceSummary, TypeNameSource};
pub use error::{BoxError, ConfigurationError, ResourceError, ScopeUnavailable};
pub use factory::{DefaultLogFactory, Log, LogFactory, LogHandle};
pub use plugin::{ContractId, PluginEntry, PluginRegistry};
pub use properties::{Properties, PropertiesError};
pub use resolver::{get_log, global, ReleaseGuard, Resolver, ResolverBuilder};
pub use resource::{MemoryNamespace, Resource, ResourceNamespace, SearchPath};
pub use scope::{
    FixedScopeProvider, IsolationScope, IsolationScopeBuilder, ScopeGuard, ScopeId, ScopeProvider,
    ThreadScopeProvider,
};
