// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Isolation scopes and how the caller's current scope is determined.
//!
//! A scope is the boundary under which one factory is cached: a plugin, a
//! tenant, a hosted application. The embedding environment creates scopes and
//! marks the running thread with [`IsolationScope::enter`]; the resolver only
//! observes them.

use crate::error::{ResourceError, ScopeUnavailable};
use crate::plugin::{PluginEntry, PluginRegistry};
use crate::resource::{MemoryNamespace, Resource, ResourceNamespace};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SCOPE_SERIAL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<Arc<IsolationScope>>> = const { RefCell::new(None) };
}

/// Opaque identity of an isolation scope, unique within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId {
    serial: u64,
    label: Arc<str>,
}

impl ScopeId {
    pub fn new(label: &str) -> Self {
        Self {
            serial: NEXT_SCOPE_SERIAL.fetch_add(1, Ordering::Relaxed),
            label: Arc::from(label),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.label, self.serial)
    }
}

/// A code-loading boundary: its resources, the plugin types it can see, and
/// the scope it delegates to.
#[derive(Debug)]
pub struct IsolationScope {
    id: ScopeId,
    parent: Option<Arc<IsolationScope>>,
    resources: Arc<dyn ResourceNamespace>,
    plugins: PluginRegistry,
}

impl IsolationScope {
    pub fn builder(label: &str) -> IsolationScopeBuilder {
        IsolationScopeBuilder {
            id: ScopeId::new(label),
            parent: None,
            resources: None,
            plugins: PluginRegistry::new(),
        }
    }

    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    pub fn parent(&self) -> Option<&Arc<IsolationScope>> {
        self.parent.as_ref()
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn resources(&self) -> &dyn ResourceNamespace {
        self.resources.as_ref()
    }

    /// This scope followed by its ancestors, nearest first.
    pub fn ancestry(&self) -> impl Iterator<Item = &IsolationScope> {
        std::iter::successors(Some(self), |scope| scope.parent.as_deref())
    }

    /// Renders the ancestry as `app@3 --> shared@2 --> ROOT`.
    pub fn describe_ancestry(&self) -> String {
        let mut tree = self
            .ancestry()
            .map(|scope| scope.id.to_string())
            .collect::<Vec<String>>();
        tree.push("ROOT".to_string());
        tree.join(" --> ")
    }

    /// Every occurrence of `path`, ancestors' occurrences first.
    pub fn find_resources(&self, path: &str) -> Vec<Result<Resource, ResourceError>> {
        let mut found = match &self.parent {
            Some(parent) => parent.find_resources(path),
            None => Vec::new(),
        };
        found.extend(self.resources.resources(path));
        found
    }

    /// First occurrence of `path`, asking ancestors first.
    pub fn find_resource(&self, path: &str) -> Result<Option<Resource>, ResourceError> {
        if let Some(parent) = &self.parent {
            if let Some(resource) = parent.find_resource(path)? {
                return Ok(Some(resource));
            }
        }
        self.resources.resource(path)
    }

    /// Plugin registered under `type_name`, asking ancestors first. Returns
    /// the id of the scope that provided it.
    pub fn find_plugin(&self, type_name: &str) -> Option<(ScopeId, PluginEntry)> {
        if let Some(found) = self
            .parent
            .as_ref()
            .and_then(|parent| parent.find_plugin(type_name))
        {
            return Some(found);
        }
        self.plugins
            .get(type_name)
            .map(|entry| (self.id.clone(), entry))
    }

    /// Marks `self` as the current scope of this thread until the guard drops.
    pub fn enter(self: &Arc<Self>) -> ScopeGuard {
        let previous = CURRENT_SCOPE.with(|current| current.replace(Some(Arc::clone(self))));
        ScopeGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// The scope most recently entered on this thread.
    pub fn current() -> Option<Arc<IsolationScope>> {
        CURRENT_SCOPE.with(|current| current.borrow().clone())
    }
}

pub struct IsolationScopeBuilder {
    id: ScopeId,
    parent: Option<Arc<IsolationScope>>,
    resources: Option<Arc<dyn ResourceNamespace>>,
    plugins: PluginRegistry,
}

impl IsolationScopeBuilder {
    pub fn parent(mut self, parent: Arc<IsolationScope>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn resources(mut self, resources: impl ResourceNamespace + 'static) -> Self {
        self.resources = Some(Arc::new(resources));
        self
    }

    /// Like [`IsolationScopeBuilder::resources`], for a namespace already
    /// shared with other owners.
    pub fn shared_resources(mut self, resources: Arc<dyn ResourceNamespace>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn build(self) -> Arc<IsolationScope> {
        let resources = self
            .resources
            .unwrap_or_else(|| Arc::new(MemoryNamespace::new(self.id.label())));
        Arc::new(IsolationScope {
            id: self.id,
            parent: self.parent,
            resources,
            plugins: self.plugins,
        })
    }
}

/// Restores the previously entered scope when dropped.
#[must_use = "the scope is left as soon as the guard is dropped"]
pub struct ScopeGuard {
    previous: Option<Arc<IsolationScope>>,
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_SCOPE.with(|current| *current.borrow_mut() = previous);
    }
}

/// Determines the caller's isolation scope.
///
/// Returning `Ok(None)` selects the process-wide default scope. Hosts that
/// forbid inspecting the scope return [`ScopeUnavailable`]; the resolver then
/// falls back to the default scope.
pub trait ScopeProvider: Send + Sync {
    fn current_scope(&self) -> Result<Option<Arc<IsolationScope>>, ScopeUnavailable>;
}

impl<F> ScopeProvider for F
where
    F: Fn() -> Result<Option<Arc<IsolationScope>>, ScopeUnavailable> + Send + Sync,
{
    fn current_scope(&self) -> Result<Option<Arc<IsolationScope>>, ScopeUnavailable> {
        self()
    }
}

/// Uses the scope entered on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScopeProvider;

impl ScopeProvider for ThreadScopeProvider {
    fn current_scope(&self) -> Result<Option<Arc<IsolationScope>>, ScopeUnavailable> {
        Ok(IsolationScope::current())
    }
}

/// Always answers with the same scope, for hosts with no isolation concept.
#[derive(Debug, Clone, Default)]
pub struct FixedScopeProvider(pub Option<Arc<IsolationScope>>);

impl ScopeProvider for FixedScopeProvider {
    fn current_scope(&self) -> Result<Option<Arc<IsolationScope>>, ScopeUnavailable> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryNamespace;

    #[test]
    fn test_scope_ids_are_unique() {
        let a = ScopeId::new("app");
        let b = ScopeId::new("app");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert!(a.to_string().starts_with("app@"));
    }

    #[test]
    fn test_enter_restores_previous_scope() {
        let outer = IsolationScope::builder("outer").build();
        let inner = IsolationScope::builder("inner").build();
        assert!(IsolationScope::current().is_none());
        {
            let _outer_guard = outer.enter();
            {
                let _inner_guard = inner.enter();
                let current = IsolationScope::current().unwrap();
                assert_eq!(current.id(), inner.id());
            }
            let current = IsolationScope::current().unwrap();
            assert_eq!(current.id(), outer.id());
        }
        assert!(IsolationScope::current().is_none());
    }

    #[test]
    fn test_current_scope_is_per_thread() {
        let scope = IsolationScope::builder("app").build();
        let _guard = scope.enter();
        let seen_elsewhere = std::thread::spawn(|| ThreadScopeProvider.current_scope().unwrap())
            .join()
            .unwrap();
        assert!(seen_elsewhere.is_none());
        assert!(ThreadScopeProvider.current_scope().unwrap().is_some());
    }

    #[test]
    fn test_resources_are_parent_first() {
        let parent = IsolationScope::builder("shared")
            .resources(MemoryNamespace::new("shared").with("f", "shared:f", "parent"))
            .build();
        let child = IsolationScope::builder("app")
            .parent(Arc::clone(&parent))
            .resources(MemoryNamespace::new("app").with("f", "app:f", "child"))
            .build();

        let origins = child
            .find_resources("f")
            .into_iter()
            .map(|resource| resource.unwrap().origin)
            .collect::<Vec<String>>();
        assert_eq!(origins, vec!["shared:f".to_string(), "app:f".to_string()]);
        assert_eq!(child.find_resource("f").unwrap().unwrap().contents, "parent");
    }

    #[test]
    fn test_describe_ancestry() {
        let parent = IsolationScope::builder("shared").build();
        let child = IsolationScope::builder("app")
            .parent(Arc::clone(&parent))
            .build();
        assert_eq!(
            child.describe_ancestry(),
            format!("{} --> {} --> ROOT", child.id(), parent.id())
        );
    }

    #[test]
    fn test_closure_provider() {
        let provider = || -> Result<Option<Arc<IsolationScope>>, ScopeUnavailable> {
            Err(ScopeUnavailable("sandboxed".to_string()))
        };
        assert!(provider.current_scope().is_err());
    }
}
