// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! At most one factory per isolation scope.
//!
//! A single mutex guards both the keyed map and the slot reserved for the
//! default (`None`) scope. Resolution runs while the mutex is held, so two
//! callers asking for the same never-resolved scope cannot build two
//! factories, and `release_all` is never observed half done. Teardown hooks
//! run after the mutex is released, so they may use the cache again.

use crate::error::ConfigurationError;
use crate::factory::LogFactory;
use crate::scope::ScopeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Slots {
    scoped: HashMap<ScopeId, Arc<dyn LogFactory>>,
    unscoped: Option<Arc<dyn LogFactory>>,
}

impl Slots {
    fn slot(&self, key: Option<&ScopeId>) -> Option<&Arc<dyn LogFactory>> {
        match key {
            Some(key) => self.scoped.get(key),
            None => self.unscoped.as_ref(),
        }
    }

    fn store(&mut self, key: Option<&ScopeId>, factory: Arc<dyn LogFactory>) {
        match key {
            Some(key) => {
                self.scoped.insert(key.clone(), factory);
            }
            None => self.unscoped = Some(factory),
        }
    }

    fn take(&mut self, key: Option<&ScopeId>) -> Option<Arc<dyn LogFactory>> {
        match key {
            Some(key) => self.scoped.remove(key),
            None => self.unscoped.take(),
        }
    }
}

#[derive(Default)]
pub struct ScopeCache {
    slots: Mutex<Slots>,
}

impl ScopeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached factory for `key`, running `resolve` on a miss.
    /// A failed resolution caches nothing.
    pub fn get_or_create<F>(
        &self,
        key: Option<&ScopeId>,
        resolve: F,
    ) -> Result<Arc<dyn LogFactory>, ConfigurationError>
    where
        F: FnOnce() -> Result<Arc<dyn LogFactory>, ConfigurationError>,
    {
        let mut slots = self.lock();
        if let Some(factory) = slots.slot(key) {
            return Ok(Arc::clone(factory));
        }
        let factory = resolve()?;
        slots.store(key, Arc::clone(&factory));
        Ok(factory)
    }

    pub fn get(&self, key: Option<&ScopeId>) -> Option<Arc<dyn LogFactory>> {
        self.lock().slot(key).cloned()
    }

    pub fn contains(&self, key: Option<&ScopeId>) -> bool {
        self.lock().slot(key).is_some()
    }

    /// Number of cached factories, the default scope included.
    pub fn len(&self) -> usize {
        let slots = self.lock();
        slots.scoped.len() + usize::from(slots.unscoped.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts the factory for `key` and calls its teardown hook once the
    /// cache is unlocked. Returns whether anything was cached.
    pub fn release(&self, key: Option<&ScopeId>) -> bool {
        let evicted = self.lock().take(key);
        match evicted {
            Some(factory) => {
                factory.release();
                true
            }
            None => false,
        }
    }

    /// Evicts every cached factory in one critical section, then tears each
    /// down. Returns how many there were.
    pub fn release_all(&self) -> usize {
        let evicted = {
            let mut slots = self.lock();
            let mut evicted = std::mem::take(&mut slots.scoped)
                .into_values()
                .collect::<Vec<Arc<dyn LogFactory>>>();
            evicted.extend(slots.unscoped.take());
            evicted
        };
        for factory in &evicted {
            factory.release();
        }
        evicted.len()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::DefaultLogFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn fresh() -> Result<Arc<dyn LogFactory>, ConfigurationError> {
        Ok(Arc::new(DefaultLogFactory::new()))
    }

    #[test]
    fn test_hit_returns_same_instance() {
        let cache = ScopeCache::new();
        let scope = ScopeId::new("app");
        let first = cache.get_or_create(Some(&scope), fresh).unwrap();
        let second = cache
            .get_or_create(Some(&scope), || panic!("resolved twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_scopes_are_isolated() {
        let cache = ScopeCache::new();
        let a = ScopeId::new("a");
        let b = ScopeId::new("b");
        let fa = cache.get_or_create(Some(&a), fresh).unwrap();
        let fb = cache.get_or_create(Some(&b), fresh).unwrap();
        let fnull = cache.get_or_create(None, fresh).unwrap();
        assert!(!Arc::ptr_eq(&fa, &fb));
        assert!(!Arc::ptr_eq(&fa, &fnull));
        assert_eq!(cache.len(), 3);

        assert!(cache.release(Some(&a)));
        assert!(!cache.contains(Some(&a)));
        assert!(Arc::ptr_eq(&cache.get(Some(&b)).unwrap(), &fb));
        assert!(Arc::ptr_eq(&cache.get(None).unwrap(), &fnull));
    }

    #[test]
    fn test_failed_resolution_is_not_cached() {
        let cache = ScopeCache::new();
        let result = cache.get_or_create(None, || {
            Err(ConfigurationError::TypeNotFound {
                type_name: "x".to_string(),
                searched: "nowhere".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(cache.get_or_create(None, fresh).is_ok());
    }

    #[test]
    fn test_release_calls_teardown() {
        let cache = ScopeCache::new();
        let scope = ScopeId::new("app");
        let factory = Arc::new(DefaultLogFactory::new());
        let stored: Arc<dyn LogFactory> = factory.clone();
        cache.get_or_create(Some(&scope), || Ok(stored)).unwrap();
        factory.instance("a").unwrap();
        assert_eq!(factory.cached_instances(), 1);

        assert!(cache.release(Some(&scope)));
        assert_eq!(factory.cached_instances(), 0);
        assert!(!cache.release(Some(&scope)));
    }

    #[test]
    fn test_release_all_includes_default_slot() {
        let cache = ScopeCache::new();
        for label in ["a", "b", "c"] {
            cache
                .get_or_create(Some(&ScopeId::new(label)), fresh)
                .unwrap();
        }
        cache.get_or_create(None, fresh).unwrap();
        assert_eq!(cache.release_all(), 4);
        assert!(cache.is_empty());
        assert_eq!(cache.release_all(), 0);
    }

    #[derive(Debug)]
    struct ReentrantFactory {
        inner: DefaultLogFactory,
        cache: std::sync::Weak<ScopeCache>,
        seen_on_teardown: Arc<AtomicUsize>,
    }

    impl LogFactory for ReentrantFactory {
        fn type_name(&self) -> &str {
            "reentrant"
        }
        fn attribute(&self, name: &str) -> Option<String> {
            self.inner.attribute(name)
        }
        fn attribute_names(&self) -> Vec<String> {
            self.inner.attribute_names()
        }
        fn set_attribute(&self, name: &str, value: &str) {
            self.inner.set_attribute(name, value)
        }
        fn remove_attribute(&self, name: &str) {
            self.inner.remove_attribute(name)
        }
        fn instance(&self, name: &str) -> Result<crate::factory::LogHandle, ConfigurationError> {
            self.inner.instance(name)
        }
        fn release(&self) {
            if let Some(cache) = self.cache.upgrade() {
                self.seen_on_teardown.store(cache.len(), Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_teardown_hook_may_use_the_cache() {
        let cache = Arc::new(ScopeCache::new());
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let reentrant = || -> Result<Arc<dyn LogFactory>, ConfigurationError> {
            Ok(Arc::new(ReentrantFactory {
                inner: DefaultLogFactory::new(),
                cache: Arc::downgrade(&cache),
                seen_on_teardown: Arc::clone(&seen),
            }))
        };
        let scope = ScopeId::new("app");
        cache.get_or_create(Some(&scope), reentrant).unwrap();
        cache.get_or_create(None, reentrant).unwrap();

        let worker = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let single = cache.release(None);
                let all = cache.release_all();
                (single, all)
            })
        };
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
        while !worker.is_finished() {
            assert!(std::time::Instant::now() < deadline, "teardown deadlocked");
            thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(worker.join().unwrap(), (true, 1));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_first_lookups_resolve_once() {
        let cache = Arc::new(ScopeCache::new());
        let scope = ScopeId::new("app");
        let resolutions = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let scope = scope.clone();
                let resolutions = Arc::clone(&resolutions);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_create(Some(&scope), || {
                            resolutions.fetch_add(1, Ordering::SeqCst);
                            fresh()
                        })
                        .unwrap()
                })
            })
            .collect();

        let factories: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(resolutions.load(Ordering::SeqCst), 1);
        for factory in &factories[1..] {
            assert!(Arc::ptr_eq(&factories[0], factory));
        }
    }
}
