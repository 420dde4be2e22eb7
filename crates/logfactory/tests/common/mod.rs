// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the resolver integration tests.

use logfactory::{
    ConfigurationError, IsolationScope, Log, LogFactory, LogHandle, PluginRegistry, SearchPath,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Factory stub counting its constructions and teardowns.
#[derive(Debug)]
pub struct CountingFactory {
    type_name: String,
    attributes: Mutex<BTreeMap<String, String>>,
    releases: Arc<AtomicUsize>,
}

#[derive(Debug)]
struct StubLog(String);

impl Log for StubLog {
    fn name(&self) -> &str {
        &self.0
    }
}

impl LogFactory for CountingFactory {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.lock().unwrap().get(name).cloned()
    }

    fn attribute_names(&self) -> Vec<String> {
        self.attributes.lock().unwrap().keys().cloned().collect()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.attributes
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    fn remove_attribute(&self, name: &str) {
        self.attributes.lock().unwrap().remove(name);
    }

    fn instance(&self, name: &str) -> Result<LogHandle, ConfigurationError> {
        Ok(Arc::new(StubLog(name.to_string())))
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counters shared by every instance a registration constructs.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub constructed: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl Counters {
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// Registers a [`CountingFactory`] under `type_name`.
pub fn register_counting(registry: &PluginRegistry, type_name: &str) -> Counters {
    let counters = Counters::default();
    let shared = counters.clone();
    let name = type_name.to_string();
    registry.register(type_name, move || -> Result<Arc<dyn LogFactory>, logfactory::BoxError> {
        shared.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingFactory {
            type_name: name.clone(),
            attributes: Mutex::default(),
            releases: Arc::clone(&shared.released),
        }))
    });
    counters
}

/// Factory stub recording when it was torn down, as a position in the
/// sequence of all teardowns of its registration.
#[derive(Debug)]
pub struct GenerationFactory {
    teardowns: Arc<AtomicUsize>,
    torn_down_at: AtomicUsize,
    releases: AtomicUsize,
}

impl GenerationFactory {
    /// Teardown sequence number, `0` while the factory is live.
    pub fn torn_down_at(factory: &dyn LogFactory) -> usize {
        parse_counter(factory, "torn_down_at")
    }

    pub fn releases(factory: &dyn LogFactory) -> usize {
        parse_counter(factory, "releases")
    }
}

fn parse_counter(factory: &dyn LogFactory, name: &str) -> usize {
    factory
        .attribute(name)
        .and_then(|value| value.parse().ok())
        .unwrap()
}

impl LogFactory for GenerationFactory {
    fn type_name(&self) -> &str {
        "acme::Generation"
    }

    fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "torn_down_at" => Some(self.torn_down_at.load(Ordering::SeqCst).to_string()),
            "releases" => Some(self.releases.load(Ordering::SeqCst).to_string()),
            _ => None,
        }
    }

    fn attribute_names(&self) -> Vec<String> {
        vec!["releases".to_string(), "torn_down_at".to_string()]
    }

    fn set_attribute(&self, _name: &str, _value: &str) {}

    fn remove_attribute(&self, _name: &str) {}

    fn instance(&self, name: &str) -> Result<LogHandle, ConfigurationError> {
        Ok(Arc::new(StubLog(name.to_string())))
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let seq = self.teardowns.fetch_add(1, Ordering::SeqCst) + 1;
        self.torn_down_at.store(seq, Ordering::SeqCst);
    }
}

/// Registers a [`GenerationFactory`] under `acme::Generation`. Returns the
/// shared teardown counter.
pub fn register_generations(registry: &PluginRegistry) -> Arc<AtomicUsize> {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&teardowns);
    registry.register(
        "acme::Generation",
        move || -> Result<Arc<dyn LogFactory>, logfactory::BoxError> {
            Ok(Arc::new(GenerationFactory {
                teardowns: Arc::clone(&shared),
                torn_down_at: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
            }))
        },
    );
    teardowns
}

/// Writes `contents` to `relative` under `root`, creating parent directories.
pub fn write_resource(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// A scope whose namespace is a fresh temporary directory.
pub struct DirScope {
    pub dir: TempDir,
    pub scope: Arc<IsolationScope>,
}

impl DirScope {
    pub fn new(label: &str, parent: Option<Arc<IsolationScope>>, plugins: PluginRegistry) -> Self {
        let dir = TempDir::new().unwrap();
        let mut builder = IsolationScope::builder(label)
            .resources(SearchPath::new([dir.path()]))
            .plugins(plugins);
        if let Some(parent) = parent {
            builder = builder.parent(parent);
        }
        Self {
            dir,
            scope: builder.build(),
        }
    }

    pub fn write(&self, relative: &str, contents: &str) -> &Self {
        write_resource(self.dir.path(), relative, contents);
        self
    }
}
