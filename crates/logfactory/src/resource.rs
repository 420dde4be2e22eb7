// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Resource namespaces: where a scope looks for configuration files.

use crate::error::ResourceError;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::PathBuf;

/// A text resource and a locator describing where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub origin: String,
    pub contents: String,
}

/// Lookup of named resources visible to one isolation scope.
pub trait ResourceNamespace: Send + Sync + Debug {
    /// Short human readable description used in diagnostics.
    fn describe(&self) -> String;

    /// Every occurrence of `path`, in search order. A failure to read one
    /// occurrence does not hide the others.
    fn resources(&self, path: &str) -> Vec<Result<Resource, ResourceError>>;

    /// The first occurrence of `path`.
    fn resource(&self, path: &str) -> Result<Option<Resource>, ResourceError> {
        self.resources(path).into_iter().next().transpose()
    }
}

/// Ordered list of directories searched like a class path.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    roots: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl ResourceNamespace for SearchPath {
    fn describe(&self) -> String {
        let roots = self
            .roots
            .iter()
            .map(|root| root.display().to_string())
            .collect::<Vec<String>>();
        format!("search path [{}]", roots.join(", "))
    }

    fn resources(&self, path: &str) -> Vec<Result<Resource, ResourceError>> {
        self.roots
            .iter()
            .map(|root| root.join(path))
            .filter_map(|candidate| {
                let origin = candidate.display().to_string();
                match fs::read_to_string(&candidate) {
                    Ok(contents) => Some(Ok(Resource { origin, contents })),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                    Err(e) => Some(Err(ResourceError::from_io(origin, e))),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Present(Resource),
    Denied,
}

/// Namespace whose resources live in memory; useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryNamespace {
    name: String,
    entries: Vec<(String, Entry)>,
}

impl MemoryNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Adds an occurrence of `path`; later calls for the same path add further
    /// occurrences rather than replacing earlier ones.
    pub fn with(
        mut self,
        path: impl Into<String>,
        origin: impl Into<String>,
        contents: impl Into<String>,
    ) -> Self {
        self.entries.push((
            path.into(),
            Entry::Present(Resource {
                origin: origin.into(),
                contents: contents.into(),
            }),
        ));
        self
    }

    /// Adds an occurrence of `path` that fails with a permission error.
    pub fn with_denied(mut self, path: impl Into<String>) -> Self {
        self.entries.push((path.into(), Entry::Denied));
        self
    }
}

impl ResourceNamespace for MemoryNamespace {
    fn describe(&self) -> String {
        format!("memory namespace '{}'", self.name)
    }

    fn resources(&self, path: &str) -> Vec<Result<Resource, ResourceError>> {
        self.entries
            .iter()
            .filter(|(entry_path, _)| entry_path == path)
            .map(|(entry_path, entry)| match entry {
                Entry::Present(resource) => Ok(resource.clone()),
                Entry::Denied => Err(ResourceError::Denied {
                    path: entry_path.clone(),
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_path_preserves_root_order() {
        let first = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(first.path().join("logfactory.properties"), "a=1").unwrap();
        fs::write(second.path().join("logfactory.properties"), "b=2").unwrap();

        let search_path = SearchPath::new([first.path(), empty.path(), second.path()]);
        let found = search_path
            .resources("logfactory.properties")
            .into_iter()
            .map(|resource| resource.unwrap().contents)
            .collect::<Vec<String>>();
        assert_eq!(found, vec!["a=1".to_string(), "b=2".to_string()]);
    }

    #[test]
    fn test_search_path_nested_resource() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("META-INF/services")).unwrap();
        fs::write(
            root.path().join("META-INF/services/logfactory.LogFactory"),
            "acme::Factory\n",
        )
        .unwrap();

        let search_path = SearchPath::new([root.path()]);
        let resource = search_path
            .resource("META-INF/services/logfactory.LogFactory")
            .unwrap()
            .unwrap();
        assert_eq!(resource.contents, "acme::Factory\n");
        assert!(resource.origin.ends_with("logfactory.LogFactory"));
        assert_eq!(search_path.resource("missing.properties").unwrap(), None);
    }

    #[test]
    fn test_search_path_reports_unreadable_entry() {
        let root = tempfile::tempdir().unwrap();
        // a directory where a file is expected cannot be read as text
        fs::create_dir(root.path().join("logfactory.properties")).unwrap();
        let search_path = SearchPath::new([root.path()]);
        let results = search_path.resources("logfactory.properties");
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_memory_namespace_denied_entry_does_not_hide_others() {
        let namespace = MemoryNamespace::new("test")
            .with_denied("logfactory.properties")
            .with("logfactory.properties", "mem:lib2", "priority=2");
        let results = namespace.resources("logfactory.properties");
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(ResourceError::Denied { .. })));
        assert_eq!(results[1].as_ref().unwrap().origin, "mem:lib2");
        assert!(namespace.resource("logfactory.properties").is_err());
    }
}
