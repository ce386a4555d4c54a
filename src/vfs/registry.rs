// FILE: src/vfs/registry.rs
//! The backend registry: name -> backend, plus which one is the default.
//!
//! Registering a name that already exists replaces the entry. Handles opened
//! through the old backend keep it alive through their own `Arc`.

use crate::vfs::{OsVfs, Vfs};
use dashmap::DashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct VfsRegistry {
    backends: DashMap<String, Arc<dyn Vfs>>,
    default: RwLock<Option<String>>,
}

impl VfsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the OS backend as default.
    pub fn with_os_default() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(OsVfs::new()), true);
        registry
    }

    /// Install `vfs` under its own name. The first registration always
    /// becomes the default.
    pub fn register(&self, vfs: Arc<dyn Vfs>, make_default: bool) {
        let name = vfs.name().to_string();
        if self.backends.insert(name.clone(), vfs).is_some() {
            tracing::warn!("[Registry] Replaced existing backend '{}'", name);
        } else {
            tracing::debug!("[Registry] Registered backend '{}'", name);
        }

        if let Ok(mut default) = self.default.write() {
            if make_default || default.is_none() {
                *default = Some(name);
            }
        }
    }

    /// Look up a backend by name; `None` means the default.
    pub fn find(&self, name: Option<&str>) -> Option<Arc<dyn Vfs>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_name()?,
        };
        self.backends.get(&name).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a backend. If it was the default, an arbitrary remaining
    /// backend takes over.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Vfs>> {
        let (_, removed) = self.backends.remove(name)?;
        if let Ok(mut default) = self.default.write() {
            if default.as_deref() == Some(name) {
                *default = self.backends.iter().next().map(|entry| entry.key().clone());
            }
        }
        Some(removed)
    }

    pub fn default_name(&self) -> Option<String> {
        self.default.read().ok().and_then(|default| default.clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registration_becomes_default() {
        let registry = VfsRegistry::new();
        assert!(registry.find(None).is_none());

        registry.register(Arc::new(OsVfs::named("first")), false);
        registry.register(Arc::new(OsVfs::named("second")), false);
        assert_eq!(registry.default_name().as_deref(), Some("first"));
        assert_eq!(registry.find(None).map(|v| v.name().to_string()).as_deref(), Some("first"));
    }

    #[test]
    fn test_make_default_switches() {
        let registry = VfsRegistry::with_os_default();
        registry.register(Arc::new(OsVfs::named("other")), true);
        assert_eq!(registry.default_name().as_deref(), Some("other"));
        assert!(registry.find(Some("os")).is_some());
        assert!(registry.find(Some("missing")).is_none());
    }

    #[test]
    fn test_duplicate_name_replaces() {
        let registry = VfsRegistry::new();
        let first: Arc<dyn Vfs> = Arc::new(OsVfs::named("dup"));
        registry.register(Arc::clone(&first), true);
        registry.register(Arc::new(OsVfs::named("dup")), false);

        assert_eq!(registry.names(), vec!["dup".to_string()]);
        let found = registry.find(Some("dup")).unwrap();
        assert!(!Arc::ptr_eq(&found, &first));
    }

    #[test]
    fn test_unregister_default_falls_back() {
        let registry = VfsRegistry::with_os_default();
        registry.register(Arc::new(OsVfs::named("alt")), true);
        assert!(registry.unregister("alt").is_some());
        assert_eq!(registry.default_name().as_deref(), Some("os"));
        assert!(registry.unregister("alt").is_none());
    }
}
