//! Name → implementation registries for site handlers and workers.
//!
//! Constructed once at process start and passed by reference. Registration
//! takes the write lock so late registration is safe; lookups only read.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::RegistryError;
use crate::task::SiteHandler;
use crate::worker::Worker;

/// Longest accepted handle name, in bytes.
pub const HANDLE_NAME_LIMIT: usize = 128;

/// Registry of named implementations.
pub struct Registry<T: ?Sized> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

/// Server-side site handler factories.
pub type HandlerRegistry = Registry<dyn SiteHandler>;

/// Satellite-side workers.
pub type WorkerRegistry = Registry<dyn Worker>;

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register `entry` under `name`. Names are unique and at most
    /// [`HANDLE_NAME_LIMIT`] bytes long.
    pub fn register(&self, name: &str, entry: Arc<T>) -> Result<(), RegistryError> {
        if name.len() > HANDLE_NAME_LIMIT {
            return Err(RegistryError::NameTooLong {
                len: name.len(),
                max: HANDLE_NAME_LIMIT,
            });
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(name) {
            return Err(RegistryError::Exists(name.to_string()));
        }
        entries.insert(name.to_string(), entry);
        tracing::debug!(handle = %name, "Registered handle");
        Ok(())
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
