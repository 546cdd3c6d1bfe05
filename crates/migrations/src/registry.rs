//! Migration registry
//!
//! Migration definitions are compiled into the application, so a file found
//! on disk is matched to code through this registry instead of being loaded
//! at runtime. Entries are keyed by `(timestamp key, class name)`, the two
//! values parsed from the file name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::MigrationDescriptor;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::{LoadedMigration, Migration};

/// Builds a fresh migration instance
pub type MigrationFactory = Arc<dyn Fn() -> Box<dyn Migration> + Send + Sync>;

/// Maps migration files to the code that defines them
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    entries: HashMap<(String, String), MigrationFactory>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` for the file `<timestamp_key>_<M>.<ext>`.
    ///
    /// The class name is the Rust type name, so a file whose name does not
    /// match the type it is meant to define will fail to load.
    pub fn register<M>(&mut self, timestamp_key: &str) -> &mut Self
    where
        M: Migration + Default + 'static,
    {
        self.register_with(timestamp_key, class_name_of::<M>(), || {
            Box::new(M::default()) as Box<dyn Migration>
        })
    }

    /// Register a factory under an explicit class name
    pub fn register_with<F>(&mut self, timestamp_key: &str, class_name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Migration> + Send + Sync + 'static,
    {
        let key = (timestamp_key.to_string(), class_name.to_string());
        if self.entries.insert(key, Arc::new(factory)).is_some() {
            tracing::warn!(
                "Migration {}_{} registered twice; keeping the last registration",
                timestamp_key,
                class_name
            );
        }
        self
    }

    /// Builder-style [`register`](Self::register)
    pub fn with<M>(mut self, timestamp_key: &str) -> Self
    where
        M: Migration + Default + 'static,
    {
        self.register::<M>(timestamp_key);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a definition is registered for this file
    pub fn contains(&self, descriptor: &MigrationDescriptor) -> bool {
        self.entries.contains_key(&key_of(descriptor))
    }

    /// Instantiate the migration defined by a file
    pub fn load(&self, descriptor: &MigrationDescriptor) -> MigrationResult<LoadedMigration> {
        let factory = self.entries.get(&key_of(descriptor)).ok_or_else(|| {
            let registered: Vec<&str> = self
                .entries
                .keys()
                .filter(|(timestamp_key, _)| *timestamp_key == descriptor.timestamp_key)
                .map(|(_, class_name)| class_name.as_str())
                .collect();

            let reason = if registered.is_empty() {
                "no migration is registered for this file".to_string()
            } else {
                format!(
                    "the migration registered for {} is named {}",
                    descriptor.timestamp_key,
                    registered.join(", ")
                )
            };

            MigrationError::ClassLoad {
                file_name: descriptor.file_name.clone(),
                class_name: descriptor.class_name.clone(),
                reason,
            }
        })?;

        Ok(LoadedMigration::new(descriptor.clone(), factory()))
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("MigrationRegistry").field("entries", &keys).finish()
    }
}

fn key_of(descriptor: &MigrationDescriptor) -> (String, String) {
    (
        descriptor.timestamp_key.clone(),
        descriptor.class_name.clone(),
    )
}

/// Unqualified type name of `M`, without generic arguments
pub fn class_name_of<M: ?Sized>() -> &'static str {
    let full = std::any::type_name::<M>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
