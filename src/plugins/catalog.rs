//! Compiled-in registry of plugin factories.
//!
//! Plugins are linked into the binary and instantiated through factories.
//! Reloading a plugin means calling its factory again for a fresh instance.

use std::fmt;
use std::sync::{Arc, Weak};

use super::manager::{PluginError, PluginManager};
use super::types::Plugin;
use crate::commands::RateLimiter;
use crate::health::HealthMonitor;
use crate::storage::Database;

/// Where a plugin comes from. Builtins are always loaded; externals only
/// when enabled in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginOrigin {
    Builtin,
    External,
}

impl PluginOrigin {
    #[must_use]
    pub const fn is_external(self) -> bool {
        matches!(self, Self::External)
    }
}

impl fmt::Display for PluginOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Builtin => "builtin",
            Self::External => "external",
        })
    }
}

/// Catalog key a registered plugin was instantiated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSource {
    pub name: String,
    pub origin: PluginOrigin,
}

impl PluginSource {
    #[must_use]
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: PluginOrigin::Builtin,
        }
    }

    #[must_use]
    pub fn external(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: PluginOrigin::External,
        }
    }
}

/// Shared services available to every plugin.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<Database>,
    pub health: Arc<HealthMonitor>,
    pub limiter: Arc<RateLimiter>,
    /// Active command prefix.
    pub prefix: String,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// What a factory receives when building a plugin instance.
#[derive(Clone, Debug)]
pub struct PluginContext {
    pub manager: Weak<PluginManager>,
    pub services: Services,
}

impl PluginContext {
    /// Upgrades the manager handle.
    ///
    /// # Errors
    ///
    /// Fails once the manager has been dropped.
    pub fn manager(&self) -> anyhow::Result<Arc<PluginManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("plugin manager is no longer running"))
    }
}

/// Builds a plugin instance.
pub type PluginFactory =
    Arc<dyn Fn(&PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// One named factory in the catalog.
#[derive(Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub origin: PluginOrigin,
    factory: PluginFactory,
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl CatalogEntry {
    #[must_use]
    pub fn source(&self) -> PluginSource {
        PluginSource {
            name: self.name.clone(),
            origin: self.origin,
        }
    }

    /// Creates a fresh plugin instance.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Factory`] if the factory fails.
    pub fn instantiate(&self, ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
        (self.factory)(ctx).map_err(|source| PluginError::Factory {
            name: self.name.clone(),
            source,
        })
    }
}

/// Ordered set of plugin factories.
#[derive(Clone, Default, Debug)]
pub struct PluginCatalog {
    entries: Vec<CatalogEntry>,
}

impl PluginCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every builtin plugin registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        super::builtin::register(Self::new())
    }

    /// Adds a factory, replacing an existing entry with the same name.
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, origin: PluginOrigin, factory: F) -> Self
    where
        F: Fn(&PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        let entry = CatalogEntry {
            name: name.into(),
            origin,
            factory: Arc::new(factory),
        };
        self.entries.retain(|existing| existing.name != entry.name);
        self.entries.push(entry);
        self
    }

    #[must_use]
    pub fn builtin<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.with(name, PluginOrigin::Builtin, factory)
    }

    #[must_use]
    pub fn external<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.with(name, PluginOrigin::External, factory)
    }

    /// Looks up an entry by name, exact first, then case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .or_else(|| {
                let lower = name.to_lowercase();
                self.entries
                    .iter()
                    .find(|entry| entry.name.to_lowercase() == lower)
            })
    }

    /// Entries of one origin, in registration order.
    pub fn entries(&self, origin: PluginOrigin) -> impl Iterator<Item = &CatalogEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.origin == origin)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
