//! Plugin contract, catalog, registry and builtin plugins.

pub mod builtin;
mod catalog;
mod manager;
mod types;

pub use catalog::{
    CatalogEntry, PluginCatalog, PluginContext, PluginFactory, PluginOrigin, PluginSource,
    Services,
};
pub use manager::{
    ObserverReport, PluginCommands, PluginError, PluginManager, PluginSummary, ReloadSummary,
    ResolvedCommand, TriggerKind,
};
pub use types::{
    CommandDefinition, CommandFn, CommandFuture, DEFAULT_VERSION, LegacyFn, Plugin,
    RegistrationStyle, legacy,
};
