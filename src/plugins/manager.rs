//! Plugin registry and command index.
//!
//! The manager owns three maps: registered plugins, the command index
//! (canonical names and declared aliases) and the persisted alias table.
//! Locks are never held across plugin hooks or command handlers, so hooks
//! may call back into the manager.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::catalog::{PluginCatalog, PluginContext, PluginOrigin, PluginSource, Services};
use super::types::{CommandDefinition, Plugin, RegistrationStyle};
use crate::storage::StoreError;
use crate::transport::{IncomingMessage, Transport};

/// Errors from plugin lifecycle operations.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin {name} failed to initialize: {source:#}")]
    Init {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Plugin {name} could not be created: {source:#}")]
    Factory {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin already installed: {0}")]
    AlreadyInstalled(String),

    #[error("Plugin not installed: {0}")]
    NotInstalled(String),

    #[error("Builtin plugin cannot be removed: {0}")]
    Builtin(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Whether a command key is a canonical name or a declared alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Canonical,
    Alias,
}

#[derive(Clone)]
struct CommandEntry {
    plugin: String,
    definition: Arc<CommandDefinition>,
    kind: TriggerKind,
}

struct LoadedPlugin {
    instance: Arc<dyn Plugin>,
    source: PluginSource,
    /// Every command key this plugin inserted.
    triggers: Vec<String>,
}

#[derive(Default)]
struct Registry {
    plugins: HashMap<String, LoadedPlugin>,
    commands: HashMap<String, CommandEntry>,
    aliases: HashMap<String, String>,
}

impl Registry {
    /// Removes the plugin and every command key it still owns.
    fn remove_plugin(&mut self, name: &str) -> Option<LoadedPlugin> {
        let loaded = self.plugins.remove(name)?;
        for trigger in &loaded.triggers {
            if self
                .commands
                .get(trigger)
                .is_some_and(|entry| entry.plugin == name)
            {
                self.commands.remove(trigger);
            }
        }
        Some(loaded)
    }

    fn find_plugin(&self, name: &str) -> Option<(&String, &LoadedPlugin)> {
        self.plugins.get_key_value(name).or_else(|| {
            let lower = name.to_lowercase();
            self.plugins
                .iter()
                .filter(|(key, _)| key.to_lowercase() == lower)
                .min_by(|a, b| a.0.cmp(b.0))
        })
    }
}

/// A command resolved through the index.
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    /// Index key that matched, after alias rewriting.
    pub trigger: String,
    /// Name of the owning plugin.
    pub plugin: String,
    pub definition: Arc<CommandDefinition>,
    pub kind: TriggerKind,
}

/// A plugin's triggers split by registration style.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginCommands {
    pub commands: Vec<String>,
    pub cmd_handlers: Vec<String>,
}

/// Outcome of fanning a message out to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverReport {
    pub invoked: usize,
    pub failed: usize,
}

impl ObserverReport {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Listing entry for a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSummary {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: Option<String>,
    pub origin: PluginOrigin,
    pub commands: usize,
}

/// Counts from a full reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub reloaded: usize,
    pub failed: usize,
}

/// Owns plugin lifecycle and command resolution.
pub struct PluginManager {
    registry: RwLock<Registry>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    services: Services,
    catalog: PluginCatalog,
    this: Weak<PluginManager>,
}

impl PluginManager {
    /// Creates a manager and loads persisted aliases.
    ///
    /// # Errors
    ///
    /// Returns an error if aliases cannot be read from the store.
    pub fn new(services: Services, catalog: PluginCatalog) -> Result<Arc<Self>, StoreError> {
        let aliases: HashMap<String, String> =
            services.store.get_all_aliases()?.into_iter().collect();
        debug!("Loaded {} persisted aliases", aliases.len());

        Ok(Arc::new_cyclic(|this| Self {
            registry: RwLock::new(Registry {
                aliases,
                ..Registry::default()
            }),
            transport: RwLock::new(None),
            services,
            catalog,
            this: this.clone(),
        }))
    }

    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    #[must_use]
    pub const fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Context handed to plugin factories.
    #[must_use]
    pub fn plugin_context(&self) -> PluginContext {
        PluginContext {
            manager: self.this.clone(),
            services: self.services.clone(),
        }
    }

    /// Attaches the messaging client used for `on_init` and observers.
    pub async fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write().await = Some(transport);
    }

    pub async fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().await.clone()
    }

    /// Instantiates and registers every builtin plugin. Failures are logged
    /// per plugin. Returns the number registered.
    pub async fn load_builtins(&self) -> usize {
        self.load_origin(PluginOrigin::Builtin).await
    }

    /// Instantiates and registers every external plugin that is enabled in
    /// the store. Returns the number registered.
    pub async fn load_externals(&self) -> usize {
        self.load_origin(PluginOrigin::External).await
    }

    async fn load_origin(&self, origin: PluginOrigin) -> usize {
        let ctx = self.plugin_context();
        let mut loaded = 0;

        for entry in self.catalog.entries(origin) {
            if origin.is_external() {
                match self.services.store.is_plugin_enabled(&entry.name) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("Skipping disabled plugin {}", entry.name);
                        continue;
                    }
                    Err(e) => {
                        error!("Failed to check state of plugin {}: {}", entry.name, e);
                        continue;
                    }
                }
            }

            let result = match entry.instantiate(&ctx) {
                Ok(plugin) => self.register_plugin(plugin, entry.source()).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => loaded += 1,
                Err(e) => error!("Failed to load {} plugin {}: {}", origin, entry.name, e),
            }
        }

        info!("Loaded {} {} plugins", loaded, origin);
        loaded
    }

    /// Registers `plugin`, replacing any plugin with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Init`] if `on_init` fails. The plugin is not
    /// registered in that case.
    pub async fn register_plugin(
        &self,
        plugin: Arc<dyn Plugin>,
        source: PluginSource,
    ) -> Result<(), PluginError> {
        let name = plugin.name().to_owned();

        if self.registry.read().await.plugins.contains_key(&name) {
            self.unregister_plugin(&name).await;
        }

        if let Some(transport) = self.transport().await {
            plugin
                .on_init(transport)
                .await
                .map_err(|source| PluginError::Init {
                    name: name.clone(),
                    source,
                })?;
        }

        let mut entries: Vec<(String, CommandEntry)> = Vec::new();
        for (command, definition) in plugin.commands() {
            let definition = Arc::new(definition);
            for alias in &definition.aliases {
                entries.push((
                    alias.clone(),
                    CommandEntry {
                        plugin: name.clone(),
                        definition: Arc::clone(&definition),
                        kind: TriggerKind::Alias,
                    },
                ));
            }
            entries.push((
                command,
                CommandEntry {
                    plugin: name.clone(),
                    definition,
                    kind: TriggerKind::Canonical,
                },
            ));
        }
        for (command, handler) in plugin.cmd_handlers() {
            let definition = CommandDefinition::from_legacy(&command, handler);
            entries.push((
                command,
                CommandEntry {
                    plugin: name.clone(),
                    definition: Arc::new(definition),
                    kind: TriggerKind::Canonical,
                },
            ));
        }

        {
            let mut registry = self.registry.write().await;
            // A concurrent registration of the same name may have won the race.
            registry.remove_plugin(&name);

            let mut triggers = Vec::with_capacity(entries.len());
            for (trigger, entry) in entries {
                if let Some(previous) = registry.commands.get(&trigger)
                    && previous.plugin != name
                {
                    warn!(
                        "Command {} of plugin {} overrides plugin {}",
                        trigger, name, previous.plugin
                    );
                }
                registry.commands.insert(trigger.clone(), entry);
                triggers.push(trigger);
            }

            registry.plugins.insert(
                name.clone(),
                LoadedPlugin {
                    instance: Arc::clone(&plugin),
                    source: source.clone(),
                    triggers,
                },
            );
        }

        if source.origin.is_external()
            && let Err(e) = self.services.store.save_plugin(&name, plugin.version())
        {
            warn!("Failed to persist plugin {}: {}", name, e);
        }

        info!("Plugin registered: {} v{}", name, plugin.version());
        Ok(())
    }

    /// Unregisters a plugin, running its `on_unload` hook. Returns whether a
    /// plugin with that name was registered.
    pub async fn unregister_plugin(&self, name: &str) -> bool {
        let Some(instance) = self
            .registry
            .read()
            .await
            .plugins
            .get(name)
            .map(|loaded| Arc::clone(&loaded.instance))
        else {
            return false;
        };

        if let Err(e) = instance.on_unload().await {
            warn!("Plugin {} failed to unload cleanly: {:#}", name, e);
        }

        self.registry.write().await.remove_plugin(name);
        info!("Plugin unregistered: {}", name);
        true
    }

    /// Resolves a command name: persisted alias (exact, then
    /// case-insensitive), then the command index (exact, then
    /// case-insensitive). Among case-insensitive matches the smallest key
    /// wins.
    pub async fn get_command(&self, name: &str) -> Option<ResolvedCommand> {
        let registry = self.registry.read().await;
        let lower = name.to_lowercase();

        let target = registry
            .aliases
            .get(name)
            .or_else(|| {
                registry
                    .aliases
                    .iter()
                    .filter(|(alias, _)| alias.to_lowercase() == lower)
                    .min_by(|a, b| a.0.cmp(b.0))
                    .map(|(_, command)| command)
            })
            .map_or(name, String::as_str);

        let (trigger, entry) = registry.commands.get_key_value(target).or_else(|| {
            let lower = target.to_lowercase();
            registry
                .commands
                .iter()
                .filter(|(key, _)| key.to_lowercase() == lower)
                .min_by(|a, b| a.0.cmp(b.0))
        })?;

        Some(ResolvedCommand {
            trigger: trigger.clone(),
            plugin: entry.plugin.clone(),
            definition: Arc::clone(&entry.definition),
            kind: entry.kind,
        })
    }

    /// Canonical commands keyed by name, without declared aliases.
    pub async fn get_all_commands(&self) -> BTreeMap<String, ResolvedCommand> {
        let registry = self.registry.read().await;
        registry
            .commands
            .iter()
            .filter(|(_, entry)| entry.kind == TriggerKind::Canonical)
            .map(|(trigger, entry)| {
                (
                    trigger.clone(),
                    ResolvedCommand {
                        trigger: trigger.clone(),
                        plugin: entry.plugin.clone(),
                        definition: Arc::clone(&entry.definition),
                        kind: entry.kind,
                    },
                )
            })
            .collect()
    }

    /// Looks up a plugin by name, exact first, then case-insensitively.
    pub async fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.registry
            .read()
            .await
            .find_plugin(name)
            .map(|(_, loaded)| Arc::clone(&loaded.instance))
    }

    /// All registered plugins, sorted by name.
    pub async fn get_all_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let registry = self.registry.read().await;
        let mut names: Vec<&String> = registry.plugins.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| registry.plugins.get(name))
            .map(|loaded| Arc::clone(&loaded.instance))
            .collect()
    }

    /// Registered plugins with metadata, sorted by name.
    pub async fn list_plugins(&self) -> Vec<PluginSummary> {
        let registry = self.registry.read().await;
        let mut summaries: Vec<PluginSummary> = registry
            .plugins
            .iter()
            .map(|(name, loaded)| PluginSummary {
                name: name.clone(),
                version: loaded.instance.version().to_owned(),
                description: loaded.instance.description().to_owned(),
                author: loaded.instance.author().map(str::to_owned),
                origin: loaded.source.origin,
                commands: loaded
                    .triggers
                    .iter()
                    .filter(|t| {
                        registry
                            .commands
                            .get(*t)
                            .is_some_and(|e| e.plugin == *name && e.kind == TriggerKind::Canonical)
                    })
                    .count(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Whether `name` resolves to a command registered through the legacy
    /// handler map.
    pub async fn is_cmd_handler_command(&self, name: &str) -> bool {
        self.get_command(name)
            .await
            .is_some_and(|cmd| cmd.definition.style == RegistrationStyle::Legacy)
    }

    /// A registered plugin's command names split by registration style.
    /// Empty for unknown plugins.
    pub async fn get_plugin_commands(&self, name: &str) -> PluginCommands {
        let Some(instance) = self
            .registry
            .read()
            .await
            .plugins
            .get(name)
            .map(|loaded| Arc::clone(&loaded.instance))
        else {
            return PluginCommands::default();
        };

        PluginCommands {
            commands: instance.commands().into_keys().collect(),
            cmd_handlers: instance.cmd_handlers().into_keys().collect(),
        }
    }

    /// Passes a non-command message to every plugin's observer. A failing
    /// observer is logged and does not stop the others.
    pub async fn handle_message(&self, message: &IncomingMessage) -> ObserverReport {
        let Some(transport) = self.transport().await else {
            return ObserverReport::default();
        };

        let plugins: Vec<Arc<dyn Plugin>> = self
            .registry
            .read()
            .await
            .plugins
            .values()
            .map(|loaded| Arc::clone(&loaded.instance))
            .collect();

        let mut report = ObserverReport::default();
        for plugin in plugins {
            report.invoked += 1;
            let result = AssertUnwindSafe(plugin.on_message(message, Arc::clone(&transport)))
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!("Plugin {} message handler failed: {:#}", plugin.name(), e);
                }
                Err(_) => {
                    report.failed += 1;
                    error!("Plugin {} message handler panicked", plugin.name());
                }
            }
        }
        report
    }

    /// Persists an alias and makes it active immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails; the alias is then not
    /// applied.
    pub async fn set_alias(&self, alias: &str, command: &str) -> Result<(), StoreError> {
        self.services.store.set_alias(alias, command)?;
        self.registry
            .write()
            .await
            .aliases
            .insert(alias.to_owned(), command.to_owned());
        info!("Alias set: {} -> {}", alias, command);
        Ok(())
    }

    /// Removes a persisted alias. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn remove_alias(&self, alias: &str) -> Result<bool, StoreError> {
        let stored = self.services.store.remove_alias(alias)?;
        let cached = self.registry.write().await.aliases.remove(alias).is_some();
        if stored || cached {
            info!("Alias removed: {}", alias);
        }
        Ok(stored || cached)
    }

    /// Persisted aliases, sorted.
    pub async fn get_aliases(&self) -> BTreeMap<String, String> {
        self.registry
            .read()
            .await
            .aliases
            .iter()
            .map(|(alias, command)| (alias.clone(), command.clone()))
            .collect()
    }

    /// Replaces a registered plugin with a fresh instance from its factory.
    /// Returns whether the plugin is registered again afterwards.
    pub async fn reload_plugin(&self, name: &str) -> bool {
        let Some((name, source)) = self
            .registry
            .read()
            .await
            .find_plugin(name)
            .map(|(key, loaded)| (key.clone(), loaded.source.clone()))
        else {
            return false;
        };

        self.unregister_plugin(&name).await;

        let Some(entry) = self.catalog.get(&source.name) else {
            error!("Plugin {} has no catalog entry {}", name, source.name);
            return false;
        };

        let result = match entry.instantiate(&self.plugin_context()) {
            Ok(plugin) => self.register_plugin(plugin, source).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                info!("Plugin reloaded: {}", name);
                true
            }
            Err(e) => {
                error!("Failed to reload plugin {}: {}", name, e);
                false
            }
        }
    }

    /// Reloads every registered plugin, one at a time.
    pub async fn reload_all(&self) -> ReloadSummary {
        let mut names: Vec<String> = self.registry.read().await.plugins.keys().cloned().collect();
        names.sort();

        let mut summary = ReloadSummary::default();
        for name in names {
            if self.reload_plugin(&name).await {
                summary.reloaded += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }

    /// Enables an external plugin from the catalog and registers it.
    ///
    /// # Errors
    ///
    /// Fails if the plugin is unknown, already registered, cannot be
    /// created or fails to initialize. The store is left disabled on
    /// failure.
    pub async fn install_plugin(&self, name: &str) -> Result<(), PluginError> {
        let entry = self
            .catalog
            .get(name)
            .filter(|entry| entry.origin.is_external())
            .ok_or_else(|| PluginError::NotFound(name.to_owned()))?;

        if self.registry.read().await.find_plugin(&entry.name).is_some() {
            return Err(PluginError::AlreadyInstalled(entry.name.clone()));
        }

        let plugin = entry.instantiate(&self.plugin_context())?;
        self.services.store.enable_plugin(&entry.name)?;

        if let Err(e) = self.register_plugin(plugin, entry.source()).await {
            if let Err(store_err) = self.services.store.disable_plugin(&entry.name) {
                warn!("Failed to roll back plugin {}: {}", entry.name, store_err);
            }
            return Err(e);
        }

        info!("Plugin installed: {}", entry.name);
        Ok(())
    }

    /// Unregisters an external plugin and disables it in the store.
    ///
    /// # Errors
    ///
    /// Fails for builtin or unregistered plugins.
    pub async fn uninstall_plugin(&self, name: &str) -> Result<(), PluginError> {
        let (name, origin) = self
            .registry
            .read()
            .await
            .find_plugin(name)
            .map(|(key, loaded)| (key.clone(), loaded.source.origin))
            .ok_or_else(|| PluginError::NotInstalled(name.to_owned()))?;

        if !origin.is_external() {
            return Err(PluginError::Builtin(name));
        }

        self.unregister_plugin(&name).await;
        self.services.store.disable_plugin(&name)?;
        info!("Plugin uninstalled: {}", name);
        Ok(())
    }

    /// Unregisters every plugin.
    pub async fn unload_all(&self) {
        let names: Vec<String> = self.registry.read().await.plugins.keys().cloned().collect();
        for name in names {
            self.unregister_plugin(&name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::commands::RateLimiter;
    use crate::health::HealthMonitor;
    use crate::plugins::types::legacy;
    use crate::storage::Database;
    use crate::transport::MemoryTransport;

    #[derive(Default)]
    struct Counters {
        init: AtomicUsize,
        unload: AtomicUsize,
        messages: AtomicUsize,
    }

    struct TestPlugin {
        name: &'static str,
        commands: Vec<(&'static str, Vec<&'static str>)>,
        legacy: Vec<&'static str>,
        counters: Arc<Counters>,
        fail_init: bool,
        fail_observer: bool,
    }

    impl TestPlugin {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                commands: Vec::new(),
                legacy: Vec::new(),
                counters: Arc::new(Counters::default()),
                fail_init: false,
                fail_observer: false,
            }
        }

        fn command(mut self, name: &'static str, aliases: &[&'static str]) -> Self {
            self.commands.push((name, aliases.to_vec()));
            self
        }

        fn legacy(mut self, name: &'static str) -> Self {
            self.legacy.push(name);
            self
        }

        fn counters(mut self, counters: &Arc<Counters>) -> Self {
            self.counters = Arc::clone(counters);
            self
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test"
        }

        fn commands(&self) -> BTreeMap<String, CommandDefinition> {
            self.commands
                .iter()
                .map(|(name, aliases)| {
                    let definition =
                        CommandDefinition::new(format!("{name} description"), |_, _, _| async {
                            Ok(())
                        })
                        .with_aliases(aliases.iter().copied());
                    ((*name).to_owned(), definition)
                })
                .collect()
        }

        fn cmd_handlers(&self) -> BTreeMap<String, crate::plugins::LegacyFn> {
            self.legacy
                .iter()
                .map(|name| ((*name).to_owned(), legacy(|_, _| async { Ok(()) })))
                .collect()
        }

        async fn on_init(&self, _transport: Arc<dyn Transport>) -> anyhow::Result<()> {
            self.counters.init.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                anyhow::bail!("init exploded");
            }
            Ok(())
        }

        async fn on_unload(&self) -> anyhow::Result<()> {
            self.counters.unload.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_message(
            &self,
            _message: &IncomingMessage,
            _transport: Arc<dyn Transport>,
        ) -> anyhow::Result<()> {
            self.counters.messages.fetch_add(1, Ordering::SeqCst);
            if self.fail_observer {
                anyhow::bail!("observer exploded");
            }
            Ok(())
        }
    }

    fn services() -> Services {
        Services {
            store: Arc::new(Database::open_in_memory().unwrap()),
            health: Arc::new(HealthMonitor::new()),
            limiter: Arc::new(RateLimiter::default()),
            prefix: ".".to_owned(),
        }
    }

    async fn manager_with(catalog: PluginCatalog) -> Arc<PluginManager> {
        let manager = PluginManager::new(services(), catalog).unwrap();
        manager.set_transport(Arc::new(MemoryTransport::new())).await;
        manager
    }

    async fn manager() -> Arc<PluginManager> {
        manager_with(PluginCatalog::new()).await
    }

    async fn register(manager: &PluginManager, plugin: TestPlugin) {
        let name = plugin.name;
        manager
            .register_plugin(Arc::new(plugin), PluginSource::builtin(name))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_registration_symmetry() {
        let manager = manager().await;
        register(
            &manager,
            TestPlugin::new("tools")
                .command("echo", &["say", "repeat"])
                .legacy("weather"),
        )
        .await;

        for trigger in ["echo", "say", "repeat", "weather"] {
            let resolved = manager.get_command(trigger).await.unwrap();
            assert_eq!(resolved.plugin, "tools", "trigger {trigger}");
        }

        assert!(manager.unregister_plugin("tools").await);
        for trigger in ["echo", "say", "repeat", "weather"] {
            assert!(manager.get_command(trigger).await.is_none(), "trigger {trigger}");
        }
        assert!(manager.get_plugin("tools").await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_keeps_reclaimed_keys() {
        let manager = manager().await;
        register(&manager, TestPlugin::new("first").command("ping", &[])).await;
        register(&manager, TestPlugin::new("second").command("ping", &[])).await;

        manager.unregister_plugin("first").await;
        let resolved = manager.get_command("ping").await.unwrap();
        assert_eq!(resolved.plugin, "second");
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let counters = Arc::new(Counters::default());
        let manager = manager().await;

        register(
            &manager,
            TestPlugin::new("tools").command("old", &["o"]).counters(&counters),
        )
        .await;
        register(
            &manager,
            TestPlugin::new("tools").command("new", &[]).counters(&counters),
        )
        .await;

        assert_eq!(manager.get_all_plugins().await.len(), 1);
        assert_eq!(counters.init.load(Ordering::SeqCst), 2);
        assert_eq!(counters.unload.load(Ordering::SeqCst), 1);
        assert!(manager.get_command("old").await.is_none());
        assert!(manager.get_command("o").await.is_none());
        assert!(manager.get_command("new").await.is_some());
        assert_eq!(manager.get_all_commands().await.len(), 1);
    }

    #[tokio::test]
    async fn test_persisted_alias_precedence() {
        let manager = manager().await;
        register(&manager, TestPlugin::new("weather").command("weather", &[])).await;
        register(&manager, TestPlugin::new("w").command("w", &[])).await;

        manager.set_alias("w", "weather").await.unwrap();
        let via_alias = manager.get_command("w").await.unwrap();
        let direct = manager.get_command("weather").await.unwrap();
        assert!(Arc::ptr_eq(&via_alias.definition, &direct.definition));
        assert_eq!(via_alias.plugin, "weather");

        // Alias lookup is case-insensitive too.
        assert_eq!(manager.get_command("W").await.unwrap().plugin, "weather");

        assert!(manager.remove_alias("w").await.unwrap());
        assert_eq!(manager.get_command("w").await.unwrap().plugin, "w");
        assert!(!manager.remove_alias("w").await.unwrap());
    }

    #[tokio::test]
    async fn test_aliases_loaded_from_store() {
        let services = services();
        services.store.set_alias("p", "ping").unwrap();

        let manager = PluginManager::new(services, PluginCatalog::new()).unwrap();
        register(&manager, TestPlugin::new("core").command("ping", &[])).await;

        assert_eq!(manager.get_aliases().await.get("p").map(String::as_str), Some("ping"));
        assert_eq!(manager.get_command("p").await.unwrap().trigger, "ping");
    }

    #[tokio::test]
    async fn test_case_insensitive_fallback() {
        let manager = manager().await;
        register(&manager, TestPlugin::new("core").command("foo", &[])).await;

        let exact = manager.get_command("foo").await.unwrap();
        for variant in ["FOO", "Foo"] {
            let resolved = manager.get_command(variant).await.unwrap();
            assert!(Arc::ptr_eq(&resolved.definition, &exact.definition));
        }
        assert!(manager.get_plugin("CORE").await.is_some());
    }

    #[tokio::test]
    async fn test_case_insensitive_fallback_is_deterministic() {
        let manager = manager().await;
        register(&manager, TestPlugin::new("upper").command("Zed", &[])).await;
        register(&manager, TestPlugin::new("shout").command("ZED", &[])).await;
        manager.set_alias("Go", "Zed").await.unwrap();
        manager.set_alias("GO", "ZED").await.unwrap();

        for _ in 0..8 {
            let resolved = manager.get_command("zed").await.unwrap();
            assert_eq!(resolved.trigger, "ZED");
            assert_eq!(resolved.plugin, "shout");

            let via_alias = manager.get_command("go").await.unwrap();
            assert_eq!(via_alias.trigger, "ZED");
        }
    }

    #[tokio::test]
    async fn test_observer_isolation() {
        let failing = Arc::new(Counters::default());
        let healthy = Arc::new(Counters::default());
        let manager = manager().await;

        let mut bad = TestPlugin::new("bad").counters(&failing);
        bad.fail_observer = true;
        register(&manager, bad).await;
        register(&manager, TestPlugin::new("good").counters(&healthy)).await;

        let report = manager.handle_message(&IncomingMessage::new(1, 1, "hi")).await;
        assert_eq!(report, ObserverReport { invoked: 2, failed: 1 });
        assert!(!report.is_success());
        assert_eq!(failing.messages.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.messages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_transport_skips_init_and_observers() {
        let counters = Arc::new(Counters::default());
        let manager = PluginManager::new(services(), PluginCatalog::new()).unwrap();
        register(&manager, TestPlugin::new("quiet").counters(&counters)).await;

        let report = manager.handle_message(&IncomingMessage::new(1, 1, "hi")).await;
        assert_eq!(report, ObserverReport::default());
        assert_eq!(counters.init.load(Ordering::SeqCst), 0);
        assert_eq!(counters.messages.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_init_failure_leaves_plugin_absent() {
        let manager = manager().await;
        let mut plugin = TestPlugin::new("fragile").command("boom", &[]);
        plugin.fail_init = true;

        let result = manager
            .register_plugin(Arc::new(plugin), PluginSource::builtin("fragile"))
            .await;
        assert!(matches!(result, Err(PluginError::Init { .. })));
        assert!(manager.get_plugin("fragile").await.is_none());
        assert!(manager.get_command("boom").await.is_none());
    }

    #[tokio::test]
    async fn test_cmd_handler_split() {
        let manager = manager().await;
        register(
            &manager,
            TestPlugin::new("mixed")
                .command("modern", &["m"])
                .legacy("classic"),
        )
        .await;

        assert!(manager.is_cmd_handler_command("classic").await);
        assert!(!manager.is_cmd_handler_command("modern").await);
        assert!(!manager.is_cmd_handler_command("m").await);
        assert!(!manager.is_cmd_handler_command("missing").await);

        let split = manager.get_plugin_commands("mixed").await;
        assert_eq!(split.commands, vec!["modern"]);
        assert_eq!(split.cmd_handlers, vec!["classic"]);
        assert_eq!(
            manager.get_plugin_commands("missing").await,
            PluginCommands::default()
        );

        let description = &manager.get_command("classic").await.unwrap().definition.description;
        assert_eq!(description, "classic command");
    }

    #[tokio::test]
    async fn test_load_builtins_isolates_failures() {
        let catalog = PluginCatalog::new()
            .builtin("one", |_| Ok(Arc::new(TestPlugin::new("one").command("a", &[]))))
            .builtin("broken", |_| Err(anyhow::anyhow!("factory failed")))
            .builtin("two", |_| Ok(Arc::new(TestPlugin::new("two").command("b", &[]))));

        let manager = manager_with(catalog).await;
        assert_eq!(manager.load_builtins().await, 2);
        assert!(manager.get_command("a").await.is_some());
        assert!(manager.get_command("b").await.is_some());
    }

    #[tokio::test]
    async fn test_load_externals_respects_store() {
        let catalog = PluginCatalog::new()
            .external("enabled", |_| Ok(Arc::new(TestPlugin::new("enabled"))))
            .external("disabled", |_| Ok(Arc::new(TestPlugin::new("disabled"))));

        let manager = manager_with(catalog).await;
        manager.services().store.enable_plugin("enabled").unwrap();

        assert_eq!(manager.load_externals().await, 1);
        assert!(manager.get_plugin("enabled").await.is_some());
        assert!(manager.get_plugin("disabled").await.is_none());

        let summaries = manager.list_plugins().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].origin, PluginOrigin::External);
    }

    #[tokio::test]
    async fn test_reload_creates_fresh_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let catalog = PluginCatalog::new().builtin("core", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(TestPlugin::new("core").command("ping", &[])))
        });

        let manager = manager_with(catalog).await;
        manager.load_builtins().await;
        assert_eq!(created.load(Ordering::SeqCst), 1);

        assert!(manager.reload_plugin("Core").await);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(manager.get_command("ping").await.is_some());

        assert!(!manager.reload_plugin("unknown").await);
        assert_eq!(
            manager.reload_all().await,
            ReloadSummary {
                reloaded: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_install_and_uninstall() {
        let catalog = PluginCatalog::new()
            .builtin("core", |_| Ok(Arc::new(TestPlugin::new("core"))))
            .external("weather", |_| {
                Ok(Arc::new(TestPlugin::new("weather").command("weather", &["w"])))
            });

        let manager = manager_with(catalog).await;
        manager.load_builtins().await;

        manager.install_plugin("weather").await.unwrap();
        assert!(manager.services().store.is_plugin_enabled("weather").unwrap());
        assert!(manager.get_command("w").await.is_some());
        assert!(matches!(
            manager.install_plugin("weather").await,
            Err(PluginError::AlreadyInstalled(_))
        ));
        assert!(matches!(
            manager.install_plugin("core").await,
            Err(PluginError::NotFound(_))
        ));

        assert!(matches!(
            manager.uninstall_plugin("core").await,
            Err(PluginError::Builtin(_))
        ));
        manager.uninstall_plugin("weather").await.unwrap();
        assert!(!manager.services().store.is_plugin_enabled("weather").unwrap());
        assert!(manager.get_command("weather").await.is_none());
        assert!(matches!(
            manager.uninstall_plugin("weather").await,
            Err(PluginError::NotInstalled(_))
        ));
    }

    #[tokio::test]
    async fn test_unload_all_runs_hooks() {
        let counters = Arc::new(Counters::default());
        let manager = manager().await;
        register(&manager, TestPlugin::new("a").counters(&counters)).await;
        register(&manager, TestPlugin::new("b").counters(&counters)).await;

        manager.unload_all().await;
        assert_eq!(counters.unload.load(Ordering::SeqCst), 2);
        assert!(manager.get_all_plugins().await.is_empty());
    }
}
