//! Persistent store for plugin state, aliases, permissions and plugin data.
//!
//! Backed by SQLite. The manager only needs enablement and alias state;
//! plugins additionally use the generic JSON key/value table.

mod database;

pub use database::{Database, PluginRecord, StoreError};
