//! Plugin system for Quill.
//!
//! This module handles:
//! - Discovering modern (manifest) and legacy (naming-convention) plugins
//! - Reconciling lifecycle state between the plugin table and file caches
//! - Install, uninstall, and toggle with SQL migrations
//! - Sanitized per-plugin configuration storage
//! - The in-process extension registry

pub mod cli;
mod config_store;
mod descriptor;
mod error;
mod extension;
mod legacy;
mod lifecycle;
mod locks;
mod manager;
mod manifest;
mod migration;
mod outcome;
mod reconcile;
mod registry;
mod repository;
pub mod sanitize;
mod scanner;
mod settings;

pub use config_store::ConfigStore;
pub use descriptor::{
    EntryPoints, LifecyclePhase, LifecycleState, MainClassRef, PluginDescriptor, PluginKind,
    PluginState, PluginStatus, ResolvedPlugin, STATUS_DISABLED, STATUS_ENABLED,
};
pub use error::{ErrorKind, PluginError};
pub use extension::{ExtensionFactory, ExtensionRegistry};
pub use legacy::{
    LEGACY_CATEGORIES, LegacyMetadata, LegacyMetadataReader, LegacyStateFile,
    PhpArrayMetadataReader,
};
pub use lifecycle::{LifecycleEngine, Transition};
pub use locks::PluginLocks;
pub use manager::{PluginManager, Verifier, normalize_id};
pub use manifest::{DEFAULT_MAIN_FILE, MANIFEST_FILE, Manifest};
pub use migration::{
    PREFIX_PLACEHOLDER, PgMigrationRunner, SqlMigrationRunner, substitute_prefix,
};
pub use outcome::ActionOutcome;
pub use reconcile::{LegacyReconciliation, Reconciliation, reconcile, reconcile_legacy};
pub use registry::PluginRegistry;
pub use repository::{
    MemoryPluginRepository, PgPluginRepository, PluginRecord, PluginRepository,
    validate_table_prefix,
};
pub use scanner::{ManifestScanner, plugin_id};
pub use settings::PluginSettings;
