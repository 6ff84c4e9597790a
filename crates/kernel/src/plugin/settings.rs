//! Settings consumed by the plugin subsystem.

use std::path::PathBuf;

use super::legacy::LEGACY_CATEGORIES;
use super::manifest::MANIFEST_FILE;

/// Paths and switches for plugin discovery and state storage.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    /// Plugin root directory.
    pub plugins_dir: PathBuf,

    /// Manifest file name looked for in each plugin directory.
    pub manifest_file: String,

    /// Legacy flat state file.
    pub legacy_state_file: PathBuf,

    /// Table-name prefix substituted into migrations and used for the
    /// plugin table.
    pub table_prefix: String,

    /// Keep writing the legacy flat file after its entries were imported.
    pub legacy_state_mirror: bool,

    /// Top-level directories scanned for legacy plugins.
    pub legacy_categories: Vec<String>,
}

impl PluginSettings {
    /// Settings with defaults for everything but the two paths.
    pub fn new(plugins_dir: impl Into<PathBuf>, legacy_state_file: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            manifest_file: MANIFEST_FILE.to_string(),
            legacy_state_file: legacy_state_file.into(),
            table_prefix: String::new(),
            legacy_state_mirror: true,
            legacy_categories: LEGACY_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Set the table prefix.
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Turn the legacy flat-file mirror on or off.
    pub fn with_legacy_mirror(mut self, enabled: bool) -> Self {
        self.legacy_state_mirror = enabled;
        self
    }
}
