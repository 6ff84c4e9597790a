//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::plugin::{PluginSettings, validate_table_prefix};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 5).
    pub database_max_connections: u32,

    /// Path to plugins directory (default: ./plugins).
    pub plugins_dir: PathBuf,

    /// Legacy flat state file (default: ./storage/plugins.json).
    pub plugin_state_file: PathBuf,

    /// Prefix for the plugin table and migration placeholders (default: empty).
    pub table_prefix: String,

    /// Keep writing the legacy flat state file (default: true).
    pub legacy_state_mirror: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url =
            lookup("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let plugins_dir = lookup("PLUGINS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./plugins"));

        let plugin_state_file = lookup("PLUGIN_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./storage/plugins.json"));

        let table_prefix = lookup("TABLE_PREFIX").unwrap_or_default();
        validate_table_prefix(&table_prefix).context("TABLE_PREFIX is invalid")?;

        let legacy_state_mirror = match lookup("LEGACY_STATE_MIRROR") {
            None => true,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => anyhow::bail!("LEGACY_STATE_MIRROR must be a boolean, got '{other}'"),
            },
        };

        Ok(Self {
            database_url,
            database_max_connections,
            plugins_dir,
            plugin_state_file,
            table_prefix,
            legacy_state_mirror,
        })
    }

    /// Settings for the plugin subsystem.
    pub fn plugin_settings(&self) -> PluginSettings {
        PluginSettings::new(&self.plugins_dir, &self.plugin_state_file)
            .with_table_prefix(&self.table_prefix)
            .with_legacy_mirror(self.legacy_state_mirror)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/quill")]).unwrap();
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.plugins_dir, PathBuf::from("./plugins"));
        assert_eq!(config.plugin_state_file, PathBuf::from("./storage/plugins.json"));
        assert_eq!(config.table_prefix, "");
        assert!(config.legacy_state_mirror);
    }

    #[test]
    fn database_url_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn bad_prefix_is_rejected() {
        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/quill"),
            ("TABLE_PREFIX", "qa-"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("TABLE_PREFIX"));
    }

    #[test]
    fn plugin_settings_follow_config() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/quill"),
            ("TABLE_PREFIX", "qa_"),
            ("LEGACY_STATE_MIRROR", "off"),
            ("PLUGINS_DIR", "/srv/plugins"),
        ])
        .unwrap();
        let settings = config.plugin_settings();
        assert_eq!(settings.table_prefix, "qa_");
        assert!(!settings.legacy_state_mirror);
        assert_eq!(settings.plugins_dir, PathBuf::from("/srv/plugins"));
        assert_eq!(settings.manifest_file, "plugin.json");
    }
}
