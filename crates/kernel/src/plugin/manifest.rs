//! Parser and writer for modern plugin `plugin.json` manifests.
//!
//! A manifest carries static metadata (name, version, entry points, scripts)
//! and a cached copy of the lifecycle state. Hand-edited manifests are common,
//! so every field is parsed loosely: numbers where strings are expected,
//! `1`/`0` for booleans, camelCase aliases. A manifest that is not valid JSON
//! at all is treated as empty metadata rather than an error.

use std::path::Path;

use anyhow::{Context, Result};
use quill_sdk::schema::FieldDef;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use super::descriptor::{LifecycleState, PluginStatus};

/// File name of a modern plugin manifest.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Implementation file assumed when a manifest does not name one.
pub const DEFAULT_MAIN_FILE: &str = "Main.php";

/// Plugin metadata parsed from `plugin.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Manifest {
    #[serde(alias = "title", deserialize_with = "loose_string")]
    pub name: String,

    #[serde(deserialize_with = "loose_string")]
    pub version: String,

    #[serde(deserialize_with = "loose_string")]
    pub description: String,

    #[serde(deserialize_with = "loose_string")]
    pub author: String,

    #[serde(alias = "homepage", alias = "url", deserialize_with = "loose_string")]
    pub website: String,

    /// Declared kind: `verification`, `app`, or empty.
    #[serde(rename = "type", deserialize_with = "loose_string")]
    pub kind: String,

    /// Explicit mutual-exclusion scope for verification plugins.
    #[serde(alias = "group", deserialize_with = "loose_string")]
    pub category: String,

    #[serde(deserialize_with = "loose_string")]
    pub namespace: String,

    /// Implementation file relative to the plugin directory.
    #[serde(alias = "main_file", alias = "mainFile", deserialize_with = "loose_string")]
    pub main: String,

    /// Implementation class name (defaults to the file stem of `main`).
    #[serde(alias = "main_class", alias = "mainClass", deserialize_with = "loose_string")]
    pub class: String,

    #[serde(alias = "frontendEntry", deserialize_with = "loose_string")]
    pub frontend_entry: String,

    #[serde(alias = "adminEntry", deserialize_with = "loose_string")]
    pub admin_entry: String,

    #[serde(
        alias = "install",
        alias = "installSql",
        alias = "install_script",
        deserialize_with = "loose_string"
    )]
    pub install_sql: String,

    #[serde(
        alias = "uninstall",
        alias = "uninstallSql",
        alias = "uninstall_script",
        deserialize_with = "loose_string"
    )]
    pub uninstall_sql: String,

    /// Configuration fields, as an array of field objects or an object keyed
    /// by field name. Used when no extension supplies a schema.
    #[serde(alias = "fields", alias = "settings", deserialize_with = "loose_fields")]
    pub config: Vec<FieldDef>,

    #[serde(deserialize_with = "loose_bool")]
    pub installed: bool,

    #[serde(deserialize_with = "loose_status")]
    pub status: PluginStatus,
}

impl Manifest {
    /// Read a manifest file.
    ///
    /// Returns an error only when the file cannot be read; malformed content
    /// yields an empty manifest.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plugin manifest: {}", path.display()))?;

        Ok(Self::parse_str(&content, path))
    }

    /// Parse manifest JSON, degrading to an empty manifest on bad input.
    pub fn parse_str(content: &str, path: &Path) -> Self {
        // Manifests saved by some editors start with a byte-order mark.
        let content = content.trim_start_matches('\u{feff}');
        match serde_json::from_str::<Manifest>(content) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "plugin manifest is not valid, treating metadata as empty"
                );
                Self::default()
            }
        }
    }

    /// Cached lifecycle state recorded in the manifest.
    pub fn lifecycle(&self) -> LifecycleState {
        LifecycleState::new(self.installed, self.status).normalized()
    }
}

/// Rewrite the `installed`/`status` keys of a manifest, keeping every other
/// key untouched. The file is replaced atomically via a sibling temp file.
pub fn write_state(path: &Path, state: LifecycleState) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plugin manifest: {}", path.display()))?;

    let mut doc: Value = serde_json::from_str(content.trim_start_matches('\u{feff}'))
        .with_context(|| format!("refusing to rewrite unparsable manifest {}", path.display()))?;

    let Some(obj) = doc.as_object_mut() else {
        anyhow::bail!("manifest {} is not a JSON object", path.display());
    };
    obj.insert("installed".to_string(), Value::Bool(state.installed));
    obj.insert(
        "status".to_string(),
        Value::String(state.status.as_str().to_string()),
    );

    let rendered = serde_json::to_string_pretty(&doc)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, rendered)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace manifest {}", path.display()))?;

    Ok(())
}

fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    })
}

fn loose_fields<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<FieldDef>, D::Error> {
    let entries: Vec<Value> = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .map(|(name, mut def)| {
                if let Some(obj) = def.as_object_mut() {
                    obj.entry("name").or_insert(Value::String(name));
                }
                def
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<FieldDef>(entry).ok())
        .collect())
}

fn loose_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PluginStatus, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(PluginStatus::from_json(&value).unwrap_or_default())
}
