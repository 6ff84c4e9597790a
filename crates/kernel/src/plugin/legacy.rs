//! Support for legacy plugins that predate `plugin.json`.
//!
//! Legacy plugins are recognised by file naming (`*Plugin.php`, `config.php`)
//! under a fixed set of categories. Their metadata lives in a PHP array
//! literal (`$info = array(...)` or `$info = [...]`) and is read with regular
//! expressions. This is best-effort: the results are only trusted for display.
//!
//! Their lifecycle state historically lived in one flat JSON file shared by
//! all legacy plugins. That file is now only an import source and a
//! compatibility mirror; the relational table is authoritative once a row
//! exists (see [`super::registry`]).

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use quill_sdk::schema::{FieldDef, FieldType};
use regex::Regex;
use serde_json::{Value, json};
use tracing::warn;

use super::descriptor::{LifecycleState, PluginStatus};

/// Categories whose subdirectories may hold legacy plugins.
pub const LEGACY_CATEGORIES: &[&str] = &["payment", "sms", "email", "certification"];

/// Legacy config-schema file name.
pub const LEGACY_CONFIG_FILE: &str = "config.php";

/// Suffix of legacy implementation files.
pub const LEGACY_PLUGIN_SUFFIX: &str = "Plugin.php";

#[allow(clippy::expect_used)]
static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex literal"));

#[allow(clippy::expect_used)]
static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(^|[\s,;(\[])(?://|#)[^\n]*").expect("valid regex literal"));

#[allow(clippy::expect_used)]
static INFO_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$info\s*=\s*(?:array\s*\(|\[)").expect("valid regex literal")
});

#[allow(clippy::expect_used)]
static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"](\w+)['"]\s*=>\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#)
        .expect("valid regex literal")
});

#[allow(clippy::expect_used)]
static ENTRY_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"](\w+)['"]\s*=>\s*(?:array\s*\(|\[)"#).expect("valid regex literal")
});

#[allow(clippy::expect_used)]
static NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*namespace\s+([A-Za-z0-9_\\]+)\s*;").expect("valid regex literal")
});

/// Display metadata recovered from legacy source text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub namespace: Option<String>,
}

/// Reads metadata and config schema from legacy plugin source.
///
/// Implementations must never fail hard; `None`/empty results make the
/// caller fall back to the plugin id.
pub trait LegacyMetadataReader: Send + Sync {
    /// Metadata from an implementation file, if an `$info` literal is found.
    fn read_metadata(&self, source: &str) -> Option<LegacyMetadata>;

    /// Declared config fields from a `config.php`.
    fn read_schema(&self, source: &str) -> Vec<FieldDef>;
}

/// Regex-based reader for PHP array literals.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhpArrayMetadataReader;

impl LegacyMetadataReader for PhpArrayMetadataReader {
    fn read_metadata(&self, source: &str) -> Option<LegacyMetadata> {
        let namespace = read_namespace(source);

        let stripped = strip_comments(source);
        let start = INFO_START.find(&stripped)?;
        let body = balanced_body(&stripped, start.end())?;
        let pairs = key_values(body);

        let pick = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| pairs.get(*k).filter(|v| !v.is_empty()).cloned())
        };

        let metadata = LegacyMetadata {
            name: pick(&["title", "name"]),
            version: pick(&["version"]),
            description: pick(&["description", "desc"]),
            author: pick(&["author"]),
            namespace,
        };

        if metadata.name.is_none() && metadata.version.is_none() && metadata.description.is_none()
        {
            return None;
        }
        Some(metadata)
    }

    fn read_schema(&self, source: &str) -> Vec<FieldDef> {
        let stripped = strip_comments(source);
        let mut fields = Vec::new();
        let mut consumed_until = 0;

        for caps in ENTRY_START.captures_iter(&stripped) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() < consumed_until {
                continue;
            }
            let Some(body) = balanced_body(&stripped, whole.end()) else {
                continue;
            };
            let pairs = key_values(body);
            if !["type", "title", "label"].iter().any(|k| pairs.contains_key(*k)) {
                continue;
            }
            consumed_until = whole.end() + body.len();

            let mut field = FieldDef::new(
                &caps[1],
                FieldType::from_name(pairs.get("type").map(String::as_str).unwrap_or("")),
            );
            if let Some(label) = pairs.get("title").or_else(|| pairs.get("label")) {
                field.label = label.clone();
            }
            if let Some(value) = pairs.get("value").filter(|v| !v.is_empty()) {
                field.default = Some(Value::String(value.clone()));
            }
            fields.push(field);
        }

        fields
    }
}

/// Remove PHP comments. Line comments are only recognised after whitespace or
/// punctuation so that `https://` inside string literals survives.
fn strip_comments(source: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(source, "");
    LINE_COMMENT.replace_all(&without_blocks, "$1").into_owned()
}

/// Text between an opening bracket (ending at `open_end`) and its matching
/// close, skipping quoted strings.
fn balanced_body(source: &str, open_end: usize) -> Option<&str> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in source.get(open_end..)?.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return source.get(open_end..open_end + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Scalar string pairs of an array body; the first occurrence of a key wins.
fn key_values(body: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    for caps in KEY_VALUE.captures_iter(body) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().replace("\\'", "'").replace("\\\"", "\""))
            .unwrap_or_default();
        pairs.entry(caps[1].to_string()).or_insert(value);
    }
    pairs
}

/// Extract the namespace declaration of a PHP source file.
pub fn read_namespace(source: &str) -> Option<String> {
    NAMESPACE
        .captures(source)
        .map(|c| c[1].trim_matches('\\').to_string())
}

/// The flat `{pluginId: {installed, status}}` file used by legacy plugins.
#[derive(Debug, Clone)]
pub struct LegacyStateFile {
    path: PathBuf,
}

impl LegacyStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// All entries. A missing file is empty; an unreadable or corrupt file is
    /// logged and treated as empty.
    pub fn load(&self) -> BTreeMap<String, LifecycleState> {
        let entries = match self.read_entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring legacy state file");
                return BTreeMap::new();
            }
        };
        entries
            .into_iter()
            .map(|(id, entry)| (id, parse_entry(&entry)))
            .collect()
    }

    /// Write one plugin's entry, keeping every other entry as it was. A file
    /// that cannot be read or parsed is left alone.
    pub fn set(&self, id: &str, state: LifecycleState) -> Result<()> {
        let mut entries = self.read_entries().with_context(|| {
            format!("refusing to rewrite legacy state file {}", self.path.display())
        })?;
        entries.insert(
            id.to_string(),
            json!({ "installed": state.installed, "status": state.status.as_str() }),
        );

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let rendered = serde_json::to_string_pretty(&entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, rendered)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// Raw entries; a missing or blank file has none.
    fn read_entries(&self) -> Result<BTreeMap<String, Value>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        let content = content.trim_start_matches('\u{feff}');
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(content)
            .with_context(|| format!("{} is not a JSON object of plugin entries", self.path.display()))
    }
}

fn parse_entry(entry: &Value) -> LifecycleState {
    let installed = match entry.get("installed") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(Value::String(s)) => matches!(s.as_str(), "1" | "true"),
        _ => false,
    };
    let status = entry
        .get("status")
        .and_then(PluginStatus::from_json)
        .unwrap_or_default();
    LifecycleState::new(installed, status).normalized()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use quill_test_utils::{TestDir, legacy};

    #[test]
    fn reads_info_array_with_comments() {
        let src = legacy::plugin_source("Alipay", "Alipay Payments", "2.1.0", "Pay with Alipay");
        let meta = PhpArrayMetadataReader.read_metadata(&src).unwrap();

        assert_eq!(meta.name.as_deref(), Some("Alipay Payments"));
        assert_eq!(meta.version.as_deref(), Some("2.1.0"));
        assert_eq!(meta.description.as_deref(), Some("Pay with Alipay"));
        assert_eq!(meta.namespace.as_deref(), Some("plugins\\legacy"));
    }

    #[test]
    fn reads_short_array_syntax() {
        let src = r#"<?php
class SmsPlugin {
    public $info = [
        "title" => "Aliyun SMS", # provider
        "version" => "1.0",
        "url" => "https://dysms.example.com/path",
    ];
}"#;
        let meta = PhpArrayMetadataReader.read_metadata(src).unwrap();
        assert_eq!(meta.name.as_deref(), Some("Aliyun SMS"));
        assert_eq!(meta.version.as_deref(), Some("1.0"));
    }

    #[test]
    fn commented_out_values_are_ignored() {
        let src = r#"<?php
$info = array(
    // 'title' => 'Old Name',
    'title' => 'New Name',
);"#;
        let meta = PhpArrayMetadataReader.read_metadata(src).unwrap();
        assert_eq!(meta.name.as_deref(), Some("New Name"));
    }

    #[test]
    fn missing_info_literal_is_not_fatal() {
        assert!(PhpArrayMetadataReader.read_metadata("<?php class X {}").is_none());
        assert!(PhpArrayMetadataReader.read_metadata("$info = array(").is_none());
    }

    #[test]
    fn reads_config_schema() {
        let fields = PhpArrayMetadataReader.read_schema(&legacy::config_source());
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "app_id");
        assert_eq!(fields[0].label, "App ID");
        assert_eq!(fields[1].name, "app_secret");
        assert!(fields[1].is_password());
    }

    #[test]
    fn state_file_missing_is_empty() {
        let dir = TestDir::new("legacy_missing");
        let file = LegacyStateFile::new(dir.join("plugins.json"));
        assert!(file.load().is_empty());
        assert!(!file.path.exists());
    }

    #[test]
    fn state_file_set_keeps_other_entries() {
        let dir = TestDir::new("legacy_set");
        let path = dir.join("storage").join("plugins.json");
        let file = LegacyStateFile::new(&path);

        file.set("sms/aliyun", LifecycleState::new(true, PluginStatus::Enabled))
            .unwrap();
        file.set("payment/alipay", LifecycleState::new(true, PluginStatus::Disabled))
            .unwrap();

        let all = file.load();
        assert_eq!(all.len(), 2);
        assert!(all["sms/aliyun"].is_enabled());
        assert_eq!(all["payment/alipay"].status, PluginStatus::Disabled);
    }

    #[test]
    fn state_file_accepts_loose_values() {
        let dir = TestDir::new("legacy_loose");
        let path = dir.join("plugins.json");
        std::fs::write(&path, r#"{"email/smtp": {"installed": 1, "status": 1}}"#).unwrap();

        let all = LegacyStateFile::new(&path).load();
        assert!(all["email/smtp"].is_enabled());
    }

    #[test]
    fn corrupt_state_file_is_empty() {
        let dir = TestDir::new("legacy_corrupt");
        let path = dir.join("plugins.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(LegacyStateFile::new(&path).load().is_empty());
    }

    #[test]
    fn corrupt_state_file_is_not_overwritten() {
        let dir = TestDir::new("legacy_corrupt_set");
        let path = dir.join("plugins.json");
        std::fs::write(&path, r#"{"sms/aliyun": {"installed": true,"#).unwrap();

        let file = LegacyStateFile::new(&path);
        let err = file
            .set("payment/alipay", LifecycleState::new(true, PluginStatus::Enabled))
            .unwrap_err();
        assert!(err.to_string().contains("refusing to rewrite"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{"sms/aliyun": {"installed": true,"#
        );
    }
}
