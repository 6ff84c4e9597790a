//! Shared helpers for plugin integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use quill_kernel::plugin::{
    ActionOutcome, ExtensionRegistry, LifecycleState, MemoryPluginRepository, PluginError,
    PluginManager, PluginRecord, PluginSettings, SqlMigrationRunner, substitute_prefix,
};
use quill_sdk::prelude::*;
use quill_test_utils::PluginTree;
use serde_json::Value;

/// Table prefix used by every harness.
pub const PREFIX: &str = "qa_";

/// A migration run captured by [`RecordingMigrationRunner`].
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub plugin: String,
    pub script: PathBuf,
    pub sql: String,
}

/// Records scripts instead of executing them; can be told to fail.
#[derive(Default)]
pub struct RecordingMigrationRunner {
    runs: Mutex<Vec<RecordedRun>>,
    fail: AtomicBool,
}

impl RecordingMigrationRunner {
    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().clone()
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SqlMigrationRunner for RecordingMigrationRunner {
    async fn run(&self, plugin: &str, script: &Path, table_prefix: &str) -> Result<(), PluginError> {
        let sql = std::fs::read_to_string(script).map_err(|_| PluginError::MigrationFileNotFound {
            plugin: plugin.to_string(),
            path: script.display().to_string(),
        })?;
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(PluginError::migration_failed(
                plugin,
                script.display().to_string(),
                "relation already exists",
            ));
        }
        self.runs.lock().push(RecordedRun {
            plugin: plugin.to_string(),
            script: script.to_path_buf(),
            sql: substitute_prefix(&sql, table_prefix),
        });
        Ok(())
    }
}

/// A verification extension whose challenge passes when `value` equals the
/// configured `secret`.
pub struct FakeCaptcha;

impl Extension for FakeCaptcha {
    fn configurable(&self) -> Option<&dyn ConfigurableExtension> {
        Some(self)
    }

    fn verification(&self) -> Option<&dyn VerificationExtension> {
        Some(self)
    }
}

impl ConfigurableExtension for FakeCaptcha {
    fn schema(&self) -> Result<Vec<FieldDef>, ExtensionError> {
        Ok(vec![
            FieldDef::new("site_key", FieldType::Text).with_label("Site Key"),
            FieldDef::new("api_key", FieldType::Password).with_label("API Key"),
        ])
    }
}

impl VerificationExtension for FakeCaptcha {
    fn render_challenge(&self, config: &ConfigMap) -> Result<String, ExtensionError> {
        let site_key = config.get("site_key").and_then(Value::as_str).unwrap_or_default();
        Ok(format!(r#"<div class="captcha" data-key="{site_key}"></div>"#))
    }

    fn verify(&self, config: &ConfigMap, _token: &str, value: &str) -> Result<bool, ExtensionError> {
        Ok(config.get("api_key").and_then(Value::as_str) == Some(value))
    }
}

/// An extension whose schema lookup always fails.
pub struct BrokenSchema;

impl Extension for BrokenSchema {
    fn configurable(&self) -> Option<&dyn ConfigurableExtension> {
        Some(self)
    }
}

impl ConfigurableExtension for BrokenSchema {
    fn schema(&self) -> Result<Vec<FieldDef>, ExtensionError> {
        Err(ExtensionError::Failed("schema file missing".to_string()))
    }
}

/// Plugin tree, stores, and a manager wired together.
pub struct Harness {
    pub tree: PluginTree,
    pub repo: Arc<MemoryPluginRepository>,
    pub runner: Arc<RecordingMigrationRunner>,
    pub extensions: Arc<ExtensionRegistry>,
    pub manager: PluginManager,
}

impl Harness {
    pub fn new(name: &str) -> Self {
        let extensions = ExtensionRegistry::new();
        extensions.register("plugins\\test\\Main", |_| {
            Ok(Arc::new(FakeCaptcha) as Arc<dyn Extension>)
        });
        extensions.register("BrokenSchema", |_| Ok(Arc::new(BrokenSchema) as Arc<dyn Extension>));
        Self::with_extensions(name, extensions)
    }

    /// A harness wired like the `quill` binary: no extension factories.
    pub fn without_extensions(name: &str) -> Self {
        Self::with_extensions(name, ExtensionRegistry::new())
    }

    fn with_extensions(name: &str, extensions: ExtensionRegistry) -> Self {
        let tree = PluginTree::new(name);
        let settings =
            PluginSettings::new(tree.root(), tree.state_file()).with_table_prefix(PREFIX);
        let repo = Arc::new(MemoryPluginRepository::new());
        let runner = Arc::new(RecordingMigrationRunner::default());
        let extensions = Arc::new(extensions);

        let manager = PluginManager::new(
            settings,
            repo.clone(),
            runner.clone(),
            Arc::clone(&extensions),
        );
        Self {
            tree,
            repo,
            runner,
            extensions,
            manager,
        }
    }

    pub fn row(&self, id: &str) -> Option<PluginRecord> {
        self.repo.records().into_iter().find(|r| r.id == id)
    }

    pub fn row_state(&self, id: &str) -> Option<LifecycleState> {
        self.row(id).map(|r| r.lifecycle())
    }

    /// `(installed, status)` as written in the manifest.
    pub fn manifest_state(&self, id: &str) -> (Value, Value) {
        let manifest = self.tree.read_manifest(id);
        (manifest["installed"].clone(), manifest["status"].clone())
    }

    pub fn stored_config(&self, id: &str) -> Value {
        self.row(id)
            .and_then(|r| r.config)
            .map(|c| serde_json::from_str(&c).unwrap())
            .unwrap_or(Value::Null)
    }
}

/// Panic with the outcome's message unless it succeeded.
pub fn assert_ok(outcome: &ActionOutcome) {
    assert!(outcome.success, "operation failed: {}", outcome.message);
}
