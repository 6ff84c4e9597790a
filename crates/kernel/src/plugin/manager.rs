//! Operation boundary of the plugin subsystem.
//!
//! Every public operation returns an [`ActionOutcome`]; errors never escape.
//! Mutations hold the plugin's lock across read-validate-write and are
//! followed by a resync pass.

use std::sync::Arc;

use quill_sdk::extension::{ConfigMap, Extension, ExtensionError, VerificationExtension};
use quill_sdk::schema::FieldDef;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::config_store::ConfigStore;
use super::descriptor::{PluginDescriptor, ResolvedPlugin};
use super::error::PluginError;
use super::extension::ExtensionRegistry;
use super::legacy::{LegacyMetadataReader, LegacyStateFile, PhpArrayMetadataReader};
use super::lifecycle::{LifecycleEngine, Transition};
use super::locks::PluginLocks;
use super::migration::SqlMigrationRunner;
use super::outcome::ActionOutcome;
use super::registry::PluginRegistry;
use super::repository::PluginRepository;
use super::scanner::ManifestScanner;
use super::settings::PluginSettings;

/// Bundles discovery, state, lifecycle, and configuration services.
pub struct PluginManager {
    settings: PluginSettings,
    scanner: ManifestScanner,
    registry: PluginRegistry,
    engine: LifecycleEngine,
    config: ConfigStore,
    extensions: Arc<ExtensionRegistry>,
    locks: PluginLocks,
}

impl PluginManager {
    pub fn new(
        settings: PluginSettings,
        repo: Arc<dyn PluginRepository>,
        runner: Arc<dyn SqlMigrationRunner>,
        extensions: Arc<ExtensionRegistry>,
    ) -> Self {
        let reader: Arc<dyn LegacyMetadataReader> = Arc::new(PhpArrayMetadataReader);
        let legacy_state = LegacyStateFile::new(&settings.legacy_state_file);
        Self {
            scanner: ManifestScanner::new(&settings, Arc::clone(&reader)),
            registry: PluginRegistry::new(Arc::clone(&repo), legacy_state.clone()),
            engine: LifecycleEngine::new(
                Arc::clone(&repo),
                runner,
                legacy_state,
                settings.table_prefix.clone(),
                settings.legacy_state_mirror,
            ),
            config: ConfigStore::new(repo, Arc::clone(&extensions), reader),
            extensions,
            locks: PluginLocks::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    /// Discover plugins without touching stored state.
    pub fn scan(&self) -> Vec<PluginDescriptor> {
        self.scanner.scan()
    }

    /// Discover and resolve every plugin.
    pub async fn list(&self) -> Result<Vec<ResolvedPlugin>, PluginError> {
        Ok(self.registry.resolve(self.scan()).await?)
    }

    /// Run a resolve pass and report the merged view.
    pub async fn sync(&self) -> ActionOutcome {
        ActionOutcome::from_result("sync", self.list().await, |plugins| {
            ActionOutcome::ok(format!("{} plugins synchronized", plugins.len()))
                .with_data(to_data(&plugins))
        })
    }

    pub async fn install(&self, id: &str) -> ActionOutcome {
        let id = normalize_id(id);
        let result: Result<Transition, PluginError> = async {
            let _guard = self.locks.acquire(&id).await;
            let (target, all) = self.locate(&id).await?;
            self.engine.install(&target, &all).await
        }
        .await;
        self.finish("install", result, |t| {
            format!("plugin '{}' installed and enabled", t.plugin)
        })
        .await
    }

    pub async fn uninstall(&self, id: &str) -> ActionOutcome {
        let id = normalize_id(id);
        let result: Result<Transition, PluginError> = async {
            let _guard = self.locks.acquire(&id).await;
            let (target, _) = self.locate(&id).await?;
            let transition = self.engine.uninstall(&target).await?;
            self.extensions.evict(&id);
            Ok(transition)
        }
        .await;
        self.finish("uninstall", result, |t| {
            format!("plugin '{}' uninstalled", t.plugin)
        })
        .await
    }

    pub async fn toggle(&self, id: &str) -> ActionOutcome {
        let id = normalize_id(id);
        let result: Result<Transition, PluginError> = async {
            let _guard = self.locks.acquire(&id).await;
            let (target, all) = self.locate(&id).await?;
            self.engine.toggle(&target, &all).await
        }
        .await;
        self.finish("toggle", result, |t| {
            format!("plugin '{}' is now {}", t.plugin, t.status)
        })
        .await
    }

    /// Stored configuration; `data` is the config object.
    pub async fn get_config(&self, id: &str) -> ActionOutcome {
        let id = normalize_id(id);
        let result: Result<ConfigMap, PluginError> = async {
            let (target, _) = self.locate(&id).await?;
            self.config.get_config(&target).await
        }
        .await;
        ActionOutcome::from_result("get_config", result, |config| {
            ActionOutcome::ok("configuration loaded").with_data(to_data(&config))
        })
    }

    /// Declared fields; `data` is the field list.
    pub async fn schema(&self, id: &str) -> ActionOutcome {
        let id = normalize_id(id);
        let result: Result<Vec<FieldDef>, PluginError> = async {
            let (target, _) = self.locate(&id).await?;
            Ok(self.config.schema(&target.descriptor))
        }
        .await;
        ActionOutcome::from_result("schema", result, |fields| {
            ActionOutcome::ok("schema loaded").with_data(to_data(&fields))
        })
    }

    /// Sanitize and save a submission; `data` is what was stored.
    pub async fn set_config(&self, id: &str, submitted: ConfigMap) -> ActionOutcome {
        let id = normalize_id(id);
        let result: Result<ConfigMap, PluginError> = async {
            let _guard = self.locks.acquire(&id).await;
            let (target, _) = self.locate(&id).await?;
            self.config.set_config(&target, submitted).await
        }
        .await;
        self.finish("set_config", result, |_| {
            "configuration saved".to_string()
        })
        .await
    }

    /// Save a raw JSON payload of unknown text encoding.
    pub async fn set_config_raw(&self, id: &str, payload: &[u8]) -> ActionOutcome {
        let id = normalize_id(id);
        let result: Result<ConfigMap, PluginError> = async {
            let _guard = self.locks.acquire(&id).await;
            let (target, _) = self.locate(&id).await?;
            self.config.set_config_raw(&target, payload).await
        }
        .await;
        self.finish("set_config", result, |_| {
            "configuration saved".to_string()
        })
        .await
    }

    /// The challenge provider of an enabled verification plugin.
    pub async fn verifier(&self, id: &str) -> Result<Verifier, PluginError> {
        let id = normalize_id(id);
        let (target, _) = self.locate(&id).await?;
        if !target.state.lifecycle().is_enabled() {
            return Err(PluginError::NotEnabled { plugin: id });
        }
        if !target.descriptor.is_verification() {
            return Err(PluginError::MissingCapability {
                plugin: id,
                capability: "verification",
            });
        }

        let extension = self.extensions.load(&target.descriptor)?;
        if extension.verification().is_none() {
            return Err(PluginError::MissingCapability {
                plugin: id,
                capability: "verification",
            });
        }
        let config = self.config.get_config(&target).await?;
        Ok(Verifier {
            plugin: id,
            extension,
            config,
        })
    }

    async fn locate(&self, id: &str) -> Result<(ResolvedPlugin, Vec<ResolvedPlugin>), PluginError> {
        if id.is_empty() {
            return Err(PluginError::MissingId);
        }
        let all = self.list().await?;
        let target = all
            .iter()
            .find(|p| p.descriptor.id == id)
            .cloned()
            .ok_or_else(|| PluginError::not_found(id, self.scanner.root()))?;
        Ok((target, all))
    }

    /// Resync after a successful mutation and build the outcome.
    async fn finish<T: Serialize>(
        &self,
        operation: &str,
        result: Result<T, PluginError>,
        message: impl FnOnce(&T) -> String,
    ) -> ActionOutcome {
        if result.is_ok()
            && let Err(e) = self.list().await
        {
            warn!(operation, error = %e, "resync after plugin operation failed");
        }
        ActionOutcome::from_result(operation, result, |value| {
            ActionOutcome::ok(message(&value)).with_data(to_data(&value))
        })
    }
}

fn to_data<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

/// Canonical form of a caller-supplied id: `/` separators, no surrounding
/// slashes or whitespace.
pub fn normalize_id(id: &str) -> String {
    id.trim().replace('\\', "/").trim_matches('/').to_string()
}

/// Handle on an enabled verification plugin with its stored configuration.
pub struct Verifier {
    plugin: String,
    extension: Arc<dyn Extension>,
    config: ConfigMap,
}

impl Verifier {
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn render_challenge(&self) -> Result<String, PluginError> {
        self.capability()?
            .render_challenge(&self.config)
            .map_err(|e| self.failed(e))
    }

    pub fn verify(&self, token: &str, value: &str) -> Result<bool, PluginError> {
        self.capability()?
            .verify(&self.config, token, value)
            .map_err(|e| self.failed(e))
    }

    fn capability(&self) -> Result<&dyn VerificationExtension, PluginError> {
        self.extension
            .verification()
            .ok_or_else(|| PluginError::MissingCapability {
                plugin: self.plugin.clone(),
                capability: "verification",
            })
    }

    fn failed(&self, error: ExtensionError) -> PluginError {
        PluginError::ExtensionFailed {
            plugin: self.plugin.clone(),
            details: error.to_string(),
        }
    }
}
