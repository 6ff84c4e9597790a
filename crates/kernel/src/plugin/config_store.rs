//! Per-plugin configuration storage.
//!
//! The config blob lives in the plugin row as JSON text. Its meaning is owned
//! by the plugin's declared schema, which comes from the plugin's extension.
//! Without one, modern plugins use the fields declared in `plugin.json` and
//! legacy plugins the ones in `config.php`.

use std::sync::Arc;

use quill_sdk::extension::ConfigMap;
use quill_sdk::schema::FieldDef;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::descriptor::{PluginDescriptor, ResolvedPlugin};
use super::error::PluginError;
use super::extension::ExtensionRegistry;
use super::legacy::{LEGACY_CONFIG_FILE, LegacyMetadataReader};
use super::repository::{PluginRecord, PluginRepository};
use super::sanitize::{decode_bytes, decode_stored, sanitize_submission};

/// Reads and writes plugin configuration.
#[derive(Clone)]
pub struct ConfigStore {
    repo: Arc<dyn PluginRepository>,
    extensions: Arc<ExtensionRegistry>,
    reader: Arc<dyn LegacyMetadataReader>,
}

impl ConfigStore {
    pub fn new(
        repo: Arc<dyn PluginRepository>,
        extensions: Arc<ExtensionRegistry>,
        reader: Arc<dyn LegacyMetadataReader>,
    ) -> Self {
        Self {
            repo,
            extensions,
            reader,
        }
    }

    /// Stored configuration with double encoding repaired.
    pub async fn get_config(&self, plugin: &ResolvedPlugin) -> Result<ConfigMap, PluginError> {
        let row = self.repo.fetch(&plugin.descriptor.id).await?;
        Ok(decode_stored(row.as_ref().and_then(|r| r.config.as_deref())))
    }

    /// Declared configuration fields. Failures fall back to the fields the
    /// plugin declares on disk, which may be none.
    pub fn schema(&self, descriptor: &PluginDescriptor) -> Vec<FieldDef> {
        match self.extensions.load(descriptor) {
            Ok(extension) => match extension.configurable().map(|c| c.schema()) {
                Some(Ok(fields)) => fields,
                Some(Err(e)) => {
                    warn!(plugin = %descriptor.id, error = %e, "extension schema unavailable");
                    self.declared_schema(descriptor)
                }
                None => self.declared_schema(descriptor),
            },
            Err(e) => {
                debug!(plugin = %descriptor.id, error = %e, "no extension, using declared config fields");
                let fields = self.declared_schema(descriptor);
                if fields.is_empty() {
                    warn!(plugin = %descriptor.id, "no config schema available, saving without one");
                }
                fields
            }
        }
    }

    fn declared_schema(&self, descriptor: &PluginDescriptor) -> Vec<FieldDef> {
        if descriptor.legacy {
            self.legacy_schema(descriptor)
        } else {
            descriptor.config_fields.clone()
        }
    }

    /// Sanitize and store a submission; returns what was stored.
    pub async fn set_config(
        &self,
        plugin: &ResolvedPlugin,
        submitted: ConfigMap,
    ) -> Result<ConfigMap, PluginError> {
        let descriptor = &plugin.descriptor;
        let row = self.repo.fetch(&descriptor.id).await?;
        let stored = decode_stored(row.as_ref().and_then(|r| r.config.as_deref()));
        let schema = self.schema(descriptor);

        let (values, discarded) = sanitize_submission(submitted, &stored, &schema);
        if !discarded.is_empty() {
            warn!(plugin = %descriptor.id, fields = ?discarded, "discarded field definitions submitted as values");
        }

        let rendered = serde_json::to_string(&values).map_err(|e| PluginError::InvalidConfig {
            plugin: descriptor.id.clone(),
            details: e.to_string(),
        })?;

        let written = match row {
            Some(_) => self.repo.set_config(&descriptor.id, &rendered).await?,
            None => {
                let mut record = PluginRecord::from_descriptor(descriptor, plugin.state.lifecycle());
                record.config = Some(rendered.clone());
                self.repo.insert(&record).await?
                    || self.repo.set_config(&descriptor.id, &rendered).await?
            }
        };
        if !written {
            return Err(anyhow::anyhow!("plugin row for '{}' vanished during save", descriptor.id).into());
        }

        info!(plugin = %descriptor.id, fields = values.len(), "plugin configuration saved");
        Ok(values)
    }

    /// Decode a raw JSON payload of unknown encoding, then save it.
    pub async fn set_config_raw(
        &self,
        plugin: &ResolvedPlugin,
        payload: &[u8],
    ) -> Result<ConfigMap, PluginError> {
        let text = decode_bytes(payload);
        let submitted = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(PluginError::InvalidConfig {
                    plugin: plugin.descriptor.id.clone(),
                    details: "expected a JSON object".to_string(),
                });
            }
            Err(e) => {
                return Err(PluginError::InvalidConfig {
                    plugin: plugin.descriptor.id.clone(),
                    details: e.to_string(),
                });
            }
        };
        self.set_config(plugin, submitted).await
    }

    fn legacy_schema(&self, descriptor: &PluginDescriptor) -> Vec<FieldDef> {
        let path = descriptor.dir.join(LEGACY_CONFIG_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => self.reader.read_schema(&decode_bytes(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(plugin = %descriptor.id, path = %path.display(), error = %e, "failed to read legacy config schema");
                Vec::new()
            }
        }
    }
}
