//! In-process extension registry.
//!
//! Extension packages register a factory at startup under the class reference
//! their manifest names (`Namespace\Class`, or the bare class name). Loading a
//! plugin instantiates its extension once and caches it by plugin id.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use quill_sdk::extension::{Extension, ExtensionContext, ExtensionError};
use tracing::{debug, info};

use super::descriptor::{MainClassRef, PluginDescriptor};
use super::error::PluginError;

/// Builds an extension for one plugin.
pub type ExtensionFactory =
    Arc<dyn Fn(&ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionError> + Send + Sync>;

/// Factories by class reference plus the per-process instance cache.
#[derive(Default)]
pub struct ExtensionRegistry {
    factories: RwLock<HashMap<String, ExtensionFactory>>,
    loaded: DashMap<String, Arc<dyn Extension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a class reference. Leading and trailing
    /// namespace separators are ignored.
    pub fn register<F>(&self, class: &str, factory: F)
    where
        F: Fn(&ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionError>
            + Send
            + Sync
            + 'static,
    {
        let key = class.trim_matches('\\').to_string();
        debug!(class = %key, "registered extension factory");
        self.factories.write().insert(key, Arc::new(factory));
    }

    /// Whether a factory exists for this class reference.
    pub fn has_factory(&self, main: &MainClassRef) -> bool {
        self.factory_for(main).is_some()
    }

    /// The plugin's extension, instantiated on first use.
    pub fn load(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn Extension>, PluginError> {
        if let Some(extension) = self.loaded.get(&descriptor.id) {
            return Ok(Arc::clone(extension.value()));
        }

        let implementation = descriptor.resolve(&descriptor.main_class.path);
        if !implementation.is_file() {
            return Err(PluginError::MissingImplementation {
                plugin: descriptor.id.clone(),
                path: implementation.display().to_string(),
            });
        }

        let factory =
            self.factory_for(&descriptor.main_class)
                .ok_or_else(|| PluginError::UnknownExtension {
                    plugin: descriptor.id.clone(),
                    class: descriptor.main_class.qualified(),
                })?;

        let context = ExtensionContext {
            plugin_id: descriptor.id.clone(),
            plugin_dir: descriptor.dir.clone(),
        };
        let extension = factory(&context).map_err(|e| PluginError::InstantiationFailed {
            plugin: descriptor.id.clone(),
            details: e.to_string(),
        })?;

        // A concurrent load may have won; keep whichever landed first.
        let extension = Arc::clone(
            self.loaded
                .entry(descriptor.id.clone())
                .or_insert(extension)
                .value(),
        );
        info!(plugin = %descriptor.id, class = %descriptor.main_class.qualified(), "extension loaded");
        Ok(extension)
    }

    /// Drop a cached instance so the next load rebuilds it.
    pub fn evict(&self, plugin_id: &str) {
        self.loaded.remove(plugin_id);
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    fn factory_for(&self, main: &MainClassRef) -> Option<ExtensionFactory> {
        let factories = self.factories.read();
        factories
            .get(&main.qualified())
            .or_else(|| factories.get(&main.class))
            .cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::plugin::descriptor::{EntryPoints, PluginKind};
    use quill_sdk::extension::ConfigurableExtension;
    use quill_sdk::schema::{FieldDef, FieldType};
    use quill_test_utils::TestDir;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Smtp;

    impl Extension for Smtp {
        fn configurable(&self) -> Option<&dyn ConfigurableExtension> {
            Some(self)
        }
    }

    impl ConfigurableExtension for Smtp {
        fn schema(&self) -> Result<Vec<FieldDef>, ExtensionError> {
            Ok(vec![FieldDef::new("host", FieldType::Text)])
        }
    }

    fn descriptor(dir: &TestDir, class: &str) -> PluginDescriptor {
        std::fs::write(dir.path().join("Main.php"), "<?php").unwrap();
        PluginDescriptor {
            id: "email/smtp".to_string(),
            category: "email".to_string(),
            kind: PluginKind::Untyped,
            name: "SMTP".to_string(),
            version: String::new(),
            description: String::new(),
            author: String::new(),
            website: String::new(),
            main_class: MainClassRef {
                path: PathBuf::from("Main.php"),
                namespace: "plugins\\email\\smtp".to_string(),
                class: class.to_string(),
            },
            entry_points: EntryPoints::default(),
            install_script: None,
            uninstall_script: None,
            legacy: false,
            exclusion_scope: "email".to_string(),
            config_fields: Vec::new(),
            dir: dir.path().to_path_buf(),
            manifest_path: None,
        }
    }

    #[test]
    fn instantiates_once_per_plugin() {
        let dir = TestDir::new("ext_once");
        let registry = ExtensionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register("plugins\\email\\smtp\\Main", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Smtp) as Arc<dyn Extension>)
        });

        let d = descriptor(&dir, "Main");
        let ext = registry.load(&d).unwrap();
        registry.load(&d).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.loaded_count(), 1);
        let schema = ext.configurable().unwrap().schema().unwrap();
        assert_eq!(schema[0].name, "host");
    }

    #[test]
    fn bare_class_name_is_a_fallback() {
        let dir = TestDir::new("ext_bare");
        let registry = ExtensionRegistry::new();
        registry.register("SmtpMailer", |_| Ok(Arc::new(Smtp) as Arc<dyn Extension>));

        let d = descriptor(&dir, "SmtpMailer");
        assert!(registry.has_factory(&d.main_class));
        assert!(registry.load(&d).is_ok());
    }

    #[test]
    fn missing_file_and_unknown_class_are_resource_errors() {
        let dir = TestDir::new("ext_errors");
        let registry = ExtensionRegistry::new();

        let d = descriptor(&dir, "Main");
        let err = registry.load(&d).err().unwrap();
        assert!(matches!(err, PluginError::UnknownExtension { .. }));

        std::fs::remove_file(dir.path().join("Main.php")).unwrap();
        let err = registry.load(&d).err().unwrap();
        assert!(matches!(err, PluginError::MissingImplementation { .. }));
    }

    #[test]
    fn factory_errors_surface_as_instantiation_failures() {
        let dir = TestDir::new("ext_factory_err");
        let registry = ExtensionRegistry::new();
        registry.register("Main", |_| Err(ExtensionError::Misconfigured("no key".into())));

        let err = registry.load(&descriptor(&dir, "Main")).err().unwrap();
        assert!(matches!(err, PluginError::InstantiationFailed { .. }));
        assert!(err.to_string().contains("no key"));
        assert_eq!(registry.loaded_count(), 0);
    }
}
