//! Plugin discovery.
//!
//! Two passes over the plugin root:
//!
//! 1. **Modern**: every directory holding a `plugin.json` is a plugin. Its id
//!    is the `/`-joined path from the root (at least `category/name`), and
//!    everything below it belongs to that plugin.
//! 2. **Legacy**: direct subdirectories of the legacy categories that have no
//!    manifest but contain `*Plugin.php` or `config.php`.
//!
//! Ids found by both passes keep the modern result. Output is sorted by id.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::descriptor::{EntryPoints, MainClassRef, PluginDescriptor, PluginKind};
use super::legacy::{LEGACY_CONFIG_FILE, LEGACY_PLUGIN_SUFFIX, LegacyMetadataReader};
use super::manifest::{DEFAULT_MAIN_FILE, Manifest};
use super::settings::PluginSettings;

/// Discovers plugins under a root directory.
#[derive(Clone)]
pub struct ManifestScanner {
    root: PathBuf,
    manifest_file: String,
    legacy_categories: Vec<String>,
    reader: Arc<dyn LegacyMetadataReader>,
}

impl ManifestScanner {
    pub fn new(settings: &PluginSettings, reader: Arc<dyn LegacyMetadataReader>) -> Self {
        Self {
            root: settings.plugins_dir.clone(),
            manifest_file: settings.manifest_file.clone(),
            legacy_categories: settings.legacy_categories.clone(),
            reader,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Discover all plugins, sorted by id.
    pub fn scan(&self) -> Vec<PluginDescriptor> {
        if !self.root.exists() {
            info!(root = %self.root.display(), "plugins directory does not exist, nothing to discover");
            return Vec::new();
        }

        let mut found = self.scan_modern();
        for descriptor in self.scan_legacy() {
            if found.contains_key(&descriptor.id) {
                debug!(plugin = %descriptor.id, "legacy match shadowed by manifest plugin");
                continue;
            }
            found.insert(descriptor.id.clone(), descriptor);
        }

        debug!(count = found.len(), "plugin scan complete");
        found.into_values().collect()
    }

    /// Find one plugin by id.
    pub fn find(&self, id: &str) -> Option<PluginDescriptor> {
        self.scan().into_iter().find(|d| d.id == id)
    }

    fn scan_modern(&self) -> BTreeMap<String, PluginDescriptor> {
        let mut found = BTreeMap::new();
        let mut walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read entry under plugins directory");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let manifest_path = entry.path().join(&self.manifest_file);
            if !manifest_path.is_file() {
                continue;
            }

            let Some(id) = plugin_id(&self.root, entry.path()) else {
                debug!(path = %manifest_path.display(), "manifest too shallow for a plugin id, ignoring");
                continue;
            };

            // Subdirectories belong to this plugin.
            walker.skip_current_dir();

            let manifest = match Manifest::read(&manifest_path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(plugin = %id, error = %e, "unreadable plugin manifest, skipping");
                    continue;
                }
            };

            let descriptor = describe_modern(&id, entry.path(), &manifest_path, &manifest);
            found.insert(id, descriptor);
        }

        found
    }

    fn scan_legacy(&self) -> Vec<PluginDescriptor> {
        let mut found = Vec::new();

        for category in &self.legacy_categories {
            let category_dir = self.root.join(category);
            let entries = match std::fs::read_dir(&category_dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            let mut dirs: Vec<_> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .collect();
            dirs.sort_by_key(|e| e.file_name());

            for entry in dirs {
                let dir = entry.path();
                if dir.join(&self.manifest_file).is_file() {
                    continue;
                }
                let Some(dir_name) = entry.file_name().to_str().map(String::from) else {
                    continue;
                };
                let id = format!("{category}/{dir_name}");
                if let Some(descriptor) = self.describe_legacy(&id, category, &dir) {
                    found.push(descriptor);
                }
            }
        }

        found
    }

    fn describe_legacy(&self, id: &str, category: &str, dir: &Path) -> Option<PluginDescriptor> {
        let implementation = find_legacy_implementation(dir).or_else(|| {
            let config = dir.join(LEGACY_CONFIG_FILE);
            config.is_file().then_some(config)
        })?;

        let metadata = match std::fs::read_to_string(&implementation) {
            Ok(source) => self.reader.read_metadata(&source),
            Err(e) => {
                warn!(plugin = %id, error = %e, "failed to read legacy plugin source");
                None
            }
        };
        if metadata.is_none() {
            debug!(plugin = %id, "no legacy metadata found, using id as name");
        }
        let metadata = metadata.unwrap_or_default();

        let file_name = implementation.file_name()?.to_os_string();
        let class = Path::new(&file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        Some(PluginDescriptor {
            id: id.to_string(),
            category: category.to_string(),
            kind: PluginKind::Untyped,
            name: metadata.name.unwrap_or_else(|| id.to_string()),
            version: metadata.version.unwrap_or_default(),
            description: metadata.description.unwrap_or_default(),
            author: metadata.author.unwrap_or_default(),
            website: String::new(),
            main_class: MainClassRef {
                path: PathBuf::from(file_name),
                namespace: metadata.namespace.unwrap_or_default(),
                class,
            },
            entry_points: EntryPoints::default(),
            install_script: None,
            uninstall_script: None,
            legacy: true,
            exclusion_scope: category.to_string(),
            config_fields: Vec::new(),
            dir: dir.to_path_buf(),
            manifest_path: None,
        })
    }
}

/// First `*Plugin.php` file in a directory, by name.
fn find_legacy_implementation(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(LEGACY_PLUGIN_SUFFIX) && n != LEGACY_PLUGIN_SUFFIX)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Canonical plugin id for a directory: the `/`-joined relative path from the
/// root, requiring at least two segments.
pub fn plugin_id(root: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (segments.len() >= 2).then(|| segments.join("/"))
}

fn describe_modern(
    id: &str,
    dir: &Path,
    manifest_path: &Path,
    manifest: &Manifest,
) -> PluginDescriptor {
    let segments: Vec<&str> = id.split('/').collect();
    let category = segments.first().copied().unwrap_or_default().to_string();

    let main = if manifest.main.is_empty() {
        DEFAULT_MAIN_FILE
    } else {
        manifest.main.as_str()
    };
    let class = if manifest.class.is_empty() {
        Path::new(main)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    } else {
        manifest.class.clone()
    };

    let exclusion_scope = if manifest.category.is_empty() {
        segments[..segments.len().saturating_sub(1)].join("/")
    } else {
        manifest.category.clone()
    };

    let script = |s: &str| (!s.is_empty()).then(|| PathBuf::from(s));

    PluginDescriptor {
        id: id.to_string(),
        category,
        kind: PluginKind::from(manifest.kind.clone()),
        name: if manifest.name.is_empty() {
            id.to_string()
        } else {
            manifest.name.clone()
        },
        version: manifest.version.clone(),
        description: manifest.description.clone(),
        author: manifest.author.clone(),
        website: manifest.website.clone(),
        main_class: MainClassRef {
            path: PathBuf::from(main),
            namespace: manifest.namespace.clone(),
            class,
        },
        entry_points: EntryPoints {
            frontend: manifest.frontend_entry.clone(),
            admin: manifest.admin_entry.clone(),
        },
        install_script: script(&manifest.install_sql),
        uninstall_script: script(&manifest.uninstall_sql),
        legacy: false,
        exclusion_scope,
        config_fields: manifest.config.clone(),
        dir: dir.to_path_buf(),
        manifest_path: Some(manifest_path.to_path_buf()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::plugin::legacy::PhpArrayMetadataReader;
    use quill_test_utils::{PluginTree, legacy, manifests};
    use serde_json::json;

    fn scanner(tree: &PluginTree) -> ManifestScanner {
        let settings = PluginSettings::new(tree.root(), tree.state_file());
        ManifestScanner::new(&settings, Arc::new(PhpArrayMetadataReader))
    }

    fn ids(descriptors: &[PluginDescriptor]) -> Vec<&str> {
        descriptors.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn ids_come_from_relative_paths() {
        let tree = PluginTree::new("scan_ids");
        tree.modern("verification/basic/recaptcha", manifests::verification("reCAPTCHA"));
        tree.modern("payment/stripe", manifests::basic("Stripe"));
        tree.modern("apps/my_app", manifests::app("My App", "index.html", "admin.html"));

        let found = scanner(&tree).scan();
        assert_eq!(
            ids(&found),
            vec!["apps/my_app", "payment/stripe", "verification/basic/recaptcha"]
        );

        let recaptcha = &found[2];
        assert_eq!(recaptcha.category, "verification");
        assert_eq!(recaptcha.exclusion_scope, "verification/basic");
        assert!(recaptcha.is_verification());
        assert_eq!(recaptcha.main_class.qualified(), "plugins\\test\\Main");
    }

    #[test]
    fn scan_is_stable() {
        let tree = PluginTree::new("scan_stable");
        tree.modern("sms/aliyun", manifests::basic("Aliyun"));
        tree.modern("email/smtp", manifests::basic("SMTP"));
        tree.legacy("payment/alipay", "Alipay", &legacy::plugin_source("Alipay", "Alipay", "1", "d"));

        let scanner = scanner(&tree);
        let first: Vec<String> = scanner.scan().into_iter().map(|d| d.id).collect();
        let second: Vec<String> = scanner.scan().into_iter().map(|d| d.id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn shallow_manifests_are_ignored() {
        let tree = PluginTree::new("scan_shallow");
        tree.write_file("payment", "plugin.json", r#"{"name": "not a plugin"}"#);
        tree.modern("payment/stripe", manifests::basic("Stripe"));

        let found = scanner(&tree).scan();
        assert_eq!(ids(&found), vec!["payment/stripe"]);
    }

    #[test]
    fn nested_directories_belong_to_their_plugin() {
        let tree = PluginTree::new("scan_nested");
        tree.modern("apps/shop", manifests::app("Shop", "a", "b"));
        tree.write_file("apps/shop", "vendor/lib/plugin.json", r#"{"name": "vendored"}"#);

        let found = scanner(&tree).scan();
        assert_eq!(ids(&found), vec!["apps/shop"]);
    }

    #[test]
    fn broken_manifest_uses_id_as_name() {
        let tree = PluginTree::new("scan_broken");
        tree.write_file("sms/broken", "plugin.json", "{ this is not json");

        let found = scanner(&tree).scan();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "sms/broken");
        assert_eq!(found[0].main_class.path, PathBuf::from("Main.php"));
    }

    #[test]
    fn legacy_plugins_are_synthesized() {
        let tree = PluginTree::new("scan_legacy");
        tree.legacy(
            "payment/alipay",
            "Alipay",
            &legacy::plugin_source("Alipay", "Alipay Payments", "3.0", "Pay"),
        );
        tree.write_file("sms/old", "config.php", &legacy::config_source());
        // Not a legacy category.
        tree.legacy("apps/old", "Old", &legacy::plugin_source("Old", "Old", "1", "d"));

        let found = scanner(&tree).scan();
        assert_eq!(ids(&found), vec!["payment/alipay", "sms/old"]);

        let alipay = &found[0];
        assert!(alipay.legacy);
        assert_eq!(alipay.name, "Alipay Payments");
        assert_eq!(alipay.version, "3.0");
        assert_eq!(alipay.main_class.class, "AlipayPlugin");

        // config.php carries no $info literal.
        assert_eq!(found[1].name, "sms/old");
    }

    #[test]
    fn manifest_wins_over_legacy_files() {
        let tree = PluginTree::new("scan_dupe");
        tree.modern("payment/alipay", json!({"name": "Alipay v2"}));
        tree.legacy("payment/alipay", "Alipay", &legacy::plugin_source("Alipay", "Old", "1", "d"));

        let found = scanner(&tree).scan();
        assert_eq!(found.len(), 1);
        assert!(!found[0].legacy);
        assert_eq!(found[0].name, "Alipay v2");
    }

    #[test]
    fn missing_root_is_empty() {
        let settings = PluginSettings::new("/nonexistent/quill/plugins", "/nonexistent/state.json");
        let scanner = ManifestScanner::new(&settings, Arc::new(PhpArrayMetadataReader));
        assert!(scanner.scan().is_empty());
    }

    #[test]
    fn plugin_id_requires_two_segments() {
        let root = Path::new("/srv/plugins");
        assert_eq!(plugin_id(root, Path::new("/srv/plugins/payment")), None);
        assert_eq!(
            plugin_id(root, Path::new("/srv/plugins/payment/stripe")),
            Some("payment/stripe".to_string())
        );
        assert_eq!(plugin_id(root, Path::new("/elsewhere/a/b")), None);
    }
}
