//! Quill test utilities.
//!
//! Helpers for integration testing: temporary directories that clean up after
//! themselves, and a builder for on-disk plugin trees (modern manifests,
//! legacy PHP-style plugins, and the legacy flat state file).

// Setup failures panic.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Manifest file name used by modern plugins.
pub const MANIFEST_FILE: &str = "plugin.json";

/// RAII guard for test directories. Automatically removes the directory
/// on drop, guaranteeing cleanup even if the test panics.
pub struct TestDir(PathBuf);

impl TestDir {
    pub fn new(name: &str) -> Self {
        let n = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path =
            std::env::temp_dir().join(format!("quill_test_{name}_{n}_{}", std::process::id()));
        // Remove leftovers from a previous run, if any
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Deref for TestDir {
    type Target = Path;
    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// A plugin root plus a legacy state file location, laid out as
/// `<tmp>/plugins/...` and `<tmp>/storage/plugins.json`.
pub struct PluginTree {
    dir: TestDir,
}

impl PluginTree {
    pub fn new(name: &str) -> Self {
        let dir = TestDir::new(name);
        fs::create_dir_all(dir.join("plugins")).unwrap();
        Self { dir }
    }

    /// The plugin root directory.
    pub fn root(&self) -> PathBuf {
        self.dir.join("plugins")
    }

    /// Location of the legacy flat state file.
    pub fn state_file(&self) -> PathBuf {
        self.dir.join("storage").join("plugins.json")
    }

    /// Directory of a plugin by id.
    pub fn plugin_dir(&self, id: &str) -> PathBuf {
        self.root().join(id)
    }

    /// Write an arbitrary file inside a plugin directory.
    pub fn write_file(&self, id: &str, relative: &str, contents: &str) -> PathBuf {
        let path = self.plugin_dir(id).join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    /// Write a modern plugin: its manifest plus the implementation file the
    /// manifest points at (`main`, defaulting to `Main.php`).
    pub fn modern(&self, id: &str, manifest: Value) -> PathBuf {
        let main = manifest
            .get("main")
            .and_then(Value::as_str)
            .unwrap_or("Main.php")
            .to_string();
        self.write_file(id, &main, "<?php\n// implementation\n");
        self.write_manifest(id, &manifest)
    }

    /// Write (or overwrite) a manifest without touching other files.
    pub fn write_manifest(&self, id: &str, manifest: &Value) -> PathBuf {
        self.write_file(
            id,
            MANIFEST_FILE,
            &serde_json::to_string_pretty(manifest).unwrap(),
        )
    }

    /// Read a plugin's manifest back as JSON.
    pub fn read_manifest(&self, id: &str) -> Value {
        let raw = fs::read_to_string(self.plugin_dir(id).join(MANIFEST_FILE)).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    /// Write a legacy plugin implementation file named `<Class>Plugin.php`.
    pub fn legacy(&self, id: &str, class: &str, source: &str) -> PathBuf {
        self.write_file(id, &format!("{class}Plugin.php"), source)
    }

    /// Write the legacy flat state file.
    pub fn write_legacy_state(&self, state: &Value) {
        let path = self.state_file();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_string_pretty(state).unwrap()).unwrap();
    }

    /// Read the legacy flat state file (`Value::Null` if it does not exist).
    pub fn read_legacy_state(&self) -> Value {
        match fs::read_to_string(self.state_file()) {
            Ok(raw) => serde_json::from_str(&raw).unwrap(),
            Err(_) => Value::Null,
        }
    }
}

/// Manifest builders for testing.
pub mod manifests {
    use serde_json::{Value, json};

    /// A plain untyped plugin.
    pub fn basic(name: &str) -> Value {
        json!({
            "name": name,
            "version": "1.0.0",
            "description": format!("{name} plugin"),
            "author": "Quill",
            "namespace": "plugins\\test",
            "class": "Main",
            "installed": false,
            "status": "disabled"
        })
    }

    /// A verification-type plugin.
    pub fn verification(name: &str) -> Value {
        let mut manifest = basic(name);
        manifest["type"] = json!("verification");
        manifest
    }

    /// An app-type plugin with the given entry points.
    pub fn app(name: &str, frontend_entry: &str, admin_entry: &str) -> Value {
        let mut manifest = basic(name);
        manifest["type"] = json!("app");
        manifest["frontend_entry"] = json!(frontend_entry);
        manifest["admin_entry"] = json!(admin_entry);
        manifest
    }
}

/// Legacy source builders for testing.
pub mod legacy {
    /// A legacy implementation file carrying an `$info` array literal.
    pub fn plugin_source(class: &str, title: &str, version: &str, description: &str) -> String {
        format!(
            r#"<?php
namespace plugins\legacy;

// {class} gateway
class {class}Plugin
{{
    public $info = array(
        'name'        => '{class}', // machine name
        'title'       => '{title}',
        'version'     => '{version}',
        /* shown on the listing page */
        'description' => '{description}',
    );
}}
"#
        )
    }

    /// A legacy `config.php` declaring a credential pair.
    pub fn config_source() -> String {
        r#"<?php
return [
    'app_id' => ['title' => 'App ID', 'type' => 'text', 'value' => ''],
    'app_secret' => ['title' => 'App Secret', 'type' => 'password', 'value' => ''],
];
"#
        .to_string()
    }
}
