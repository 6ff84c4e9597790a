//! Plugin identity, metadata, and lifecycle state types.

use std::fmt;
use std::path::{Path, PathBuf};

use quill_sdk::schema::FieldDef;
use serde::{Deserialize, Serialize};

/// Status values as stored in the `status` column.
pub const STATUS_DISABLED: i16 = 0;
pub const STATUS_ENABLED: i16 = 1;

/// Whether an installed plugin's code runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Enabled,
    #[default]
    Disabled,
}

impl PluginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            Self::Enabled => STATUS_ENABLED,
            Self::Disabled => STATUS_DISABLED,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        if value == STATUS_ENABLED {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }

    /// Interpret a status written by hand or by older tooling:
    /// `"enabled"`/`"disabled"`, booleans, or `1`/`0`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "enabled" | "enable" | "on" | "1" | "true" => Some(Self::Enabled),
                "disabled" | "disable" | "off" | "0" | "false" | "" => Some(Self::Disabled),
                _ => None,
            },
            Value::Bool(b) => Some(if *b { Self::Enabled } else { Self::Disabled }),
            Value::Number(n) => Some(Self::from_i16(i16::from(n.as_i64() == Some(1)))),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Enabled => Self::Disabled,
            Self::Disabled => Self::Enabled,
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared plugin kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PluginKind {
    /// Legacy or untyped plugin.
    #[default]
    Untyped,
    /// Human-verification provider; one enabled per exclusion scope.
    Verification,
    /// Bundled mini-application with frontend and admin entry points.
    App,
    Other(String),
}

impl PluginKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Untyped => "",
            Self::Verification => "verification",
            Self::App => "app",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for PluginKind {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" => Self::Untyped,
            "verification" => Self::Verification,
            "app" => Self::App,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<PluginKind> for String {
    fn from(value: PluginKind) -> Self {
        value.as_str().to_string()
    }
}

/// Where a plugin's implementation lives and what it is called.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MainClassRef {
    /// Implementation file, relative to the plugin directory.
    pub path: PathBuf,
    pub namespace: String,
    pub class: String,
}

impl MainClassRef {
    /// `Namespace\Class`, or just `Class` when there is no namespace.
    pub fn qualified(&self) -> String {
        let ns = self.namespace.trim_matches('\\');
        if ns.is_empty() {
            self.class.clone()
        } else {
            format!("{ns}\\{}", self.class)
        }
    }
}

/// Entry points of an app plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryPoints {
    pub frontend: String,
    pub admin: String,
}

/// Canonical identity and metadata of a discovered plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    /// Relative directory path below the plugin root (e.g. `payment/stripe`).
    pub id: String,

    /// First path segment of the id.
    pub category: String,

    #[serde(rename = "type")]
    pub kind: PluginKind,

    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub website: String,

    pub main_class: MainClassRef,
    pub entry_points: EntryPoints,

    /// Install migration, relative to the plugin directory.
    pub install_script: Option<PathBuf>,

    /// Uninstall migration, relative to the plugin directory.
    pub uninstall_script: Option<PathBuf>,

    /// True when identified by file-naming convention instead of a manifest.
    pub legacy: bool,

    /// Group within which verification plugins are mutually exclusive.
    pub exclusion_scope: String,

    /// Configuration fields declared in the manifest.
    #[serde(skip)]
    pub config_fields: Vec<FieldDef>,

    /// Absolute plugin directory.
    #[serde(skip)]
    pub dir: PathBuf,

    /// Manifest path for modern plugins.
    #[serde(skip)]
    pub manifest_path: Option<PathBuf>,
}

impl PluginDescriptor {
    pub fn is_verification(&self) -> bool {
        self.kind == PluginKind::Verification
    }

    pub fn is_app(&self) -> bool {
        self.kind == PluginKind::App
    }

    /// Absolute path of a file referenced relative to the plugin directory.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.dir.join(relative)
    }

    /// Whether `other` competes with this plugin for the single enabled slot.
    pub fn shares_exclusion_scope(&self, other: &PluginDescriptor) -> bool {
        self.kind == other.kind && self.exclusion_scope == other.exclusion_scope
    }
}

/// Last `/`-separated segment of a plugin id.
pub fn last_segment(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Position of a plugin in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    NotInstalled,
    InstalledDisabled,
    InstalledEnabled,
}

/// The `(installed, status)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub status: PluginStatus,
}

impl LifecycleState {
    pub const NOT_INSTALLED: Self = Self {
        installed: false,
        status: PluginStatus::Disabled,
    };

    pub const fn new(installed: bool, status: PluginStatus) -> Self {
        Self { installed, status }
    }

    /// Enforce `enabled => installed`: a plugin that is not installed is
    /// always reported as disabled.
    pub fn normalized(self) -> Self {
        if self.installed {
            self
        } else {
            Self::NOT_INSTALLED
        }
    }

    pub fn phase(self) -> LifecyclePhase {
        match (self.installed, self.status) {
            (false, _) => LifecyclePhase::NotInstalled,
            (true, PluginStatus::Disabled) => LifecyclePhase::InstalledDisabled,
            (true, PluginStatus::Enabled) => LifecyclePhase::InstalledEnabled,
        }
    }

    pub fn is_enabled(self) -> bool {
        self.phase() == LifecyclePhase::InstalledEnabled
    }
}

/// Mutable per-plugin state as seen by callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PluginState {
    pub installed: bool,
    pub status: PluginStatus,
    /// Raw config column; meaning owned by the plugin's schema.
    pub config_json: Option<String>,
}

impl PluginState {
    pub fn lifecycle(&self) -> LifecycleState {
        LifecycleState::new(self.installed, self.status)
    }
}

/// A descriptor merged with its current state.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPlugin {
    pub descriptor: PluginDescriptor,
    pub state: PluginState,
    /// Display name; an operator-customized DB name wins over the manifest.
    pub display_name: String,
}
