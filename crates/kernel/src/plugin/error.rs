//! Plugin system error types with clear, actionable messages.
//!
//! All errors include the plugin id and relevant context to help operators
//! quickly identify and fix issues. Every variant belongs to one
//! [`ErrorKind`], which decides how the operation boundary reports it.

use serde::Serialize;
use thiserror::Error;

/// Broad classes of plugin failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Bad request or illegal state transition; nothing was changed.
    Validation,
    /// A required file is missing or unreadable; nothing was changed.
    Resource,
    /// A migration statement failed while running.
    Execution,
    /// The database or a state file could not be read or written.
    Storage,
}

/// Errors that can occur during plugin discovery, lifecycle, and config operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No plugin id was supplied.
    #[error("a plugin id is required")]
    MissingId,

    /// No plugin with this id was discovered under the plugin root.
    #[error("plugin '{plugin}': not found under {root}")]
    NotFound { plugin: String, root: String },

    /// Install requested for a plugin that is already installed.
    #[error("plugin '{plugin}': already installed")]
    AlreadyInstalled { plugin: String },

    /// Operation requires an installed plugin.
    #[error("plugin '{plugin}': not installed. Install it first")]
    NotInstalled { plugin: String },

    /// Uninstall requested while the plugin is still enabled.
    #[error("plugin '{plugin}': disable the plugin before uninstalling it")]
    UninstallWhileEnabled { plugin: String },

    /// An app plugin declares a blank entry point.
    #[error("plugin '{plugin}': app plugins must declare a non-empty '{entry}'")]
    MissingEntryPoint { plugin: String, entry: &'static str },

    /// The implementation file named by the manifest does not exist.
    #[error("plugin '{plugin}': implementation file not found at {path}")]
    MissingImplementation { plugin: String, path: String },

    /// No extension factory is registered for the plugin's class.
    #[error("plugin '{plugin}': no extension registered for class '{class}'")]
    UnknownExtension { plugin: String, class: String },

    /// The extension factory failed to build the extension.
    #[error("plugin '{plugin}': failed to instantiate extension: {details}")]
    InstantiationFailed { plugin: String, details: String },

    /// Migration SQL file not found on disk.
    #[error("plugin '{plugin}': migration file not found: {path}")]
    MigrationFileNotFound { plugin: String, path: String },

    /// Migration SQL execution failed.
    #[error("plugin '{plugin}': migration '{migration}' failed: {details}")]
    MigrationFailed {
        plugin: String,
        migration: String,
        details: String,
    },

    /// Operation requires an enabled plugin.
    #[error("plugin '{plugin}': not enabled")]
    NotEnabled { plugin: String },

    /// The plugin's extension does not offer a required capability.
    #[error("plugin '{plugin}': extension does not provide {capability}")]
    MissingCapability {
        plugin: String,
        capability: &'static str,
    },

    /// Extension code returned an error while serving a request.
    #[error("plugin '{plugin}': extension error: {details}")]
    ExtensionFailed { plugin: String, details: String },

    /// Submitted configuration could not be decoded.
    #[error("plugin '{plugin}': invalid configuration payload: {details}")]
    InvalidConfig { plugin: String, details: String },

    /// Database or state-file failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PluginError {
    /// Create a not-found error.
    pub fn not_found(plugin: impl Into<String>, root: &std::path::Path) -> Self {
        Self::NotFound {
            plugin: plugin.into(),
            root: root.display().to_string(),
        }
    }

    /// Create a migration failure error.
    pub fn migration_failed(
        plugin: impl Into<String>,
        migration: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::MigrationFailed {
            plugin: plugin.into(),
            migration: migration.into(),
            details: details.into(),
        }
    }

    /// Which class of failure this is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingId
            | Self::NotFound { .. }
            | Self::AlreadyInstalled { .. }
            | Self::NotInstalled { .. }
            | Self::UninstallWhileEnabled { .. }
            | Self::NotEnabled { .. }
            | Self::MissingEntryPoint { .. }
            | Self::InvalidConfig { .. } => ErrorKind::Validation,
            Self::MissingImplementation { .. }
            | Self::UnknownExtension { .. }
            | Self::InstantiationFailed { .. }
            | Self::MissingCapability { .. }
            | Self::MigrationFileNotFound { .. } => ErrorKind::Resource,
            Self::MigrationFailed { .. } | Self::ExtensionFailed { .. } => ErrorKind::Execution,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}
