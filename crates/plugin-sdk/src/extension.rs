//! Capability traits implemented by extension packages.
//!
//! An extension exposes optional capabilities through accessor methods; the
//! kernel asks for the capability it needs and treats `None` as "not
//! supported" rather than probing for methods by name.

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::FieldDef;

/// A plugin's stored configuration (field name => value).
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Errors raised by extension code.
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// The extension cannot work with the configuration it was given.
    #[error("extension is misconfigured: {0}")]
    Misconfigured(String),

    /// Any other failure inside the extension.
    #[error("extension failed: {0}")]
    Failed(String),
}

/// Information handed to an extension factory when the kernel instantiates it.
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    /// Canonical plugin id (e.g. `verification/basic/recaptcha`).
    pub plugin_id: String,

    /// Absolute path of the plugin's directory.
    pub plugin_dir: PathBuf,
}

/// Root trait for every extension object held by the kernel.
pub trait Extension: Send + Sync {
    /// Configuration capability, if the extension declares settings.
    fn configurable(&self) -> Option<&dyn ConfigurableExtension> {
        None
    }

    /// Verification capability, if the extension is a challenge provider.
    fn verification(&self) -> Option<&dyn VerificationExtension> {
        None
    }
}

/// An extension that declares a configuration schema.
pub trait ConfigurableExtension: Send + Sync {
    /// The fields this extension accepts.
    fn schema(&self) -> Result<Vec<FieldDef>, ExtensionError>;
}

/// An extension that renders and checks a human-verification challenge.
pub trait VerificationExtension: Send + Sync {
    /// Markup for the challenge widget.
    fn render_challenge(&self, config: &ConfigMap) -> Result<String, ExtensionError>;

    /// Check a submitted response.
    fn verify(&self, config: &ConfigMap, token: &str, value: &str) -> Result<bool, ExtensionError>;
}
