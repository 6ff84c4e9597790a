//! Uniform result of a plugin operation.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::error::{ErrorKind, PluginError};

/// What the operation boundary hands back instead of an error.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_kind: None,
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Convert a failure. Validation failures are expected operator mistakes
    /// and are not logged.
    pub fn failed(operation: &str, error: &PluginError) -> Self {
        let kind = error.kind();
        if kind != ErrorKind::Validation {
            warn!(operation, error = %error, kind = ?kind, "plugin operation failed");
        }
        Self {
            success: false,
            message: error.to_string(),
            error_kind: Some(kind),
            data: Value::Null,
        }
    }

    /// Collapse a result into an outcome.
    pub fn from_result<T>(
        operation: &str,
        result: Result<T, PluginError>,
        on_success: impl FnOnce(T) -> Self,
    ) -> Self {
        match result {
            Ok(value) => on_success(value),
            Err(e) => Self::failed(operation, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_carries_kind_and_message() {
        let outcome = ActionOutcome::failed(
            "uninstall",
            &PluginError::UninstallWhileEnabled {
                plugin: "payment/stripe".to_string(),
            },
        );
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Validation));

        let rendered = serde_json::to_value(&outcome).unwrap_or_default();
        assert_eq!(rendered["error_kind"], json!("validation"));
        assert!(rendered.get("data").is_none());
    }

    #[test]
    fn success_serializes_data() {
        let outcome = ActionOutcome::ok("installed").with_data(json!({"status": "enabled"}));
        let rendered = serde_json::to_value(&outcome).unwrap_or_default();
        assert_eq!(rendered["success"], json!(true));
        assert_eq!(rendered["data"]["status"], json!("enabled"));
    }
}
