//! Configuration schema types.
//!
//! An extension describes the settings it accepts as a list of [`FieldDef`]s.
//! The kernel uses the schema to render config forms and to sanitize submitted
//! values (for example, password fields keep their stored value when a form is
//! re-saved with the field left blank).

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of input a config field expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    Password,
    Textarea,
    Number,
    Select,
    Radio,
    Checkbox,
    Switch,
    /// Any type name the kernel does not treat specially.
    Other(String),
}

impl FieldType {
    /// Parse a type name as declared by an extension (case-insensitive).
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "input" | "string" => Self::Text,
            "password" | "secret" => Self::Password,
            "textarea" => Self::Textarea,
            "number" | "int" | "integer" => Self::Number,
            "select" => Self::Select,
            "radio" => Self::Radio,
            "checkbox" => Self::Checkbox,
            "switch" | "bool" | "boolean" => Self::Switch,
            other => Self::Other(other.to_string()),
        }
    }

    /// The canonical type name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Password => "password",
            Self::Textarea => "textarea",
            Self::Number => "number",
            Self::Select => "select",
            Self::Radio => "radio",
            Self::Checkbox => "checkbox",
            Self::Switch => "switch",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for FieldType {
    fn from(value: String) -> Self {
        Self::from_name(&value)
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single declared configuration field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Key under which the value is stored in the plugin's config blob.
    pub name: String,

    /// Input kind.
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: FieldType,

    /// Human-readable label.
    #[serde(default, alias = "title")]
    pub label: String,

    /// Default value when nothing has been stored yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Choices for select/radio/checkbox fields (value => label).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,

    /// Help text shown under the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,

    #[serde(default)]
    pub required: bool,
}

fn default_field_type() -> FieldType {
    FieldType::Text
}

impl FieldDef {
    /// Create a field with the given name and type.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            field_type,
            default: None,
            options: None,
            help: None,
            required: false,
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Whether this field holds a credential that forms render empty.
    pub fn is_password(&self) -> bool {
        self.field_type == FieldType::Password
    }
}
