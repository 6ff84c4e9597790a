//! Cleaning of submitted and stored plugin configuration.
//!
//! Applied on save in this order: text normalisation, double-encoding repair,
//! password preservation, definition-echo removal. Reads only repair
//! double encoding.

use std::borrow::Cow;

use quill_sdk::extension::ConfigMap;
use quill_sdk::schema::FieldDef;
use serde_json::Value;
use tracing::debug;

/// Keys whose presence marks an object as a field definition.
const DEFINITION_KEYS: &[&str] = &["type", "label", "title", "name"];

/// Nesting limit for repeated JSON-in-a-string decoding.
const MAX_DECODE_DEPTH: usize = 8;

/// Decode raw bytes as UTF-8, falling back to GBK when that decodes cleanly
/// and to lossy UTF-8 otherwise.
pub fn decode_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    if let Some(text) = encoding_rs::GBK.decode_without_bom_handling_and_without_replacement(bytes)
    {
        debug!("configuration payload decoded as GBK");
        return text.into_owned();
    }
    debug!("configuration payload is not valid UTF-8 or GBK, decoding lossily");
    String::from_utf8_lossy(bytes).into_owned()
}

/// Strip byte-order marks, NULs, and control characters other than tab,
/// CR and LF.
pub fn normalize_text(text: &str) -> Cow<'_, str> {
    let keep = |c: char| c != '\u{feff}' && (!c.is_control() || matches!(c, '\t' | '\r' | '\n'));
    if text.chars().all(keep) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|c| keep(*c)).collect())
    }
}

/// Normalise every string (keys included) inside a value.
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_text(&s).into_owned()),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (normalize_text(&k).into_owned(), normalize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Undo repeated JSON encoding. A string is replaced by its decoded form when
/// it parses as a JSON string, array, or object; strings that merely look
/// like numbers or booleans are left as they are.
pub fn repair_double_encoded(value: Value) -> Value {
    repair_at_depth(value, 0)
}

fn repair_at_depth(value: Value, depth: usize) -> Value {
    match value {
        Value::String(s) if depth < MAX_DECODE_DEPTH => match decode_nested(&s) {
            Some(inner) => repair_at_depth(inner, depth + 1),
            None => Value::String(s),
        },
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| repair_at_depth(v, depth))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, repair_at_depth(v, depth)))
                .collect(),
        ),
        other => other,
    }
}

fn decode_nested(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !matches!(trimmed.chars().next(), Some('"' | '[' | '{')) {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(|v| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_)))
}

/// Decode a stored config column into a map. Missing, corrupt, or non-object
/// content yields an empty map.
pub fn decode_stored(raw: Option<&str>) -> ConfigMap {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return ConfigMap::new();
    };
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "stored configuration is not valid JSON, ignoring");
            return ConfigMap::new();
        }
    };
    match repair_double_encoded(value) {
        Value::Object(map) => map,
        _ => ConfigMap::new(),
    }
}

/// Whether a submitted value counts as empty for password preservation.
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// For each password field submitted empty, keep the stored value.
pub fn preserve_passwords(submitted: &mut ConfigMap, stored: &ConfigMap, schema: &[FieldDef]) {
    for field in schema.iter().filter(|f| f.is_password()) {
        if !is_blank(submitted.get(&field.name)) {
            continue;
        }
        if let Some(previous) = stored.get(&field.name).filter(|v| !is_blank(Some(*v))) {
            submitted.insert(field.name.clone(), previous.clone());
        }
    }
}

/// Whether a value looks like a field definition rather than a field value.
pub fn looks_like_definition(value: &Value) -> bool {
    match value {
        Value::Object(map) => DEFINITION_KEYS.iter().any(|k| map.contains_key(*k)),
        Value::String(s) => decode_nested(s).is_some_and(|inner| looks_like_definition(&inner)),
        _ => false,
    }
}

/// Drop declared fields whose submitted value echoes a field definition.
/// The previously stored value is kept when there is one. Returns the names
/// of the fields that were dropped.
pub fn discard_definition_echoes(
    submitted: &mut ConfigMap,
    stored: &ConfigMap,
    schema: &[FieldDef],
) -> Vec<String> {
    let mut discarded = Vec::new();
    for field in schema {
        if !submitted.get(&field.name).is_some_and(looks_like_definition) {
            continue;
        }
        match stored.get(&field.name).filter(|v| !looks_like_definition(v)) {
            Some(previous) => {
                submitted.insert(field.name.clone(), previous.clone());
            }
            None => {
                submitted.remove(&field.name);
            }
        }
        discarded.push(field.name.clone());
    }
    discarded
}

/// Run the full save pipeline over a submission.
pub fn sanitize_submission(
    submitted: ConfigMap,
    stored: &ConfigMap,
    schema: &[FieldDef],
) -> (ConfigMap, Vec<String>) {
    let cleaned = repair_double_encoded(normalize_value(Value::Object(submitted)));
    let mut values = match cleaned {
        Value::Object(map) => map,
        _ => ConfigMap::new(),
    };
    preserve_passwords(&mut values, stored, schema);
    let discarded = discard_definition_echoes(&mut values, stored, schema);
    (values, discarded)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use quill_sdk::schema::FieldType;
    use serde_json::json;

    fn map(value: Value) -> ConfigMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn schema() -> Vec<FieldDef> {
        vec![
            FieldDef::new("app_id", FieldType::Text),
            FieldDef::new("api_key", FieldType::Password),
        ]
    }

    #[test]
    fn double_encoded_string_is_repaired() {
        let once = serde_json::to_string("hello").unwrap();
        let twice = serde_json::to_string(&once).unwrap();
        assert_eq!(repair_double_encoded(json!(twice)), json!("hello"));
    }

    #[test]
    fn encoded_containers_are_decoded_recursively() {
        let inner = json!({"a": serde_json::to_string(&json!([1, 2])).unwrap()});
        let encoded = serde_json::to_string(&inner).unwrap();
        assert_eq!(
            repair_double_encoded(json!({ "x": encoded })),
            json!({"x": {"a": [1, 2]}})
        );
    }

    #[test]
    fn scalar_looking_strings_stay_strings() {
        assert_eq!(repair_double_encoded(json!("123456")), json!("123456"));
        assert_eq!(repair_double_encoded(json!("true")), json!("true"));
        assert_eq!(repair_double_encoded(json!("{not json")), json!("{not json"));
    }

    #[test]
    fn control_characters_are_stripped() {
        assert_eq!(normalize_text("\u{feff}ab\u{0}c\td\n"), "abc\td\n");
        assert!(matches!(normalize_text("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn gbk_bytes_are_decoded() {
        // "你好" in GBK.
        assert_eq!(decode_bytes(&[0xC4, 0xE3, 0xBA, 0xC3]), "你好");
        assert_eq!(decode_bytes("héllo".as_bytes()), "héllo");
        assert_eq!(decode_bytes(b"\xEF\xBB\xBF{}"), "{}");
    }

    #[test]
    fn empty_password_keeps_stored_value() {
        let stored = map(json!({"api_key": "s3cret", "app_id": "old"}));
        let mut submitted = map(json!({"api_key": "", "app_id": ""}));
        preserve_passwords(&mut submitted, &stored, &schema());
        assert_eq!(submitted["api_key"], json!("s3cret"));
        // Non-password fields may be cleared.
        assert_eq!(submitted["app_id"], json!(""));
    }

    #[test]
    fn non_empty_password_overwrites() {
        let stored = map(json!({"api_key": "s3cret"}));
        let mut submitted = map(json!({"api_key": "rotated"}));
        preserve_passwords(&mut submitted, &stored, &schema());
        assert_eq!(submitted["api_key"], json!("rotated"));
    }

    #[test]
    fn definition_echo_is_discarded() {
        let stored = ConfigMap::new();
        let mut submitted = map(json!({
            "api_key": {"type": "text", "label": "API Key"},
            "app_id": "12345"
        }));
        let dropped = discard_definition_echoes(&mut submitted, &stored, &schema());
        assert_eq!(dropped, vec!["api_key".to_string()]);
        assert!(!submitted.contains_key("api_key"));
        assert_eq!(submitted["app_id"], json!("12345"));
    }

    #[test]
    fn encoded_definition_echo_restores_stored_value() {
        let stored = map(json!({"api_key": "s3cret"}));
        let echo = serde_json::to_string(&json!({"type": "password", "title": "Key"})).unwrap();
        let mut submitted = map(json!({ "api_key": echo }));
        discard_definition_echoes(&mut submitted, &stored, &schema());
        assert_eq!(submitted["api_key"], json!("s3cret"));
    }

    #[test]
    fn named_definition_echo_is_discarded() {
        let mut submitted = map(json!({"app_id": {"name": "app_id"}}));
        let dropped = discard_definition_echoes(&mut submitted, &ConfigMap::new(), &schema());
        assert_eq!(dropped, vec!["app_id".to_string()]);
        assert!(submitted.is_empty());
    }

    #[test]
    fn undeclared_fields_are_not_inspected() {
        let mut submitted = map(json!({"extra": {"type": "anything"}}));
        let dropped = discard_definition_echoes(&mut submitted, &ConfigMap::new(), &schema());
        assert!(dropped.is_empty());
        assert!(submitted.contains_key("extra"));
    }

    #[test]
    fn stored_column_is_decoded_and_repaired() {
        let raw = serde_json::to_string(&json!({"greeting": "\"\\\"hello\\\"\""})).unwrap();
        let config = decode_stored(Some(&raw));
        assert_eq!(config["greeting"], json!("hello"));
        assert!(decode_stored(None).is_empty());
        assert!(decode_stored(Some("[1,2]")).is_empty());
        assert!(decode_stored(Some("garbage")).is_empty());
    }
}
