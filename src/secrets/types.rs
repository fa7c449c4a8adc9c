//! Secure types for handling sensitive data.
//!
//! [`SecretString`] holds a single sensitive value; [`SecretPayload`] is the
//! structured key/value map stored as one secret version in the vault. Neither
//! prints its contents through `Debug`.

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string wrapper that redacts its contents in Debug, Display, and
/// serialization, and zeroes its memory on drop.
///
/// Deserialization accepts real values so secrets can be read from config and
/// vault responses; getting the value back out requires `expose_secret()`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // SECURITY: never serialize the actual secret value
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Default for SecretString {
    fn default() -> Self {
        Self::new("")
    }
}

/// Key used when a secret version holds plain text instead of a JSON object
pub const PLAIN_VALUE_KEY: &str = "value";

/// Structured secret value (`{"username": ..., "password": ...}`).
///
/// Unlike [`SecretString`], serialization emits the real values: this is the
/// type written to the vault and returned by value reads. `Debug` only lists
/// the keys.
#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretPayload(Map<String, Value>);

impl SecretPayload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Payload with exactly one string field
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(key.into(), Value::String(value.into()));
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String field, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// First present string field among `keys`
    pub fn get_str_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get_str(k))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Copy of this payload with one string field replaced
    pub fn with_secret_field(&self, key: &str, value: &SecretString) -> Self {
        let mut next = self.clone();
        next.insert(key, Value::String(value.expose_secret().to_string()));
        next
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text encoding written to the vault
    pub fn to_secret_string(&self) -> SecretString {
        SecretString::new(Value::Object(self.0.clone()).to_string())
    }

    /// Decode a text-encoded version. JSON objects are taken as-is; anything
    /// else is wrapped under [`PLAIN_VALUE_KEY`].
    pub fn decode_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(fields)) => Self(fields),
            _ => Self::single(PLAIN_VALUE_KEY, text),
        }
    }

    /// Decode a binary-encoded version. UTF-8 bytes go through
    /// [`SecretPayload::decode_text`]; other bytes are kept base64-encoded.
    pub fn decode_binary(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::decode_text(text),
            Err(_) => Self::single(
                PLAIN_VALUE_KEY,
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ),
        }
    }
}

impl fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretPayload")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secret_string_redacts() {
        let secret = SecretString::new("super-secret-value");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"[REDACTED]\"");
        assert_eq!(secret.expose_secret(), "super-secret-value");
    }

    #[test]
    fn test_secret_string_deserialization_accepts_values() {
        let secret: SecretString = serde_json::from_str("\"my-actual-secret\"").unwrap();
        assert_eq!(secret.expose_secret(), "my-actual-secret");
    }

    #[test]
    fn test_payload_debug_hides_values() {
        let payload = SecretPayload::single("password", "hunter2");
        let debug = format!("{:?}", payload);
        assert!(debug.contains("password"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_payload_text_roundtrip() {
        let payload: SecretPayload =
            serde_json::from_value(json!({"username": "app", "password": "pw", "port": 5432}))
                .unwrap();
        let text = payload.to_secret_string();
        assert_eq!(SecretPayload::decode_text(text.expose_secret()), payload);
    }

    #[test]
    fn test_decode_plain_text_wraps_value() {
        let payload = SecretPayload::decode_text("not json");
        assert_eq!(payload.get_str(PLAIN_VALUE_KEY), Some("not json"));

        let payload = SecretPayload::decode_text("42");
        assert_eq!(payload.get_str(PLAIN_VALUE_KEY), Some("42"));
    }

    #[test]
    fn test_decode_binary() {
        let payload = SecretPayload::decode_binary(br#"{"token":"abc"}"#);
        assert_eq!(payload.get_str("token"), Some("abc"));

        let payload = SecretPayload::decode_binary(&[0xff, 0xfe, 0x00]);
        assert_eq!(payload.get_str(PLAIN_VALUE_KEY), Some("//4A"));
    }

    #[test]
    fn test_with_secret_field_leaves_original() {
        let original = SecretPayload::single("password", "old");
        let next = original.with_secret_field("password", &SecretString::new("new"));
        assert_eq!(original.get_str("password"), Some("old"));
        assert_eq!(next.get_str("password"), Some("new"));
    }
}
