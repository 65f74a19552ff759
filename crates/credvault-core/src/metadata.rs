//! Structured service metadata.
//!
//! Services carry a small flat mapping of string keys to scalar values
//! (`"port": 5432`, `"tls": true`, `"engine": "postgres"`). Input arrives as
//! arbitrary JSON and is validated here, at the boundary, so nothing
//! schema-free ever reaches storage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VaultError;

/// Maximum number of entries in one metadata map.
pub const MAX_ENTRIES: usize = 64;

/// Maximum length of a metadata key, in characters.
pub const MAX_KEY_LEN: usize = 128;

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A validated, ordered mapping of metadata keys to scalar values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    /// An empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate arbitrary JSON into metadata.
    ///
    /// `null` yields an empty mapping. Anything other than an object whose
    /// values are strings, numbers, or booleans is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Invalid`] naming the offending key.
    pub fn from_json(value: Value) -> Result<Self, VaultError> {
        let object = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(object) => object,
            other => {
                return Err(VaultError::invalid(format!(
                    "metadata must be an object, got {}",
                    json_kind(&other)
                )));
            }
        };

        let mut metadata = Self::new();
        for (key, value) in object {
            let value = match value {
                Value::Bool(b) => MetadataValue::Bool(b),
                Value::String(s) => MetadataValue::Text(s),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => MetadataValue::Integer(i),
                    None => MetadataValue::Float(n.as_f64().ok_or_else(|| {
                        VaultError::invalid(format!("metadata '{key}' is not a finite number"))
                    })?),
                },
                other => {
                    return Err(VaultError::invalid(format!(
                        "metadata '{key}' must be a string, number or bool, got {}",
                        json_kind(&other)
                    )));
                }
            };
            metadata.insert(key, value)?;
        }
        Ok(metadata)
    }

    /// Insert one entry, enforcing key and size limits.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Invalid`] for an empty or overlong key, or when
    /// the mapping is already full.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<(), VaultError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(VaultError::invalid("metadata keys must not be empty"));
        }
        if key.chars().count() > MAX_KEY_LEN {
            return Err(VaultError::invalid(format!(
                "metadata key exceeds {MAX_KEY_LEN} characters"
            )));
        }
        if !self.0.contains_key(&key) && self.0.len() >= MAX_ENTRIES {
            return Err(VaultError::invalid(format!(
                "metadata holds at most {MAX_ENTRIES} entries"
            )));
        }
        self.0.insert(key, value.into());
        Ok(())
    }

    /// Re-check limits on a mapping built without [`insert`](Self::insert)
    /// (e.g. deserialized directly).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Invalid`] on the first violated limit.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.0.len() > MAX_ENTRIES {
            return Err(VaultError::invalid(format!(
                "metadata holds at most {MAX_ENTRIES} entries"
            )));
        }
        for key in self.0.keys() {
            if key.trim().is_empty() || key.chars().count() > MAX_KEY_LEN {
                return Err(VaultError::invalid(format!("invalid metadata key '{key}'")));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
