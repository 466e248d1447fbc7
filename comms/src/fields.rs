use serde_json::{Map, Value};

use crate::error::{DecodeErr, Result};

/// Typed, read-only access to the keys of an inbound JSON object.
///
/// Errors carry the dotted path of the offending key so nested fields
/// (`results.weights`) are reported precisely.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fields<'a> {
    map: &'a Map<String, Value>,
    scope: Option<&'static str>,
}

impl<'a> Fields<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map, scope: None }
    }

    /// Descends into a nested object.
    ///
    /// # Args
    /// * `key` - The key holding the nested object.
    ///
    /// # Returns
    /// The accessor for the nested object or a decode error.
    pub fn nested(&self, key: &'static str) -> Result<Fields<'a>> {
        match self.get(key)? {
            Value::Object(map) => Ok(Fields {
                map,
                scope: Some(key),
            }),
            other => Err(self.unexpected(key, "an object", other)),
        }
    }

    pub fn string(&self, key: &'static str) -> Result<String> {
        match self.get(key)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.unexpected(key, "a string", other)),
        }
    }

    pub fn object(&self, key: &'static str) -> Result<Map<String, Value>> {
        match self.get(key)? {
            Value::Object(map) => Ok(map.clone()),
            other => Err(self.unexpected(key, "an object", other)),
        }
    }

    pub fn unsigned(&self, key: &'static str) -> Result<u64> {
        let value = self.get(key)?;
        value
            .as_u64()
            .ok_or_else(|| self.unexpected(key, "a non-negative integer", value))
    }

    pub fn number(&self, key: &'static str) -> Result<f64> {
        let value = self.get(key)?;
        value
            .as_f64()
            .ok_or_else(|| self.unexpected(key, "a number", value))
    }

    /// Reads a flat array of numbers as `f64`s.
    ///
    /// # Args
    /// * `key` - The key holding the array.
    ///
    /// # Returns
    /// The numbers in wire order or a decode error naming the first bad entry.
    pub fn numbers(&self, key: &'static str) -> Result<Vec<f64>> {
        let value = self.get(key)?;
        let Value::Array(items) = value else {
            return Err(self.unexpected(key, "an array of numbers", value));
        };

        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_f64().ok_or_else(|| {
                    DecodeErr::malformed(
                        self.path(key),
                        format!("entry {i} is {}, expected a number", describe(item)),
                    )
                })
            })
            .collect()
    }

    fn get(&self, key: &'static str) -> Result<&'a Value> {
        self.map
            .get(key)
            .ok_or_else(|| DecodeErr::MissingField(self.path(key)))
    }

    fn path(&self, key: &str) -> String {
        match self.scope {
            Some(scope) => format!("{scope}.{key}"),
            None => key.to_string(),
        }
    }

    fn unexpected(&self, key: &str, expected: &str, got: &Value) -> DecodeErr {
        DecodeErr::malformed(
            self.path(key),
            format!("expected {expected}, got {}", describe(got)),
        )
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
