use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Field/value mapping sent back for every request.
///
/// Always carries `status`; fields keep insertion order on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    fields: Map<String, Value>,
}

impl Response {
    pub fn new(status: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("status".to_string(), Value::from(status));
        Self { fields }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("error").with("message", message.into())
    }

    /// Add or replace one field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Merge every field of a serializable struct; later fields win
    pub fn merge<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => {
                for (key, value) in map {
                    self.fields.insert(key, value);
                }
            }
            Ok(other) => warn!("Ignoring non-object response fragment: {}", other),
            Err(e) => warn!("Could not serialize response fragment: {}", e),
        }
        self
    }

    pub fn status(&self) -> &str {
        self.fields
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Compact single-line encoding with the trailing newline
    pub fn to_line(&self) -> String {
        let mut line = Value::Object(self.fields.clone()).to_string();
        line.push('\n');
        line
    }
}
