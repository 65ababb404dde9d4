// SPDX-License-Identifier: Apache-2.0

use serde_json::{Map, Value};
use tracing::debug;

use super::{Message, Reader};
use crate::harvester::config::JsonConfig;
use crate::harvester::error::Result;

/// Key under which decoding problems are recorded when `add_error_key` is set
pub const JSON_ERROR_KEY: &str = "json_error";

/// Decodes every line as a JSON object.
///
/// The decoded keys travel in `Message::fields`; with a `message_key` the
/// event text becomes that key's string value.
pub struct JsonReader<R> {
    inner: R,
    config: JsonConfig,
}

impl<R: Reader> JsonReader<R> {
    pub fn new(inner: R, config: JsonConfig) -> Self {
        Self { inner, config }
    }

    fn decode(&self, message: &mut Message) {
        let mut fields = match serde_json::from_str::<Value>(&message.content) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                self.record_error(message, "Error decoding JSON: not an object".to_string());
                return;
            }
            Err(e) => {
                debug!(error = %e, "Error decoding JSON line");
                self.record_error(message, format!("Error decoding JSON: {}", e));
                return;
            }
        };

        if let Some(key) = &self.config.message_key {
            match fields.get(key) {
                Some(Value::String(text)) => message.content = text.clone(),
                _ => {
                    message.content = String::new();
                    if self.config.add_error_key {
                        fields.insert(
                            JSON_ERROR_KEY.to_string(),
                            Value::String(format!("Key '{}' not found", key)),
                        );
                    }
                }
            }
        }

        if !self.config.fields.is_empty() {
            fields.retain(|k, _| k == JSON_ERROR_KEY || self.config.fields.contains(k));
        }
        message.fields = Some(fields);
    }

    fn record_error(&self, message: &mut Message, error: String) {
        if self.config.add_error_key {
            let mut fields = Map::new();
            fields.insert(JSON_ERROR_KEY.to_string(), Value::String(error));
            message.fields = Some(fields);
        }
    }
}

impl<R: Reader> Reader for JsonReader<R> {
    fn next(&mut self) -> Result<Message> {
        let mut message = self.inner.next()?;
        self.decode(&mut message);
        Ok(message)
    }

    fn rewind(&mut self) -> Result<()> {
        self.inner.rewind()
    }

    fn set_deadline(&mut self, deadline: Option<std::time::Instant>) {
        self.inner.set_deadline(deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvester::reader::test_util::ScriptedReader;
    use serde_json::json;

    fn read_one(line: &str, config: JsonConfig) -> Message {
        let mut r = JsonReader::new(ScriptedReader::new(&[line]), config);
        r.next().unwrap()
    }

    #[test]
    fn test_decodes_object() {
        let m = read_one(r#"{"level":"info","n":3}"#, JsonConfig::default());
        let fields = m.fields.unwrap();
        assert_eq!(fields.get("level"), Some(&json!("info")));
        assert_eq!(fields.get("n"), Some(&json!(3)));
        assert_eq!(m.content, r#"{"level":"info","n":3}"#);
    }

    #[test]
    fn test_message_key_becomes_text() {
        let config = JsonConfig {
            message_key: Some("msg".to_string()),
            ..Default::default()
        };
        let m = read_one(r#"{"msg":"hello","x":1}"#, config);
        assert_eq!(m.content, "hello");
    }

    #[test]
    fn test_missing_message_key() {
        let config = JsonConfig {
            message_key: Some("msg".to_string()),
            add_error_key: true,
            ..Default::default()
        };
        let m = read_one(r#"{"x":1}"#, config);
        assert_eq!(m.content, "");
        assert_eq!(
            m.fields.unwrap().get(JSON_ERROR_KEY),
            Some(&json!("Key 'msg' not found"))
        );
    }

    #[test]
    fn test_field_selection() {
        let config = JsonConfig {
            fields: vec!["keep".to_string()],
            ..Default::default()
        };
        let m = read_one(r#"{"keep":true,"drop":false}"#, config);
        let fields = m.fields.unwrap();
        assert_eq!(fields.len(), 1);
        assert!(fields.contains_key("keep"));
    }

    #[test]
    fn test_invalid_json_keeps_raw_text() {
        let config = JsonConfig {
            add_error_key: true,
            ..Default::default()
        };
        let m = read_one("not json", config);
        assert_eq!(m.content, "not json");
        let error = m.fields.unwrap().get(JSON_ERROR_KEY).cloned().unwrap();
        assert!(error.as_str().unwrap().starts_with("Error decoding JSON"));
    }

    #[test]
    fn test_invalid_json_without_error_key() {
        let m = read_one("[1,2]", JsonConfig::default());
        assert!(m.fields.is_none());
        assert_eq!(m.bytes, "[1,2]".len() + 1);
    }
}
