// SPDX-License-Identifier: Apache-2.0

//! Events handed to the spooler.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::harvester::config::{EventMetadata, JsonConfig};
use crate::harvester::input::{FileId, FileInfo};

/// Persistable snapshot of a harvester's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub source: PathBuf,
    pub offset: i64,
    pub os: FileStateOs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStateOs {
    pub dev: u64,
    pub ino: u64,
}

impl From<FileId> for FileStateOs {
    fn from(id: FileId) -> Self {
        Self {
            dev: id.dev(),
            ino: id.ino(),
        }
    }
}

/// One event produced by a harvester.
///
/// An event without `text` is a heartbeat: it only moves the tracked offset
/// forward and never carries content.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub source: PathBuf,
    /// Offset after the line this event describes
    pub offset: i64,
    /// Raw bytes consumed by this event's line
    pub bytes: usize,
    pub read_time: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub json_fields: Option<Map<String, Value>>,
    pub input_type: String,
    pub document_type: String,
    pub event_metadata: EventMetadata,
    pub file_info: FileInfo,
    pub file_state: Option<FileState>,
    pub json_config: Option<JsonConfig>,
}

impl FileEvent {
    pub fn is_heartbeat(&self) -> bool {
        self.text.is_none()
    }

    /// Render the event as the JSON document shipped downstream. Heartbeats have none.
    pub fn to_document(&self) -> Option<Value> {
        let text = self.text.as_ref()?;
        let ts = self.read_time.unwrap_or_else(Utc::now);

        let mut doc = Map::new();
        doc.insert(
            "@timestamp".to_string(),
            json!(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        doc.insert(
            "source".to_string(),
            json!(self.source.to_string_lossy()),
        );
        doc.insert("offset".to_string(), json!(self.offset));
        doc.insert("type".to_string(), json!(self.document_type));
        doc.insert("input_type".to_string(), json!(self.input_type));
        doc.insert("message".to_string(), json!(text));

        let metadata = &self.event_metadata;
        if !metadata.fields.is_empty() {
            if metadata.fields_under_root {
                for (k, v) in &metadata.fields {
                    doc.insert(k.clone(), v.clone());
                }
            } else {
                doc.insert("fields".to_string(), Value::Object(metadata.fields.clone()));
            }
        }
        if !metadata.tags.is_empty() {
            doc.insert("tags".to_string(), json!(metadata.tags));
        }

        if let Some(fields) = &self.json_fields {
            let config = self.json_config.clone().unwrap_or_default();
            if config.keys_under_root {
                merge_json(&mut doc, fields, config.overwrite_keys);
            } else {
                doc.insert("json".to_string(), Value::Object(fields.clone()));
            }
        }

        Some(Value::Object(doc))
    }
}

fn merge_json(doc: &mut Map<String, Value>, fields: &Map<String, Value>, overwrite: bool) {
    for (k, v) in fields {
        if overwrite || !doc.contains_key(k) {
            doc.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: Option<&str>) -> FileEvent {
        FileEvent {
            source: PathBuf::from("/var/log/app.log"),
            offset: 12,
            bytes: 6,
            read_time: Some(
                DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
            text: text.map(str::to_string),
            json_fields: None,
            input_type: "log".to_string(),
            document_type: "app".to_string(),
            event_metadata: EventMetadata::default(),
            file_info: FileInfo {
                id: FileId::new(1, 2),
                size: 100,
                modified: None,
            },
            file_state: None,
            json_config: None,
        }
    }

    #[test]
    fn test_heartbeat_has_no_document() {
        let e = event(None);
        assert!(e.is_heartbeat());
        assert!(e.to_document().is_none());
    }

    #[test]
    fn test_basic_document() {
        let doc = event(Some("hello")).to_document().unwrap();
        assert_eq!(doc["@timestamp"], "2024-03-01T10:00:00.000Z");
        assert_eq!(doc["source"], "/var/log/app.log");
        assert_eq!(doc["offset"], 12);
        assert_eq!(doc["type"], "app");
        assert_eq!(doc["input_type"], "log");
        assert_eq!(doc["message"], "hello");
        assert!(doc.get("fields").is_none());
    }

    #[test]
    fn test_metadata_fields_and_tags() {
        let mut e = event(Some("x"));
        e.event_metadata.fields.insert("env".to_string(), json!("prod"));
        e.event_metadata.tags = vec!["web".to_string()];

        let doc = e.to_document().unwrap();
        assert_eq!(doc["fields"]["env"], "prod");
        assert_eq!(doc["tags"], json!(["web"]));

        e.event_metadata.fields_under_root = true;
        let doc = e.to_document().unwrap();
        assert_eq!(doc["env"], "prod");
    }

    #[test]
    fn test_json_keys_under_root() {
        let mut e = event(Some("x"));
        let mut fields = Map::new();
        fields.insert("message".to_string(), json!("from json"));
        fields.insert("level".to_string(), json!("warn"));
        e.json_fields = Some(fields);

        let doc = e.to_document().unwrap();
        assert_eq!(doc["json"]["level"], "warn");

        e.json_config = Some(JsonConfig {
            keys_under_root: true,
            ..Default::default()
        });
        let doc = e.to_document().unwrap();
        assert_eq!(doc["level"], "warn");
        assert_eq!(doc["message"], "x");

        e.json_config = Some(JsonConfig {
            keys_under_root: true,
            overwrite_keys: true,
            ..Default::default()
        });
        let doc = e.to_document().unwrap();
        assert_eq!(doc["message"], "from json");
    }

    #[test]
    fn test_file_state_serializes() {
        let state = FileState {
            source: PathBuf::from("/tmp/a.log"),
            offset: 42,
            os: FileId::new(7, 9).into(),
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            value,
            json!({"source": "/tmp/a.log", "offset": 42, "os": {"dev": 7, "ino": 9}})
        );
    }
}
