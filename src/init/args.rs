// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

use crate::harvester::config::{
    DEFAULT_BUFFER_SIZE, DEFAULT_MAX_BYTES, DEFAULT_MULTILINE_MAX_LINES, EventMetadata,
    HarvesterConfig, JsonConfig, MatchMode, MultilineConfig,
};
use crate::harvester::encoding::EncodingKind;

/// Multiline match mode
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchModeArg {
    /// Matching lines belong to the line before them
    #[default]
    After,
    /// Matching lines are continued by the line after them
    Before,
}

impl From<MatchModeArg> for MatchMode {
    fn from(m: MatchModeArg) -> Self {
        match m {
            MatchModeArg::After => MatchMode::After,
            MatchModeArg::Before => MatchMode::Before,
        }
    }
}

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestArgs {
    /// Files to harvest
    #[arg(required = true, env = "LOGHARVEST_PATHS", value_delimiter = ',')]
    pub paths: Vec<PathBuf>,

    /// Path of the offset registry
    #[arg(
        long,
        env = "LOGHARVEST_REGISTRY_FILE",
        default_value = "logharvest-registry.json"
    )]
    pub registry_file: PathBuf,

    /// Maximum number of files harvested at the same time
    #[arg(long, env = "LOGHARVEST_MAX_HARVESTERS", default_value = "16")]
    pub max_harvesters: usize,

    /// Capacity of the event queue between harvesters and the spooler
    #[arg(long, env = "LOGHARVEST_SPOOL_SIZE", default_value = "2048")]
    pub spool_size: usize,

    /// File encoding: plain, utf-8, latin1, utf-16le, utf-16be, utf-16-bom
    #[arg(long, env = "LOGHARVEST_ENCODING", default_value = "plain")]
    pub encoding: String,

    /// Size of each read from a file, in bytes
    #[arg(long, env = "LOGHARVEST_BUFFER_SIZE", default_value = "16384")]
    pub buffer_size: usize,

    /// Maximum size of a single event's text, in bytes
    #[arg(long, env = "LOGHARVEST_MAX_BYTES", default_value = "10485760")]
    pub max_bytes: usize,

    /// Initial wait in milliseconds after reaching the end of a file
    #[arg(long, env = "LOGHARVEST_BACKOFF_MS", default_value = "1000")]
    pub backoff_ms: u64,

    /// Maximum wait in milliseconds after reaching the end of a file
    #[arg(long, env = "LOGHARVEST_MAX_BACKOFF_MS", default_value = "10000")]
    pub max_backoff_ms: u64,

    /// Multiplier applied to the wait after each empty read
    #[arg(long, env = "LOGHARVEST_BACKOFF_FACTOR", default_value = "2")]
    pub backoff_factor: u32,

    /// Stop harvesting a file once it is removed or renamed
    #[arg(long, env = "LOGHARVEST_FORCE_CLOSE_FILES", default_value = "false")]
    pub force_close_files: bool,

    /// Stop harvesting a file after this many milliseconds without new data
    #[arg(long, env = "LOGHARVEST_CLOSE_OLDER_MS", default_value = "3600000")]
    pub close_older_ms: u64,

    /// Start files without a registry entry at their end
    #[arg(long, env = "LOGHARVEST_TAIL_FILES", default_value = "false")]
    pub tail_files: bool,

    /// Comma-separated regexes; only matching lines are exported
    #[arg(long, env = "LOGHARVEST_INCLUDE_LINES", value_delimiter = ',')]
    pub include_lines: Vec<String>,

    /// Comma-separated regexes; matching lines are not exported
    #[arg(long, env = "LOGHARVEST_EXCLUDE_LINES", value_delimiter = ',')]
    pub exclude_lines: Vec<String>,

    /// Decode each line as a JSON object
    #[arg(long, env = "LOGHARVEST_JSON", default_value = "false")]
    pub json: bool,

    /// JSON key holding the event text
    #[arg(long, env = "LOGHARVEST_JSON_MESSAGE_KEY")]
    pub json_message_key: Option<String>,

    /// Comma-separated JSON keys to keep; all keys are kept when empty
    #[arg(long, env = "LOGHARVEST_JSON_FIELDS", value_delimiter = ',')]
    pub json_fields: Vec<String>,

    /// Put decoded JSON keys at the top level of the event
    #[arg(long, env = "LOGHARVEST_JSON_KEYS_UNDER_ROOT", default_value = "false")]
    pub json_keys_under_root: bool,

    /// Let decoded JSON keys replace colliding event keys
    #[arg(long, env = "LOGHARVEST_JSON_OVERWRITE_KEYS", default_value = "false")]
    pub json_overwrite_keys: bool,

    /// Record JSON decoding errors under "json_error"
    #[arg(long, env = "LOGHARVEST_JSON_ADD_ERROR_KEY", default_value = "false")]
    pub json_add_error_key: bool,

    /// Regex selecting the lines multiline grouping applies to
    #[arg(long, env = "LOGHARVEST_MULTILINE_PATTERN")]
    pub multiline_pattern: Option<String>,

    /// Invert the multiline pattern
    #[arg(long, env = "LOGHARVEST_MULTILINE_NEGATE", default_value = "false")]
    pub multiline_negate: bool,

    /// Multiline match mode: after or before
    #[arg(
        value_enum,
        long,
        env = "LOGHARVEST_MULTILINE_MATCH",
        default_value = "after"
    )]
    pub multiline_match: MatchModeArg,

    /// Maximum number of lines joined into one event
    #[arg(long, env = "LOGHARVEST_MULTILINE_MAX_LINES", default_value = "500")]
    pub multiline_max_lines: usize,

    /// Flush a pending multiline event after this many milliseconds without input
    #[arg(long, env = "LOGHARVEST_MULTILINE_TIMEOUT_MS", default_value = "5000")]
    pub multiline_timeout_ms: u64,

    /// Value of the "type" field of each event
    #[arg(long, env = "LOGHARVEST_DOCUMENT_TYPE", default_value = "log")]
    pub document_type: String,

    /// Value of the "input_type" field of each event
    #[arg(long, env = "LOGHARVEST_INPUT_TYPE", default_value = "log")]
    pub input_type: String,

    /// Comma-separated key=value pairs added to every event
    #[arg(long, env = "LOGHARVEST_FIELDS", value_parser = parse_key_val, value_delimiter = ',')]
    pub fields: Vec<(String, String)>,

    /// Put the custom fields at the top level of the event
    #[arg(long, env = "LOGHARVEST_FIELDS_UNDER_ROOT", default_value = "false")]
    pub fields_under_root: bool,

    /// Comma-separated tags added to every event
    #[arg(long, env = "LOGHARVEST_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,
}

impl Default for HarvestArgs {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            registry_file: PathBuf::from("logharvest-registry.json"),
            max_harvesters: 16,
            spool_size: 2048,
            encoding: "plain".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_bytes: DEFAULT_MAX_BYTES,
            backoff_ms: 1000,
            max_backoff_ms: 10_000,
            backoff_factor: 2,
            force_close_files: false,
            close_older_ms: 3_600_000,
            tail_files: false,
            include_lines: Vec::new(),
            exclude_lines: Vec::new(),
            json: false,
            json_message_key: None,
            json_fields: Vec::new(),
            json_keys_under_root: false,
            json_overwrite_keys: false,
            json_add_error_key: false,
            multiline_pattern: None,
            multiline_negate: false,
            multiline_match: MatchModeArg::After,
            multiline_max_lines: DEFAULT_MULTILINE_MAX_LINES,
            multiline_timeout_ms: 5000,
            document_type: "log".to_string(),
            input_type: "log".to_string(),
            fields: Vec::new(),
            fields_under_root: false,
            tags: Vec::new(),
        }
    }
}

impl HarvestArgs {
    /// Build the harvester configuration shared by every harvested file.
    pub fn build_config(&self) -> Result<HarvesterConfig, String> {
        let encoding: EncodingKind = self.encoding.parse()?;

        let json = (self.json || self.json_message_key.is_some()).then(|| JsonConfig {
            message_key: self.json_message_key.clone(),
            fields: self.json_fields.clone(),
            keys_under_root: self.json_keys_under_root,
            overwrite_keys: self.json_overwrite_keys,
            add_error_key: self.json_add_error_key,
        });

        let multiline = self
            .multiline_pattern
            .as_ref()
            .map(|pattern| MultilineConfig {
                pattern: pattern.clone(),
                negate: self.multiline_negate,
                match_mode: self.multiline_match.into(),
                max_lines: self.multiline_max_lines,
                timeout: Duration::from_millis(self.multiline_timeout_ms),
            });

        let fields: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let config = HarvesterConfig {
            encoding,
            buffer_size: self.buffer_size,
            max_bytes: self.max_bytes,
            backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_factor: self.backoff_factor,
            force_close_files: self.force_close_files,
            close_older: Duration::from_millis(self.close_older_ms),
            tail_files: self.tail_files,
            include_lines: self.include_lines.clone(),
            exclude_lines: self.exclude_lines.clone(),
            json,
            multiline,
            input_type: self.input_type.clone(),
            document_type: self.document_type.clone(),
            event_metadata: EventMetadata {
                fields,
                fields_under_root: self.fields_under_root,
                tags: self.tags.clone(),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        harvest: HarvestArgs,
    }

    #[test]
    fn test_defaults_match_harvester_defaults() {
        let cli = TestCli::parse_from(["test", "/var/log/app.log"]);
        let config = cli.harvest.build_config().unwrap();
        let defaults = HarvesterConfig::default();

        assert_eq!(cli.harvest.paths, vec![PathBuf::from("/var/log/app.log")]);
        assert_eq!(config.backoff, defaults.backoff);
        assert_eq!(config.max_backoff, defaults.max_backoff);
        assert_eq!(config.close_older, defaults.close_older);
        assert_eq!(config.max_bytes, defaults.max_bytes);
        assert!(config.json.is_none());
        assert!(config.multiline.is_none());
    }

    #[test]
    fn test_build_full_config() {
        let cli = TestCli::parse_from([
            "test",
            "a.log",
            "--encoding",
            "utf-16-bom",
            "--include-lines",
            "^ERROR,^WARN",
            "--json-message-key",
            "msg",
            "--multiline-pattern",
            r"^\s",
            "--multiline-match",
            "before",
            "--fields",
            "env=prod,team=core",
            "--tags",
            "web",
        ]);
        let config = cli.harvest.build_config().unwrap();

        assert_eq!(config.encoding, EncodingKind::Utf16Bom);
        assert_eq!(config.include_lines, vec!["^ERROR", "^WARN"]);
        assert_eq!(
            config.json.unwrap().message_key,
            Some("msg".to_string())
        );
        assert_eq!(config.multiline.unwrap().match_mode, MatchMode::Before);
        assert_eq!(
            config.event_metadata.fields.get("env"),
            Some(&Value::String("prod".to_string()))
        );
        assert_eq!(config.event_metadata.tags, vec!["web"]);
    }

    #[test]
    fn test_unknown_encoding() {
        let args = HarvestArgs {
            encoding: "ebcdic".to_string(),
            ..Default::default()
        };
        assert_eq!(
            args.build_config().unwrap_err(),
            "unknown encoding: ebcdic"
        );
    }

    #[test]
    fn test_invalid_backoff() {
        let args = HarvestArgs {
            backoff_ms: 5000,
            max_backoff_ms: 1000,
            ..Default::default()
        };
        assert!(args.build_config().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let args: HarvestArgs =
            serde_json::from_str(r#"{"paths": ["/tmp/a.log"], "tail_files": true}"#).unwrap();
        assert!(args.tail_files);
        assert_eq!(args.max_harvesters, 16);
        assert_eq!(args.encoding, "plain");
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
    }
}
