// SPDX-License-Identifier: Apache-2.0

//! Configuration snapshot handed to each harvester.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::harvester::encoding::EncodingKind;

/// Input type whose events carry no file state
pub const STDIN_INPUT_TYPE: &str = "stdin";

pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;
pub const DEFAULT_CLOSE_OLDER: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MULTILINE_MAX_LINES: usize = 500;
pub const DEFAULT_MULTILINE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a single harvester
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    /// File encoding
    pub encoding: EncodingKind,
    /// Size of each read from the file, in bytes
    pub buffer_size: usize,
    /// Maximum number of bytes of a single event's text; the rest is discarded
    pub max_bytes: usize,
    /// Initial wait after reaching EOF
    pub backoff: Duration,
    /// Upper bound for the EOF wait
    pub max_backoff: Duration,
    /// Multiplier applied to the wait after each empty read
    pub backoff_factor: u32,
    /// Stop harvesting once the file is removed or renamed
    pub force_close_files: bool,
    /// Stop harvesting after this long without new data
    pub close_older: Duration,
    /// Start new files (no prior offset) at their end
    pub tail_files: bool,
    /// Regex patterns; if non-empty a line must match one of them to be exported
    pub include_lines: Vec<String>,
    /// Regex patterns; a line matching any of them is not exported
    pub exclude_lines: Vec<String>,
    pub json: Option<JsonConfig>,
    pub multiline: Option<MultilineConfig>,
    pub input_type: String,
    pub document_type: String,
    pub event_metadata: EventMetadata,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            encoding: EncodingKind::Plain,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_bytes: DEFAULT_MAX_BYTES,
            backoff: DEFAULT_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            force_close_files: false,
            close_older: DEFAULT_CLOSE_OLDER,
            tail_files: false,
            include_lines: Vec::new(),
            exclude_lines: Vec::new(),
            json: None,
            multiline: None,
            input_type: "log".to_string(),
            document_type: "log".to_string(),
            event_metadata: EventMetadata::default(),
        }
    }
}

impl HarvesterConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("buffer_size must be at least 1".to_string());
        }
        if self.max_bytes == 0 {
            return Err("max_bytes must be at least 1".to_string());
        }
        if self.backoff.is_zero() {
            return Err("backoff must be greater than zero".to_string());
        }
        if self.max_backoff < self.backoff {
            return Err(format!(
                "max_backoff ({:?}) must not be smaller than backoff ({:?})",
                self.max_backoff, self.backoff
            ));
        }
        if self.backoff_factor == 0 {
            return Err("backoff_factor must be at least 1".to_string());
        }
        if self.close_older.is_zero() {
            return Err("close_older must be greater than zero".to_string());
        }
        if let Some(ref multiline) = self.multiline {
            multiline.validate()?;
        }
        Ok(())
    }

    pub fn with_include_lines(mut self, patterns: &[&str]) -> Self {
        self.include_lines = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_exclude_lines(mut self, patterns: &[&str]) -> Self {
        self.exclude_lines = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_backoff(mut self, backoff: Duration, max_backoff: Duration, factor: u32) -> Self {
        self.backoff = backoff;
        self.max_backoff = max_backoff;
        self.backoff_factor = factor;
        self
    }
}

/// JSON decoding of each line
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    /// String field used as the event text
    pub message_key: Option<String>,
    /// Keys to extract; empty extracts every key
    pub fields: Vec<String>,
    /// Put decoded keys at the top level of the event instead of under "json"
    pub keys_under_root: bool,
    /// With `keys_under_root`, decoded keys replace colliding event keys
    pub overwrite_keys: bool,
    /// Record decoding failures under "json_error"
    pub add_error_key: bool,
}

/// How a matching line relates to its neighbours
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// Matching lines are appended to the previous line
    #[default]
    After,
    /// Matching lines are continued by the next line
    Before,
}

/// Multiline grouping of physical lines into one event
#[derive(Debug, Clone)]
pub struct MultilineConfig {
    pub pattern: String,
    pub negate: bool,
    pub match_mode: MatchMode,
    pub max_lines: usize,
    /// Flush a pending event after this long without new lines
    pub timeout: Duration,
}

impl MultilineConfig {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            negate: false,
            match_mode: MatchMode::After,
            max_lines: DEFAULT_MULTILINE_MAX_LINES,
            timeout: DEFAULT_MULTILINE_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.pattern.is_empty() {
            return Err("multiline pattern must be specified".to_string());
        }
        if self.max_lines == 0 {
            return Err("multiline max_lines must be at least 1".to_string());
        }
        if self.timeout.is_zero() {
            return Err("multiline timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Metadata attached to every event
#[derive(Debug, Clone, Default)]
pub struct EventMetadata {
    pub fields: Map<String, Value>,
    /// Put `fields` at the top level of the event instead of under "fields"
    pub fields_under_root: bool,
    pub tags: Vec<String>,
}
