// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use super::{Message, Reader};
use crate::harvester::config::{MatchMode, MultilineConfig};
use crate::harvester::error::{Error, Result};

/// Joins consecutive physical lines into one event.
///
/// With `After`, a line matching the pattern is appended to the line before it.
/// With `Before`, a matching line is continued by the line after it. `negate`
/// inverts the match. A pending event is flushed once no line arrives within
/// `timeout`.
pub struct MultilineReader<R> {
    inner: R,
    pattern: Regex,
    negate: bool,
    mode: MatchMode,
    max_lines: usize,
    max_bytes: usize,
    timeout: Duration,
    pending: Option<Pending>,
}

struct Pending {
    ts: DateTime<Utc>,
    content: String,
    bytes: usize,
    lines: usize,
    fields: Option<Map<String, Value>>,
}

impl Pending {
    fn start(message: Message) -> Self {
        Self {
            ts: message.ts,
            content: message.content,
            bytes: message.bytes,
            lines: 1,
            fields: message.fields,
        }
    }

    fn append(&mut self, message: Message, max_lines: usize, max_bytes: usize) {
        self.bytes += message.bytes;
        if self.lines >= max_lines {
            return;
        }
        self.lines += 1;

        let room = max_bytes.saturating_sub(self.content.len());
        if room == 0 {
            return;
        }
        self.content.push('\n');
        let mut take = message.content.len().min(room - 1);
        while !message.content.is_char_boundary(take) {
            take -= 1;
        }
        self.content.push_str(&message.content[..take]);
    }

    fn finish(self) -> Message {
        Message {
            ts: self.ts,
            content: self.content,
            bytes: self.bytes,
            fields: self.fields,
        }
    }
}

impl<R: Reader> MultilineReader<R> {
    pub fn new(inner: R, config: &MultilineConfig, max_bytes: usize) -> Result<Self> {
        Ok(Self {
            inner,
            pattern: Regex::new(&config.pattern)?,
            negate: config.negate,
            mode: config.match_mode,
            max_lines: config.max_lines,
            max_bytes,
            timeout: config.timeout,
            pending: None,
        })
    }

    fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line) != self.negate
    }

    /// Next physical line; while an event is pending the wait is bounded by the timeout.
    fn read_line(&mut self) -> Result<Message> {
        if self.pending.is_none() {
            return self.inner.next();
        }
        self.inner.set_deadline(Some(Instant::now() + self.timeout));
        let result = self.inner.next();
        self.inner.set_deadline(None);
        result
    }

    fn flush(&mut self) -> Option<Message> {
        self.pending.take().map(Pending::finish)
    }

    fn next_after(&mut self) -> Result<Message> {
        loop {
            let message = match self.read_line() {
                Ok(message) => message,
                Err(Error::Timeout) => match self.flush() {
                    Some(done) => return Ok(done),
                    None => continue,
                },
                Err(e) => return Err(e),
            };

            let continues = self.matches(&message.content);
            match self.pending.as_mut() {
                Some(pending) if continues => {
                    pending.append(message, self.max_lines, self.max_bytes)
                }
                Some(_) => {
                    let done = self.pending.replace(Pending::start(message));
                    if let Some(done) = done {
                        return Ok(done.finish());
                    }
                }
                None => self.pending = Some(Pending::start(message)),
            }
        }
    }

    fn next_before(&mut self) -> Result<Message> {
        loop {
            let message = match self.read_line() {
                Ok(message) => message,
                Err(Error::Timeout) => match self.flush() {
                    Some(done) => return Ok(done),
                    None => continue,
                },
                Err(e) => return Err(e),
            };

            let continued = self.matches(&message.content);
            match self.pending.as_mut() {
                Some(pending) => pending.append(message, self.max_lines, self.max_bytes),
                None => self.pending = Some(Pending::start(message)),
            }
            if !continued {
                if let Some(done) = self.flush() {
                    return Ok(done);
                }
            }
        }
    }
}

impl<R: Reader> Reader for MultilineReader<R> {
    fn next(&mut self) -> Result<Message> {
        match self.mode {
            MatchMode::After => self.next_after(),
            MatchMode::Before => self.next_before(),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.pending = None;
        self.inner.rewind()
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.inner.set_deadline(deadline);
    }
}
