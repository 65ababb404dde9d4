// SPDX-License-Identifier: Apache-2.0

//! Reader chain turning a file into messages.
//!
//! `LogFile` supplies raw bytes and owns the EOF behaviour. `LineReader`
//! splits and decodes lines, and the optional `JsonReader` and
//! `MultilineReader` stages are layered on top of it.

mod backoff;
mod json;
mod line;
mod log_file;
mod multiline;

use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

pub use backoff::Backoff;
pub use json::{JSON_ERROR_KEY, JsonReader};
pub use line::LineReader;
pub use log_file::LogFile;
pub use multiline::MultilineReader;

use crate::harvester::config::HarvesterConfig;
use crate::harvester::encoding::Decoder;
use crate::harvester::error::Result;
use crate::harvester::input::FileInfo;

/// One event's worth of input
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Time the (first) line was read
    pub ts: DateTime<Utc>,
    pub content: String,
    /// Raw bytes consumed from the file, terminators included
    pub bytes: usize,
    /// Decoded JSON keys, if JSON decoding is configured
    pub fields: Option<Map<String, Value>>,
}

/// A stage of the reader chain.
pub trait Reader: Send {
    /// Block until the next complete message is available.
    fn next(&mut self) -> Result<Message>;

    /// Discard buffered input and restart at byte 0 of the file.
    fn rewind(&mut self) -> Result<()>;

    /// Bound the wait for new bytes; `Error::Timeout` is returned once it passes.
    fn set_deadline(&mut self, deadline: Option<Instant>);
}

impl<R: Reader + ?Sized> Reader for Box<R> {
    fn next(&mut self) -> Result<Message> {
        (**self).next()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        (**self).set_deadline(deadline)
    }
}

/// Raw bytes feeding a `LineReader`.
pub trait ByteSource: Send {
    /// Read at least one byte into `buf`, waiting for data as needed.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn rewind(&mut self) -> Result<()>;

    fn set_deadline(&mut self, deadline: Option<Instant>);
}

/// Build the reader chain for an opened file positioned at `position`.
pub fn create_reader(
    file: File,
    path: PathBuf,
    info: &FileInfo,
    decoder: Decoder,
    position: u64,
    config: &HarvesterConfig,
    cancel: CancellationToken,
) -> Result<Box<dyn Reader>> {
    let source = LogFile::new(file, path, info, position, config, cancel);
    let mut reader: Box<dyn Reader> = Box::new(LineReader::new(
        source,
        decoder,
        config.buffer_size,
        config.max_bytes,
    ));

    if let Some(json) = &config.json {
        reader = Box::new(JsonReader::new(reader, json.clone()));
    }
    if let Some(multiline) = &config.multiline {
        reader = Box::new(MultilineReader::new(reader, multiline, config.max_bytes)?);
    }
    Ok(reader)
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::collections::VecDeque;

    use super::*;
    use crate::harvester::error::Error;

    /// Hands out fixed chunks, then reports `Stopped`.
    pub struct ScriptedSource {
        chunks: VecDeque<Vec<u8>>,
        pub rewinds: usize,
    }

    impl ScriptedSource {
        pub fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                rewinds: 0,
            }
        }
    }

    impl ByteSource for ScriptedSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let Some(chunk) = self.chunks.front_mut() else {
                return Err(Error::Stopped);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                self.chunks.pop_front();
            }
            Ok(n)
        }

        fn rewind(&mut self) -> Result<()> {
            self.rewinds += 1;
            Ok(())
        }

        fn set_deadline(&mut self, _deadline: Option<Instant>) {}
    }

    /// Hands out fixed lines; `None` steps report `Timeout`, then `Stopped` once exhausted.
    pub struct ScriptedReader {
        steps: VecDeque<Option<String>>,
        pub deadline_calls: Vec<bool>,
    }

    impl ScriptedReader {
        pub fn new(lines: &[&str]) -> Self {
            Self::with_steps(lines.iter().map(|l| Some(*l)).collect())
        }

        pub fn with_steps(steps: Vec<Option<&str>>) -> Self {
            Self {
                steps: steps.into_iter().map(|s| s.map(str::to_string)).collect(),
                deadline_calls: Vec::new(),
            }
        }
    }

    impl Reader for ScriptedReader {
        fn next(&mut self) -> Result<Message> {
            match self.steps.pop_front() {
                Some(Some(line)) => Ok(Message {
                    ts: Utc::now(),
                    bytes: line.len() + 1,
                    content: line,
                    fields: None,
                }),
                Some(None) => Err(Error::Timeout),
                None => Err(Error::Stopped),
            }
        }

        fn rewind(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_deadline(&mut self, deadline: Option<Instant>) {
            self.deadline_calls.push(deadline.is_some());
        }
    }
}
