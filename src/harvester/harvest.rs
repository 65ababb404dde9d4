// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::harvester::config::{HarvesterConfig, STDIN_INPUT_TYPE};
use crate::harvester::encoding;
use crate::harvester::error::{Error, Result};
use crate::harvester::event::{FileEvent, FileState};
use crate::harvester::filter::LineFilter;
use crate::harvester::input::{FileId, FileInfo, open_regular};
use crate::harvester::offset_tracker::OffsetTracker;
use crate::harvester::reader::{Reader, create_reader};

/// Reads one file from its starting offset and forwards every line downstream.
///
/// `run` blocks the calling thread for the lifetime of the harvest, so it is
/// meant to be driven from `tokio::task::spawn_blocking` or a plain thread.
pub struct Harvester {
    path: PathBuf,
    config: HarvesterConfig,
    filter: LineFilter,
    offset: OffsetTracker,
    /// Identity of the file `offset` was recorded for
    resume_id: Option<FileId>,
    spooler: BoundedSender<FileEvent>,
    state_tx: Option<BoundedSender<i64>>,
    cancel: CancellationToken,
}

impl Harvester {
    /// Create a harvester for `path`.
    ///
    /// `initial_offset` is the persisted offset for this file, or 0 if none is
    /// known. `state_tx`, when given, receives the final offset on close.
    pub fn new(
        path: impl Into<PathBuf>,
        initial_offset: i64,
        config: HarvesterConfig,
        spooler: BoundedSender<FileEvent>,
        state_tx: Option<BoundedSender<i64>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let filter = LineFilter::new(&config.include_lines, &config.exclude_lines)?;

        Ok(Self {
            path: path.into(),
            config,
            filter,
            offset: OffsetTracker::new(initial_offset.max(0)),
            resume_id: None,
            spooler,
            state_tx,
            cancel,
        })
    }

    /// Only resume from `initial_offset` if the opened file is still `id`.
    pub fn with_resume_id(mut self, id: FileId) -> Self {
        self.resume_id = Some(id);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared view of the tracked offset, readable from other threads.
    pub fn offset_handle(&self) -> OffsetTracker {
        self.offset.clone()
    }

    /// Harvest until a terminal condition. The file is always released and the
    /// final offset reported before this returns.
    pub fn run(self) -> Result<()> {
        let mut session = Session {
            path: &self.path,
            offset: &self.offset,
            state_tx: self.state_tx.as_ref(),
            reader: None,
        };

        let result = self.harvest(&mut session);
        match &result {
            Ok(()) => {}
            Err(e) if e.is_close_policy() => {
                info!(path = ?self.path, reason = %e, "Stopping harvester")
            }
            Err(e) => error!(path = ?self.path, error = %e, "Harvester stopped with error"),
        }
        result
    }

    fn harvest(&self, session: &mut Session<'_>) -> Result<()> {
        let (mut file, file_info) = open_regular(&self.path)?;
        let detected = encoding::detect(self.config.encoding, &mut file).map_err(|reason| {
            Error::EncodingDetection {
                path: self.path.clone(),
                reason,
            }
        })?;
        let position = self.init_offset(&mut file, &file_info, detected.consumed)?;

        let reader = session.reader.insert(create_reader(
            file,
            self.path.clone(),
            &file_info,
            detected.decoder,
            position,
            &self.config,
            self.cancel.clone(),
        )?);

        info!(
            path = ?self.path,
            offset = position,
            encoding = detected.decoder.name(),
            "Harvester started for file"
        );

        // Announce the harvester before any line arrives.
        self.send(self.new_event(&file_info, self.offset.get()))?;

        loop {
            let message = match reader.next() {
                Ok(message) => message,
                Err(e) if e.is_recoverable() => {
                    info!(path = ?self.path, "File was truncated. Begin reading file from offset 0");
                    self.offset.set(0);
                    reader.rewind()?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let offset = self.offset.advance(message.bytes as i64);
            let mut event = self.new_event(&file_info, offset);
            if self.filter.should_export(&message.content) {
                event.text = Some(message.content);
                event.bytes = message.bytes;
                event.read_time = Some(message.ts);
                event.json_fields = message.fields;
            }
            self.send(event)?;
        }
    }

    /// Position the handle per the starting-offset precedence and return the position.
    fn init_offset(&self, file: &mut File, file_info: &FileInfo, consumed: u64) -> Result<u64> {
        let persisted = self.offset.get();
        let replaced = self.resume_id.is_some_and(|id| id != file_info.id);
        if persisted > 0 && replaced {
            info!(
                path = ?self.path,
                offset = persisted,
                file = %file_info.id,
                "File was replaced since the offset was recorded, ignoring it"
            );
        } else if persisted > 0 {
            debug!(path = ?self.path, offset = persisted, "Resuming from previous offset");
            file.seek(SeekFrom::Start(persisted as u64))
                .map_err(Error::Seek)?;
            return Ok(persisted as u64);
        }

        if self.config.tail_files {
            let end = file.seek(SeekFrom::End(0)).map_err(Error::Seek)?;
            debug!(path = ?self.path, offset = end, "Tailing new file from its end");
            self.offset.set(end as i64);
            return Ok(end);
        }

        debug!(path = ?self.path, offset = consumed, "Reading new file from the beginning");
        self.offset.set(consumed as i64);
        Ok(consumed)
    }

    fn new_event(&self, file_info: &FileInfo, offset: i64) -> FileEvent {
        let file_state = (self.config.input_type != STDIN_INPUT_TYPE).then(|| FileState {
            source: self.path.clone(),
            offset,
            os: file_info.id.into(),
        });

        FileEvent {
            source: self.path.clone(),
            offset,
            bytes: 0,
            read_time: None,
            text: None,
            json_fields: None,
            input_type: self.config.input_type.clone(),
            document_type: self.config.document_type.clone(),
            event_metadata: self.config.event_metadata.clone(),
            file_info: *file_info,
            file_state,
            json_config: self.config.json.clone(),
        }
    }

    fn send(&self, event: FileEvent) -> Result<()> {
        self.spooler
            .send_blocking(event)
            .map_err(|_| Error::SinkClosed)
    }
}

/// Resources of one harvest; dropping it runs the close sequence.
struct Session<'a> {
    path: &'a Path,
    offset: &'a OffsetTracker,
    state_tx: Option<&'a BoundedSender<i64>>,
    reader: Option<Box<dyn Reader>>,
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        let offset = self.offset.get();
        match self.state_tx {
            Some(state_tx) => match state_tx.send_blocking(offset) {
                Ok(()) => debug!(path = ?self.path, offset, "Reported final offset"),
                Err(e) => warn!(path = ?self.path, offset, error = %e, "Failed to report final offset"),
            },
            None => debug!(path = ?self.path, "No state channel, final offset not reported"),
        }

        match self.reader.take() {
            Some(reader) => {
                drop(reader);
                debug!(path = ?self.path, "Closing file");
            }
            None => debug!(path = ?self.path, "File was never opened, nothing to close"),
        }
    }
}
