// SPDX-License-Identifier: Apache-2.0

//! Raw byte source over an open log file.
//!
//! A read never reports end of file to its caller. Every read is preceded by a
//! truncation check. At EOF the file is checked again together with the close
//! policies, then the reader sleeps for the current backoff and tries again.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ByteSource;
use super::backoff::Backoff;
use crate::harvester::config::HarvesterConfig;
use crate::harvester::error::{Error, Result};
use crate::harvester::input::{FileId, FileInfo, identity_at};

/// Longest single sleep while backing off, so a stop request is noticed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(50);

pub struct LogFile {
    file: File,
    path: PathBuf,
    id: FileId,
    /// Absolute position of the handle in the file
    position: u64,
    /// File size seen by the last truncation check
    last_size: u64,
    last_read: Instant,
    backoff: Backoff,
    close_older: Duration,
    force_close_files: bool,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl LogFile {
    /// Wrap `file`, whose handle is already positioned at `position`. `info`
    /// is the metadata captured when the file was opened.
    pub fn new(
        file: File,
        path: PathBuf,
        info: &FileInfo,
        position: u64,
        config: &HarvesterConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            file,
            path,
            id: info.id,
            position,
            last_size: info.size,
            last_read: Instant::now(),
            backoff: Backoff::new(config.backoff, config.max_backoff, config.backoff_factor),
            close_older: config.close_older,
            force_close_files: config.force_close_files,
            deadline: None,
            cancel,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fails with `Truncated` if the file shrank since the last check or no
    /// longer reaches the read position.
    fn check_truncation(&mut self) -> Result<()> {
        let size = self.file.metadata().map_err(Error::Read)?.len();
        if size < self.position || size < self.last_size {
            debug!(
                path = ?self.path,
                size,
                last_size = self.last_size,
                position = self.position,
                "File shrank"
            );
            return Err(Error::Truncated);
        }
        self.last_size = size;
        Ok(())
    }

    /// Checks run whenever a read hits the current end of the file.
    fn check_eof(&mut self) -> Result<()> {
        self.check_truncation()?;

        if self.last_read.elapsed() > self.close_older {
            return Err(Error::Inactive(self.close_older));
        }

        if self.force_close_files {
            match identity_at(&self.path) {
                Ok(None) => return Err(Error::Removed),
                Ok(Some(id)) if id != self.id => return Err(Error::Renamed),
                Ok(Some(_)) => {}
                Err(e) => debug!(path = ?self.path, error = %e, "Unable to stat harvested path"),
            }
        }
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        let now = Instant::now();
        // An unrepresentable backoff is bounded by the deadline or a single slice.
        let mut until = now
            .checked_add(self.backoff.next_wait())
            .unwrap_or_else(|| self.deadline.unwrap_or(now + WAIT_SLICE));
        if let Some(deadline) = self.deadline {
            if now >= deadline {
                return Err(Error::Timeout);
            }
            until = until.min(deadline);
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Stopped);
            }
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(WAIT_SLICE));
        }
    }
}

impl ByteSource for LogFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Stopped);
            }
            self.check_truncation()?;
            match self.file.read(buf) {
                Ok(0) => {}
                Ok(n) => {
                    self.position += n as u64;
                    self.last_read = Instant::now();
                    self.backoff.reset();
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Read(e)),
            }

            self.check_eof()?;
            self.wait()?;
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0)).map_err(Error::Seek)?;
        self.position = 0;
        self.last_size = 0;
        self.last_read = Instant::now();
        self.backoff.reset();
        Ok(())
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }
}
