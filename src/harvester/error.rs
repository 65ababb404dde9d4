// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use crate::harvester::encoding::DetectError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed opening {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("given file is not a regular file: {0:?}")]
    NotRegularFile(PathBuf),

    #[error("initialising encoding for {path:?} failed: {reason}")]
    EncodingDetection { path: PathBuf, reason: DetectError },

    #[error("file was truncated")]
    Truncated,

    #[error("read error: {0}")]
    Read(#[source] std::io::Error),

    #[error("can not seek source: {0}")]
    Seek(#[source] std::io::Error),

    #[error("downstream channel closed")]
    SinkClosed,

    #[error("file inactive for longer than {0:?}")]
    Inactive(std::time::Duration),

    #[error("file was removed")]
    Removed,

    #[error("file was renamed")]
    Renamed,

    #[error("harvester stopped")]
    Stopped,

    /// Deadline set by a multiline reader passed without new input.
    #[error("read timeout")]
    Timeout,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Only truncation lets the harvest loop continue; everything else ends it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Truncated)
    }

    /// Expected ends of a harvest (idle close, rotation, explicit stop) rather than faults.
    pub fn is_close_policy(&self) -> bool {
        matches!(
            self,
            Error::Inactive(_) | Error::Removed | Error::Renamed | Error::Stopped
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
