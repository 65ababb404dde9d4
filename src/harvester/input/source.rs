// SPDX-License-Identifier: Apache-2.0

//! Opening harvested files.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use super::file_id::FileId;
use crate::harvester::error::{Error, Result};

/// Filesystem metadata captured when the file was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub id: FileId,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl FileInfo {
    pub fn from_file(file: &File) -> io::Result<Self> {
        let metadata = file.metadata()?;
        Ok(Self {
            id: FileId::from_file(file)?,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

/// Open `path` read-only, refusing anything that is not a regular file.
///
/// Symlinks are rejected before opening, and the opened handle is checked again
/// so a path swapped for a device or directory in between is still refused.
pub fn open_regular(path: &Path) -> Result<(File, FileInfo)> {
    let link_meta = fs::symlink_metadata(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if link_meta.file_type().is_symlink() {
        return Err(Error::NotRegularFile(path.to_path_buf()));
    }

    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let metadata = file.metadata().map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if !metadata.file_type().is_file() {
        return Err(Error::NotRegularFile(path.to_path_buf()));
    }

    let info = FileInfo::from_file(&file).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((file, info))
}

/// Identity of the file currently at `path`, or `None` if nothing is there.
pub fn identity_at(path: &Path) -> io::Result<Option<FileId>> {
    match FileId::from_path(path) {
        Ok(id) => Ok(Some(id)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
