// SPDX-License-Identifier: Apache-2.0

//! Offset registry persisted as a versioned JSON file.
//!
//! Entries are keyed by path but restored only while the file at that path
//! still has the recorded `dev:ino` identity, so a rotated-in replacement
//! starts from the beginning instead of inheriting a stale offset.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::harvester::input::{FileId, identity_at};

/// Current schema version of the registry file
pub const REGISTRY_VERSION: u8 = 1;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid registry JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported registry version {0}")]
    UnsupportedVersion(u8),
}

type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Path the file was harvested under
    pub path: String,
    /// Device ID (Unix) or volume serial (Windows)
    pub dev: u64,
    /// Inode number (Unix) or file index (Windows)
    pub ino: u64,
    pub offset: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryState {
    version: u8,
    files: BTreeMap<String, RegistryEntry>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            files: BTreeMap::new(),
        }
    }
}

pub struct Registry {
    path: PathBuf,
    state: RegistryState,
}

impl Registry {
    /// Load the registry at `path`; a missing file yields an empty registry.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match File::open(&path) {
            Ok(file) => {
                let state: RegistryState = serde_json::from_reader(BufReader::new(file))
                    .map_err(|source| RegistryError::Json {
                        path: path.clone(),
                        source,
                    })?;
                if state.version != REGISTRY_VERSION {
                    return Err(RegistryError::UnsupportedVersion(state.version));
                }
                info!(path = ?path, files = state.files.len(), "Loaded offset registry");
                state
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => RegistryState::default(),
            Err(source) => return Err(RegistryError::Io { path, source }),
        };
        Ok(Self { path, state })
    }

    pub fn len(&self) -> usize {
        self.state.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.files.is_empty()
    }

    pub fn get(&self, file: &Path) -> Option<&RegistryEntry> {
        self.state.files.get(&key(file))
    }

    /// Identity and offset to resume `file` from, or `None` when unknown or the
    /// file at that path was replaced. The file can still rotate before it is
    /// opened, so the harvester checks the identity again.
    pub fn resume_point(&self, file: &Path) -> Option<(FileId, i64)> {
        let entry = self.get(file)?;
        let recorded = FileId::new(entry.dev, entry.ino);
        match identity_at(file) {
            Ok(Some(id)) if id == recorded => Some((recorded, entry.offset)),
            Ok(Some(id)) => {
                debug!(path = ?file, current = %id, "File identity changed, ignoring stored offset");
                None
            }
            Ok(None) => None,
            Err(e) => {
                debug!(path = ?file, error = %e, "Unable to stat file, ignoring stored offset");
                None
            }
        }
    }

    pub fn update(&mut self, file: &Path, id: FileId, offset: i64) {
        let path = key(file);
        self.state.files.insert(
            path.clone(),
            RegistryEntry {
                path,
                dev: id.dev(),
                ino: id.ino(),
                offset,
            },
        );
    }

    /// Write the registry to disk atomically.
    pub fn save(&self) -> Result<()> {
        atomic_write(&self.path, &self.state)
    }
}

fn key(file: &Path) -> String {
    file.to_string_lossy().into_owned()
}

fn atomic_write(path: &Path, state: &RegistryState) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let io_err = |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    // Unique per process and per write so concurrent saves never share a temp file.
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state).map_err(|source| RegistryError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)?;
    drop(writer);

    fs::rename(&temp_path, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path().join("registry.json")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_save_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, b"a\nb\n").unwrap();
        let id = FileId::from_path(&log).unwrap();

        let registry_path = dir.path().join("state").join("registry.json");
        let mut registry = Registry::load(&registry_path).unwrap();
        registry.update(&log, id, 2);
        registry.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&registry_path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["files"][&*log.to_string_lossy()]["offset"], 2);

        let registry = Registry::load(&registry_path).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resume_point(&log), Some((id, 2)));
    }

    #[test]
    fn test_replaced_file_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, b"a\nb\n").unwrap();

        let mut registry = Registry::load(dir.path().join("registry.json")).unwrap();
        registry.update(&log, FileId::new(u64::MAX, u64::MAX), 4);
        assert_eq!(registry.resume_point(&log), None);
        assert_eq!(registry.resume_point(&dir.path().join("other.log")), None);
    }

    #[test]
    fn test_unsupported_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, br#"{"version": 9, "files": {}}"#).unwrap();
        assert!(matches!(
            Registry::load(&path),
            Err(RegistryError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_corrupt_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            Registry::load(&path),
            Err(RegistryError::Json { .. })
        ));
    }

    #[test]
    fn test_no_temp_files_left() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = Registry::load(&path).unwrap();
        registry.save().unwrap();
        registry.save().unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("registry.json")]);
    }
}
