// SPDX-License-Identifier: Apache-2.0

//! Per-file harvesting.
//!
//! A [`Harvester`] opens one file, resolves its encoding, picks the starting
//! offset (persisted offset, then `tail_files`, then the position after
//! encoding detection) and forwards each line as a [`FileEvent`]. Lines that
//! fail the include/exclude filter are still reported as heartbeats so the
//! offset keeps moving. Truncation restarts the file from offset 0; every
//! other error ends the harvest, after which the final offset is sent on the
//! state channel and the file is released.

pub mod config;
pub mod encoding;
pub mod error;
pub mod event;
pub mod filter;
mod harvest;
pub mod input;
pub mod offset_tracker;
pub mod reader;

pub use config::{EventMetadata, HarvesterConfig, JsonConfig, MatchMode, MultilineConfig};
pub use encoding::EncodingKind;
pub use error::{Error, Result};
pub use event::{FileEvent, FileState};
pub use harvest::Harvester;
pub use offset_tracker::OffsetTracker;
