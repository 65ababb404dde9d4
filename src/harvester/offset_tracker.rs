// SPDX-License-Identifier: Apache-2.0

//! Read position of the file currently being harvested.
//!
//! The tracked value is the number of bytes attributed to emitted events:
//! it only moves forward by the byte length of each completed line, except
//! for the explicit reset to zero after truncation.
//!
//! Only the harvester thread writes. The value lives in an `AtomicI64` so that
//! a cloned handle (for example a state report requested by whoever supervises
//! the harvester) can read it from another thread without tearing.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone, Default)]
pub struct OffsetTracker {
    value: Arc<AtomicI64>,
}

impl OffsetTracker {
    pub fn new(initial: i64) -> Self {
        Self {
            value: Arc::new(AtomicI64::new(initial)),
        }
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Add `delta` (never negative) to the current position and return the new value.
    pub fn advance(&self, delta: i64) -> i64 {
        debug_assert!(delta >= 0, "offset can only advance, got delta {}", delta);
        let delta = delta.max(0);
        self.value.fetch_add(delta, Ordering::AcqRel) + delta
    }
}
