// SPDX-License-Identifier: Apache-2.0

mod file_id;
mod source;

pub use file_id::FileId;
pub use source::{FileInfo, identity_at, open_regular};
