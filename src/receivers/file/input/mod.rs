// SPDX-License-Identifier: Apache-2.0

pub mod file_id;
pub mod reader;

pub use file_id::{FileId, FileSnapshot};
pub use reader::{LineBatch, LineReader, MAX_READ_CHUNK_BYTES, ReadOutcome, split_complete_lines};
