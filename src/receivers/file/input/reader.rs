// SPDX-License-Identifier: Apache-2.0

//! Incremental, delimiter-safe reading of appended content.
//!
//! The cursor only ever advances to the end of the last complete line, so a
//! partially written line is left on disk and picked up whole by a later read.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;

use tracing::warn;

/// Upper bound on the bytes read in one pass.
pub const MAX_READ_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

/// Complete lines read in one pass, without their delimiters.
#[derive(Debug, Default)]
pub struct LineBatch {
    data: Vec<u8>,
    spans: Vec<Range<usize>>,
}

impl LineBatch {
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.spans.iter().map(|span| &self.data[span.clone()])
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    /// Nothing was appended since the last read.
    Idle,
    /// The file shrank below the cursor; the cursor was reset to zero and no
    /// content was processed.
    Truncated { size: u64, cursor: u64 },
    /// Complete lines were read; the cursor advanced by `bytes`.
    Lines { batch: LineBatch, bytes: u64 },
    /// A full chunk contained no delimiter and was skipped.
    Skipped { bytes: u64 },
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    match needle {
        [byte] => haystack.iter().position(|b| b == byte),
        _ => haystack.windows(needle.len()).position(|w| w == needle),
    }
}

/// Split `buf` into delimiter-terminated lines.
///
/// Returns the spans of each complete line (delimiter excluded) and the number
/// of bytes consumed, which is the offset just past the last delimiter. A
/// trailing piece without a delimiter is not included.
pub fn split_complete_lines(buf: &[u8], delimiter: &[u8]) -> (Vec<Range<usize>>, usize) {
    let mut spans = Vec::new();
    if delimiter.is_empty() {
        return (spans, 0);
    }

    let mut start = 0;
    while let Some(idx) = find(&buf[start..], delimiter) {
        let end = start + idx;
        spans.push(start..end);
        start = end + delimiter.len();
    }
    (spans, start)
}

/// Cursor over one open file.
///
/// `scanned` is the end of the bytes already examined. It runs ahead of the
/// cursor while a partial line waits for its delimiter.
#[derive(Debug, Clone)]
pub struct LineReader {
    delimiter: Vec<u8>,
    cursor: u64,
    scanned: u64,
}

impl LineReader {
    pub fn new(delimiter: &[u8]) -> Self {
        Self {
            delimiter: delimiter.to_vec(),
            cursor: 0,
            scanned: 0,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: u64) {
        self.cursor = cursor;
        self.scanned = cursor;
    }

    /// True when a file of `size` bytes holds content no read has examined
    /// yet, such as a rewrite after truncation or the rest of a capped read.
    pub fn has_backlog(&self, size: u64) -> bool {
        size > self.scanned
    }

    /// Read whatever complete lines lie between the cursor and `size`.
    pub fn read(&mut self, file: &mut File, size: u64) -> io::Result<ReadOutcome> {
        if size < self.cursor {
            let cursor = self.cursor;
            self.cursor = 0;
            self.scanned = 0;
            file.seek(SeekFrom::Start(0))?;
            return Ok(ReadOutcome::Truncated { size, cursor });
        }
        if size == self.cursor {
            return Ok(ReadOutcome::Idle);
        }

        let pending = (size - self.cursor).min(MAX_READ_CHUNK_BYTES);
        file.seek(SeekFrom::Start(self.cursor))?;

        let mut data = Vec::with_capacity(pending as usize);
        file.take(pending).read_to_end(&mut data)?;
        self.scanned = self.cursor + data.len() as u64;

        let (spans, consumed) = split_complete_lines(&data, &self.delimiter);
        if consumed == 0 && data.len() as u64 == MAX_READ_CHUNK_BYTES {
            // Stop short of the chunk end so a delimiter straddling it is kept whole.
            let skip = data
                .len()
                .saturating_sub(self.delimiter.len().saturating_sub(1)) as u64;
            warn!(
                offset = self.cursor,
                bytes = skip,
                "No delimiter found in a full read chunk, skipping over-long line"
            );
            self.cursor += skip;
            return Ok(ReadOutcome::Skipped { bytes: skip });
        }

        self.cursor += consumed as u64;
        data.truncate(consumed);
        Ok(ReadOutcome::Lines {
            batch: LineBatch { data, spans },
            bytes: consumed as u64,
        })
    }
}
