// SPDX-License-Identifier: Apache-2.0

//! File identity used to tell growth, truncation and rotation apart.
//!
//! A [`FileSnapshot`] carries the cheap-to-compare attributes (mode, size,
//! modification time) checked on every poll, plus the underlying [`FileId`]
//! (device + inode) used by the periodic forced recheck. On platforms without
//! a stable identifier the recheck falls back to comparing mode, size and
//! modification time, which misses a rewrite that leaves all three unchanged.

use std::fs::{File, Metadata};
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Device + inode pair identifying the underlying file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;

        Some(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Point-in-time view of a file's identity attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    mode: u32,
    size: u64,
    modified: Option<SystemTime>,
    is_file: bool,
    id: Option<FileId>,
}

#[cfg(unix)]
fn mode_of(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(not(unix))]
fn mode_of(metadata: &Metadata) -> u32 {
    u32::from(metadata.permissions().readonly())
}

impl FileSnapshot {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            mode: mode_of(metadata),
            size: metadata.len(),
            modified: metadata.modified().ok(),
            is_file: metadata.is_file(),
            id: FileId::from_metadata(metadata),
        }
    }

    pub fn of_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    pub fn of_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn id(&self) -> Option<FileId> {
        self.id
    }

    /// Cheap poll comparison: mode and modification time match, and for
    /// regular files the size matches too.
    pub fn is_unchanged(&self, current: &FileSnapshot) -> bool {
        self.mode == current.mode
            && (!self.is_file || self.size == current.size)
            && self.modified == current.modified
    }

    /// Whether both snapshots describe the same underlying file.
    pub fn same_file(&self, other: &FileSnapshot) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.is_unchanged(other),
        }
    }
}
