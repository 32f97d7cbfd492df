/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Error types shared by every boom subsystem.

use std::io;

use thiserror::Error;

/// The error type returned by all public boom operations.
#[derive(Debug, Error)]
pub enum BoomError {
    /// A malformed BLS or INI style line: bad name characters, bad
    /// quoting, or a missing separator.
    #[error("parse error: {0}")]
    Parse(String),

    /// An unknown, ambiguous or duplicate profile identity, or an
    /// invalid profile key value.
    #[error("profile error: {0}")]
    Profile(String),

    /// A boot entry that is missing mandatory keys, is read-only, or
    /// does not exist on disk.
    #[error("entry error: {0}")]
    Entry(String),

    /// The configured root device does not exist or is not a block
    /// device.
    #[error("root device error: {0}")]
    RootDevice(String),

    /// Inconsistent fence markers in a legacy bootloader configuration
    /// file.
    #[error("legacy format error: {0}")]
    LegacyFormat(String),

    /// An invalid image cache operation: non-regular source file, a
    /// path outside the cache directory, or a restore or purge from the
    /// wrong state.
    #[error("cache error: {0}")]
    Cache(String),

    /// A fatal problem with the persistent boom configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A malformed command line mount or swap specification.
    #[error("mount error: {0}")]
    Mount(String),

    /// An underlying filesystem error, propagated with the path that
    /// was being operated on.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl BoomError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        BoomError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BoomError>;

/// Extension adding path context to raw I/O results.
pub(crate) trait IoContext<T> {
    fn path_context(self, path: impl AsRef<str>) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn path_context(self, path: impl AsRef<str>) -> Result<T> {
        self.map_err(|e| BoomError::io(path.as_ref(), e))
    }
}
