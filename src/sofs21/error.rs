/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Errors reported by the engine, mirroring POSIX error codes.

use std::io;
use thiserror::Error;

/// An error raised by a filesystem operation.
#[derive(Debug, Error)]
pub enum Error {
    /// A malformed argument: invalid handle, out-of-range inode or block
    /// number, permissions outside `0..=0o777`, bad name or path.
    #[error("invalid argument: {0}")]
    Inval(&'static str),
    /// No free inode or data block left.
    #[error("no space left on volume")]
    NoSpace,
    /// The inode block position is already assigned.
    #[error("block position already assigned")]
    Stale,
    /// The directory entry already exists.
    #[error("entry already exists")]
    Exists,
    /// The directory entry does not exist.
    #[error("no such entry")]
    NotFound,
    /// A path component is not a directory.
    #[error("not a directory")]
    NotDir,
    /// Missing traverse permission on a path component.
    #[error("permission denied")]
    Access,
    /// An error from the underlying device.
    #[error("device error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the errno value matching the error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Inval(_) => libc::EINVAL,
            Self::NoSpace => libc::ENOSPC,
            Self::Stale => libc::ESTALE,
            Self::Exists => libc::EEXIST,
            Self::NotFound => libc::ENOENT,
            Self::NotDir => libc::ENOTDIR,
            Self::Access => libc::EACCES,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// The result of a filesystem operation.
pub type Result<T> = std::result::Result<T, Error>;
