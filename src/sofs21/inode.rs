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

//! An inode represents a file in the filesystem.
//!
//! The name of the file is not stored in the inode but in the directory entry
//! associated with it, since several entries can refer to the same inode
//! (hard links).

use crate::{N_DIRECT, NULL_BLOCK};
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// Inode type: Directory
pub const INODE_TYPE_DIRECTORY: u16 = 0x4000;
/// Inode type: Regular file
pub const INODE_TYPE_REGULAR: u16 = 0x8000;
/// Inode type: Symbolic link
pub const INODE_TYPE_SYMLINK: u16 = 0xa000;

/// The mask covering the type bits of the `mode` field.
pub const INODE_TYPE_MASK: u16 = 0xf000;
/// The mask covering the permission bits of the `mode` field.
pub const INODE_PERM_MASK: u16 = 0o777;

/// The type of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
}

impl FileType {
    /// Returns the type bits to be stored in an inode's `mode` field.
    pub fn mode_bits(self) -> u16 {
        match self {
            Self::Regular => INODE_TYPE_REGULAR,
            Self::Directory => INODE_TYPE_DIRECTORY,
            Self::Symlink => INODE_TYPE_SYMLINK,
        }
    }

    /// Returns the type encoded in the given `mode` field, if valid.
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & INODE_TYPE_MASK {
            INODE_TYPE_REGULAR => Some(Self::Regular),
            INODE_TYPE_DIRECTORY => Some(Self::Directory),
            INODE_TYPE_SYMLINK => Some(Self::Symlink),
            _ => None,
        }
    }
}

/// The on-disk inode record.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Inode {
    /// Type and permissions.
    pub mode: u16,
    /// The number of directory entries referring to this inode.
    pub lnkcnt: u16,
    /// User ID of the owner.
    pub owner: u32,
    /// Group ID of the owner.
    pub group: u32,
    /// Size of the file in bytes.
    pub size: u32,
    /// Timestamp of the last access.
    pub atime: u32,
    /// Timestamp of the last content modification.
    pub mtime: u32,
    /// Timestamp of the last metadata modification.
    pub ctime: u32,
    /// Direct block references.
    pub d: [u32; N_DIRECT],
    /// Single-indirect block reference.
    pub i1: u32,
    /// Double-indirect block reference.
    pub i2: u32,
}

// IPB is derived from this size; the inode table layout depends on it
const_assert_eq!(size_of::<Inode>(), 64);

impl Inode {
    /// Returns an inode in the clean state: every numeric field at zero and
    /// every block reference null.
    pub fn clean() -> Self {
        Self {
            mode: 0,
            lnkcnt: 0,
            owner: 0,
            group: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            d: [NULL_BLOCK; N_DIRECT],
            i1: NULL_BLOCK,
            i2: NULL_BLOCK,
        }
    }

    /// Returns the type of the file, if the type bits are valid.
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    /// Tells whether the inode is a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & INODE_TYPE_MASK == INODE_TYPE_DIRECTORY
    }

    /// Returns the permission bits of the inode.
    pub fn perm(&self) -> u16 {
        self.mode & INODE_PERM_MASK
    }
}
