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

//! SOFS21 is a small UNIX-style filesystem stored on a regular file seen as an
//! array of fixed-size blocks.
//!
//! The volume is laid out as follows:
//! - Block 0: the superblock
//! - Blocks `1..1 + itsize`: the inode table
//! - Blocks `1 + itsize..dbp_start`: the reference bitmap table
//! - Blocks `dbp_start..ntotal`: the data block pool
//!
//! The engine is organized in layers, bottom up:
//! - [`rawdisk`]: block I/O over the backing file
//! - [`daal`]: the disk access abstraction layer, caching the superblock, a
//!   bounded set of open inodes and one bitmap block at a time
//! - free-space management: an inode bitmap plus a FIFO of deleted inodes
//!   ([`freeinodes`]), and a data-block bitmap seconded by two in-superblock
//!   reference caches ([`freedatablocks`])
//! - [`inodeblocks`]: translation of file-relative block indices through
//!   direct, single-indirect and double-indirect references
//! - [`direntries`]: the directory slot array and path traversal
//! - [`mksofs`]: the formatter
//!
//! All structures are stored in host byte order; a volume is not portable
//! across architectures of different endianness.

use std::mem::size_of;

pub mod daal;
pub mod direntries;
pub mod direntry;
pub mod error;
pub mod freedatablocks;
pub mod freeinodes;
pub mod inode;
pub mod inodeblocks;
pub mod mksofs;
pub mod prompt;
pub mod rawdisk;
pub mod superblock;
pub mod util;

pub use daal::{InodeHandle, Sofs};
pub use direntry::DirectorySlot;
pub use error::{Error, Result};
pub use inode::{FileType, Inode};
pub use rawdisk::{Block, RawDisk};
pub use superblock::Superblock;

/// The size of a block in bytes.
pub const BLOCK_SIZE: usize = 1024;

/// Null reference to a block.
pub const NULL_BLOCK: u32 = 0xffffffff;
/// Null reference to an inode.
pub const NULL_INODE: u16 = 0xffff;

/// The number of inodes per block of the inode table.
pub const IPB: usize = BLOCK_SIZE / size_of::<Inode>();
/// The number of block references per block.
pub const RPB: usize = BLOCK_SIZE / size_of::<u32>();
/// The number of directory slots per block.
pub const DPB: usize = BLOCK_SIZE / size_of::<DirectorySlot>();

/// The number of direct references in an inode.
pub const N_DIRECT: usize = 7;

/// The maximum number of inodes a volume can hold.
pub const MAX_INODES: usize = 3200;

/// The maximum length of a file name, in bytes (two directory slots).
pub const FILENAME_MAX: usize = 2 * direntry::SLOT_NAME_LEN;
