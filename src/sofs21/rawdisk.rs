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

//! Raw block access to the backing device.
//!
//! The device is a regular file seen as a sequence of fixed-size blocks; all
//! higher layers perform I/O exclusively through [`RawDisk`].

use crate::direntry::DirectorySlot;
use crate::inode::Inode;
use crate::{BLOCK_SIZE, DPB, IPB, RPB};
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;

/// A block-sized buffer.
///
/// The alignment allows in-place reinterpretation as any of the on-disk
/// record arrays.
#[repr(C, align(8))]
#[derive(Clone)]
pub struct Block {
    /// The raw content of the block.
    pub bytes: [u8; BLOCK_SIZE],
}

impl Block {
    /// Returns a block filled with zeros.
    pub fn zeroed() -> Self {
        Self {
            bytes: [0; BLOCK_SIZE],
        }
    }

    /// Views the block as an array of block references.
    pub fn as_refs(&self) -> &[u32; RPB] {
        unsafe { &*(self.bytes.as_ptr() as *const [u32; RPB]) }
    }

    /// Views the block as a mutable array of block references.
    pub fn as_refs_mut(&mut self) -> &mut [u32; RPB] {
        unsafe { &mut *(self.bytes.as_mut_ptr() as *mut [u32; RPB]) }
    }

    /// Views the block as an array of inodes.
    pub fn as_inodes(&self) -> &[Inode; IPB] {
        unsafe { &*(self.bytes.as_ptr() as *const [Inode; IPB]) }
    }

    /// Views the block as a mutable array of inodes.
    pub fn as_inodes_mut(&mut self) -> &mut [Inode; IPB] {
        unsafe { &mut *(self.bytes.as_mut_ptr() as *mut [Inode; IPB]) }
    }

    /// Views the block as an array of directory slots.
    pub fn as_slots(&self) -> &[DirectorySlot; DPB] {
        unsafe { &*(self.bytes.as_ptr() as *const [DirectorySlot; DPB]) }
    }

    /// Views the block as a mutable array of directory slots.
    pub fn as_slots_mut(&mut self) -> &mut [DirectorySlot; DPB] {
        unsafe { &mut *(self.bytes.as_mut_ptr() as *mut [DirectorySlot; DPB]) }
    }
}

/// A device open at raw level.
pub struct RawDisk {
    /// The backing file.
    file: File,
    /// The total number of blocks on the device.
    ntotal: u32,
}

impl RawDisk {
    /// Opens the device at the given path for read/write access.
    ///
    /// The device size must be a non-zero multiple of the block size.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "device size is not a multiple of the block size",
            ));
        }
        Ok(Self {
            file,
            ntotal: (len / BLOCK_SIZE as u64) as u32,
        })
    }

    /// Creates (or truncates) a device file with `ntotal` blocks, filled with
    /// zeros, then opens it.
    pub fn create(path: &Path, ntotal: u32) -> io::Result<Self> {
        if ntotal == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot create an empty device",
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(ntotal as u64 * BLOCK_SIZE as u64)?;
        Ok(Self { file, ntotal })
    }

    /// Returns the total number of blocks on the device.
    pub fn block_count(&self) -> u32 {
        self.ntotal
    }

    /// Reads the block `bn` into `buf`.
    pub fn read_block(&mut self, bn: u32, buf: &mut Block) -> io::Result<()> {
        self.check_block(bn)?;
        self.file
            .seek(SeekFrom::Start(bn as u64 * BLOCK_SIZE as u64))?;
        self.file.read_exact(&mut buf.bytes)
    }

    /// Writes `buf` to the block `bn`.
    pub fn write_block(&mut self, bn: u32, buf: &Block) -> io::Result<()> {
        self.check_block(bn)?;
        self.file
            .seek(SeekFrom::Start(bn as u64 * BLOCK_SIZE as u64))?;
        self.file.write_all(&buf.bytes)
    }

    fn check_block(&self, bn: u32) -> io::Result<()> {
        if bn < self.ntotal {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block number out of range",
            ))
        }
    }
}
