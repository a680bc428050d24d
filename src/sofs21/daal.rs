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

//! The disk access abstraction layer.
//!
//! [`Sofs`] bridges raw block I/O and typed access to the on-disk
//! structures. It owns in-memory mirrors of the superblock, a bounded table
//! of open inodes and at most one bitmap block at a time; callers receive
//! borrowed views into those mirrors and must re-acquire them after any
//! operation taking `&mut self`, since such an operation may reload or evict
//! the underlying state.

use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::rawdisk::{Block, RawDisk};
use crate::superblock::{Superblock, MAGIC, VERSION};
use crate::{util, IPB, RPB};
use log::{debug, trace};
use std::path::Path;

/// The capacity of the open inode table.
pub const OPEN_INODES_MAX: usize = 16;

/// A handle to an open inode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InodeHandle(usize);

/// An entry of the open inode table.
struct OpenInode {
    /// The inode number.
    number: u16,
    /// The number of times the inode is currently open.
    usecount: u32,
    /// Tells whether the in-memory mirror diverged from the disk.
    dirty: bool,
    /// The in-memory mirror of the inode record.
    inode: Inode,
}

/// The cached bitmap block.
struct BitmapBlock {
    /// Index of the block within the bitmap table.
    rbn: u32,
    /// The block content, seen as 32-bit words.
    words: [u32; RPB],
}

/// An open volume.
///
/// Every public engine operation is a method on this type. Dropping the
/// value flushes all pending state on a best-effort basis; call
/// [`Sofs::close`] to observe flush errors.
pub struct Sofs {
    /// The device open at raw level.
    dev: RawDisk,
    /// The in-memory mirror of the superblock, loaded on first use.
    sb: Option<Box<Superblock>>,
    /// The open inode table.
    itable: [Option<OpenInode>; OPEN_INODES_MAX],
    /// The bitmap block cache.
    bmap: Option<BitmapBlock>,
}

impl Sofs {
    /// Opens the volume backed by the device at the given path.
    ///
    /// The superblock is loaded lazily, on first use.
    pub fn open(path: &Path) -> Result<Self> {
        trace!("open({})", path.display());
        let dev = RawDisk::open(path)?;
        Ok(Self {
            dev,
            sb: None,
            itable: std::array::from_fn(|_| None),
            bmap: None,
        })
    }

    /// Closes the volume, flushing all open inodes, any pending bitmap block
    /// and the superblock.
    pub fn close(mut self) -> Result<()> {
        trace!("close()");
        self.flush()
    }

    /// Writes every dirty mirror back to the device.
    fn flush(&mut self) -> Result<()> {
        for i in 0..OPEN_INODES_MAX {
            let dirty = matches!(&self.itable[i], Some(e) if e.dirty);
            if dirty {
                self.save_inode(InodeHandle(i))?;
            }
        }
        if self.bmap.is_some() {
            self.save_bitmap_block()?;
        }
        self.save_superblock()?;
        Ok(())
    }

    /// Returns a view of the superblock, loading it if not done yet.
    pub fn superblock(&mut self) -> Result<&Superblock> {
        self.load_superblock()?;
        Ok(self.sb.as_ref().unwrap())
    }

    /// Returns a mutable view of the superblock, loading it if not done yet.
    pub fn superblock_mut(&mut self) -> Result<&mut Superblock> {
        self.load_superblock()?;
        Ok(self.sb.as_mut().unwrap())
    }

    fn load_superblock(&mut self) -> Result<()> {
        if self.sb.is_some() {
            return Ok(());
        }
        debug!("loading superblock");
        let mut blk = Block::zeroed();
        self.dev.read_block(0, &mut blk)?;
        let sb = Superblock::from_block(&blk);
        if sb.magic != MAGIC {
            return Err(Error::Inval("not a sofs21 volume"));
        }
        if sb.version != VERSION {
            return Err(Error::Inval("unsupported volume version"));
        }
        if sb.ntotal != self.dev.block_count() {
            return Err(Error::Inval("volume size does not match the device"));
        }
        self.sb = Some(Box::new(sb));
        Ok(())
    }

    /// Writes the cached superblock to block 0.
    ///
    /// Does nothing if the superblock was never loaded.
    pub fn save_superblock(&mut self) -> Result<()> {
        let Some(sb) = &self.sb else {
            return Ok(());
        };
        let blk = sb.to_block();
        self.dev.write_block(0, &blk)?;
        Ok(())
    }

    /// Opens the inode `n` and returns a handle to it.
    ///
    /// If the inode is already open, its use count is incremented and the
    /// same handle is returned; otherwise the inode is read from the inode
    /// table into a free cache slot.
    pub fn open_inode(&mut self, n: u16) -> Result<InodeHandle> {
        let itotal = self.superblock()?.itotal;
        if n >= itotal {
            return Err(Error::Inval("inode number out of range"));
        }
        if let Some(i) = self
            .itable
            .iter()
            .position(|s| matches!(s, Some(e) if e.number == n))
        {
            self.itable[i].as_mut().unwrap().usecount += 1;
            return Ok(InodeHandle(i));
        }
        let i = self
            .itable
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::Inval("too many open inodes"))?;
        debug!("loading inode {n} into slot {i}");
        let mut blk = Block::zeroed();
        self.dev.read_block(1 + n as u32 / IPB as u32, &mut blk)?;
        let inode = blk.as_inodes()[n as usize % IPB];
        self.itable[i] = Some(OpenInode {
            number: n,
            usecount: 1,
            dirty: false,
            inode,
        });
        Ok(InodeHandle(i))
    }

    /// Checks that `h` designates an open inode.
    pub fn check_inode_handle(&self, h: InodeHandle) -> Result<()> {
        if h.0 < OPEN_INODES_MAX && self.itable[h.0].is_some() {
            Ok(())
        } else {
            Err(Error::Inval("invalid inode handle"))
        }
    }

    /// Returns a view of the open inode designated by `h`.
    pub fn inode(&self, h: InodeHandle) -> Result<&Inode> {
        self.check_inode_handle(h)?;
        Ok(&self.itable[h.0].as_ref().unwrap().inode)
    }

    /// Returns a mutable view of the open inode designated by `h`, marking
    /// the mirror dirty.
    pub fn inode_mut(&mut self, h: InodeHandle) -> Result<&mut Inode> {
        self.check_inode_handle(h)?;
        let entry = self.itable[h.0].as_mut().unwrap();
        entry.dirty = true;
        Ok(&mut entry.inode)
    }

    /// Returns the number of the inode designated by `h`.
    pub fn inode_number(&self, h: InodeHandle) -> Result<u16> {
        self.check_inode_handle(h)?;
        Ok(self.itable[h.0].as_ref().unwrap().number)
    }

    /// Writes the open inode designated by `h` back into its inode table
    /// block. The inode stays open.
    pub fn save_inode(&mut self, h: InodeHandle) -> Result<()> {
        self.check_inode_handle(h)?;
        let (n, inode) = {
            let entry = self.itable[h.0].as_ref().unwrap();
            (entry.number, entry.inode)
        };
        let bn = 1 + n as u32 / IPB as u32;
        let mut blk = Block::zeroed();
        self.dev.read_block(bn, &mut blk)?;
        blk.as_inodes_mut()[n as usize % IPB] = inode;
        self.dev.write_block(bn, &blk)?;
        self.itable[h.0].as_mut().unwrap().dirty = false;
        Ok(())
    }

    /// Closes the inode designated by `h`.
    ///
    /// The use count is decremented; when it reaches zero the inode is
    /// flushed if dirty and its slot released.
    pub fn close_inode(&mut self, h: InodeHandle) -> Result<()> {
        self.check_inode_handle(h)?;
        let entry = self.itable[h.0].as_mut().unwrap();
        entry.usecount -= 1;
        if entry.usecount > 0 {
            return Ok(());
        }
        if entry.dirty {
            self.save_inode(h)?;
        }
        debug!("evicting inode slot {}", h.0);
        self.itable[h.0] = None;
        Ok(())
    }

    /// Checks the open inode `h` against the requested access, a bitwise OR
    /// of `R_OK`, `W_OK` and `X_OK`, following the `access(2)` rules.
    pub fn check_inode_access(&self, h: InodeHandle, access: i32) -> Result<bool> {
        let inode = self.inode(h)?;
        let uid = util::current_uid();
        let gid = util::current_gid();
        // the requested access bits line up with a permission triplet
        let requested = (access & 0o7) as u16;
        if uid == 0 {
            // root bypasses read/write checks; execution still requires at
            // least one x bit
            let x_ok = access & libc::X_OK == 0 || inode.mode & 0o111 != 0;
            return Ok(x_ok);
        }
        let granted = if uid == inode.owner {
            (inode.mode >> 6) & 0o7
        } else if gid == inode.group {
            (inode.mode >> 3) & 0o7
        } else {
            inode.mode & 0o7
        };
        Ok(granted & requested == requested)
    }

    /// Returns a mutable view of the words of bitmap block `rbn`.
    ///
    /// If a different bitmap block is currently cached, it is saved first.
    pub fn bitmap_block(&mut self, rbn: u32) -> Result<&mut [u32; RPB]> {
        let cached = match &self.bmap {
            Some(c) => Some(c.rbn),
            None => None,
        };
        if cached != Some(rbn) {
            if cached.is_some() {
                self.save_bitmap_block()?;
            }
            let sb = self.superblock()?;
            let (rbm_start, rbm_size) = (sb.rbm_start, sb.rbm_size);
            if rbn >= rbm_size {
                return Err(Error::Inval("bitmap block number out of range"));
            }
            debug!("loading bitmap block {rbn}");
            let mut blk = Block::zeroed();
            self.dev.read_block(rbm_start + rbn, &mut blk)?;
            self.bmap = Some(BitmapBlock {
                rbn,
                words: *blk.as_refs(),
            });
        }
        Ok(&mut self.bmap.as_mut().unwrap().words)
    }

    /// Writes the currently cached bitmap block to the device.
    pub fn save_bitmap_block(&mut self) -> Result<()> {
        let rbm_start = self.superblock()?.rbm_start;
        let Some(cache) = &self.bmap else {
            return Err(Error::Inval("no bitmap block is cached"));
        };
        let mut blk = Block::zeroed();
        *blk.as_refs_mut() = cache.words;
        self.dev.write_block(rbm_start + cache.rbn, &blk)?;
        Ok(())
    }

    /// Reads the data block `bn` of the data block pool into `buf`.
    pub fn read_data_block(&mut self, bn: u32, buf: &mut Block) -> Result<()> {
        let sb = self.superblock()?;
        let (dbp_start, dbtotal) = (sb.dbp_start, sb.dbtotal);
        if bn >= dbtotal {
            return Err(Error::Inval("data block number out of range"));
        }
        self.dev.read_block(dbp_start + bn, buf)?;
        Ok(())
    }

    /// Writes `buf` to the data block `bn` of the data block pool.
    pub fn write_data_block(&mut self, bn: u32, buf: &Block) -> Result<()> {
        let sb = self.superblock()?;
        let (dbp_start, dbtotal) = (sb.dbp_start, sb.dbtotal);
        if bn >= dbtotal {
            return Err(Error::Inval("data block number out of range"));
        }
        self.dev.write_block(dbp_start + bn, buf)?;
        Ok(())
    }
}

impl Drop for Sofs {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            debug!("flush on drop failed: {e}");
        }
    }
}
