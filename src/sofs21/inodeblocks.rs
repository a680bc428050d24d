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

//! Management of the blocks belonging to an inode.
//!
//! A file sees its content as an array of blocks indexed by the *inode block
//! number* (ibn). The first [`N_DIRECT`] positions live in the inode itself;
//! the next [`RPB`] go through the single-indirect reference `i1`; the
//! remaining `RPB²` go through the double-indirect reference `i2`, a block
//! of references to blocks of references.

use crate::daal::{InodeHandle, Sofs};
use crate::error::{Error, Result};
use crate::inode::{FileType, Inode};
use crate::rawdisk::Block;
use crate::{util, N_DIRECT, NULL_BLOCK, RPB};
use log::trace;

/// The position of an inode block within the reference tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BlockPos {
    /// A direct slot of the inode.
    Direct(usize),
    /// A slot of the single-indirect block.
    Indirect(usize),
    /// Slots of the double-indirect tree: first level, then second level.
    Double(usize, usize),
}

/// Translates an inode block number into its position in the reference tree.
fn block_position(ibn: u32) -> Result<BlockPos> {
    let ibn = ibn as usize;
    if ibn < N_DIRECT {
        return Ok(BlockPos::Direct(ibn));
    }
    let ibn = ibn - N_DIRECT;
    if ibn < RPB {
        return Ok(BlockPos::Indirect(ibn));
    }
    let ibn = ibn - RPB;
    if ibn < RPB * RPB {
        return Ok(BlockPos::Double(ibn / RPB, ibn % RPB));
    }
    Err(Error::Inval("inode block number out of range"))
}

impl Sofs {
    /// Returns the data block number stored at inode block position `ibn`,
    /// which may be [`NULL_BLOCK`].
    pub fn get_inode_block(&mut self, h: InodeHandle, ibn: u32) -> Result<u32> {
        trace!("get_inode_block({h:?}, {ibn})");
        self.check_inode_handle(h)?;
        match block_position(ibn)? {
            BlockPos::Direct(i) => Ok(self.inode(h)?.d[i]),
            BlockPos::Indirect(i) => {
                let i1 = self.inode(h)?.i1;
                if i1 == NULL_BLOCK {
                    return Ok(NULL_BLOCK);
                }
                Ok(self.read_ref_block(i1)?[i])
            }
            BlockPos::Double(q, r) => {
                let i2 = self.inode(h)?.i2;
                if i2 == NULL_BLOCK {
                    return Ok(NULL_BLOCK);
                }
                let b1 = self.read_ref_block(i2)?[q];
                if b1 == NULL_BLOCK {
                    return Ok(NULL_BLOCK);
                }
                Ok(self.read_ref_block(b1)?[r])
            }
        }
    }

    /// Associates a freshly allocated data block to the inode block position
    /// `ibn` and returns its number.
    ///
    /// Index blocks missing on the path are allocated and initialized first;
    /// the leaf data block is allocated last, so that a failure never leaves
    /// a reference to a block that was not allocated.
    pub fn alloc_inode_block(&mut self, h: InodeHandle, ibn: u32) -> Result<u32> {
        trace!("alloc_inode_block({h:?}, {ibn})");
        self.check_inode_handle(h)?;
        match block_position(ibn)? {
            BlockPos::Direct(i) => {
                if self.inode(h)?.d[i] != NULL_BLOCK {
                    return Err(Error::Stale);
                }
                let bn = self.alloc_data_block()?;
                self.inode_mut(h)?.d[i] = bn;
                self.save_inode(h)?;
                Ok(bn)
            }
            BlockPos::Indirect(i) => {
                let mut i1 = self.inode(h)?.i1;
                let mut refs = if i1 != NULL_BLOCK {
                    let refs = self.read_ref_block(i1)?;
                    if refs[i] != NULL_BLOCK {
                        return Err(Error::Stale);
                    }
                    refs
                } else {
                    [NULL_BLOCK; RPB]
                };
                if i1 == NULL_BLOCK {
                    i1 = self.alloc_data_block()?;
                    self.write_ref_block(i1, &refs)?;
                    self.inode_mut(h)?.i1 = i1;
                    self.save_inode(h)?;
                }
                let bn = self.alloc_data_block()?;
                refs[i] = bn;
                self.write_ref_block(i1, &refs)?;
                self.save_inode(h)?;
                Ok(bn)
            }
            BlockPos::Double(q, r) => {
                let mut i2 = self.inode(h)?.i2;
                let mut l2 = if i2 != NULL_BLOCK {
                    self.read_ref_block(i2)?
                } else {
                    [NULL_BLOCK; RPB]
                };
                let mut b1 = l2[q];
                let mut refs = if b1 != NULL_BLOCK {
                    let refs = self.read_ref_block(b1)?;
                    if refs[r] != NULL_BLOCK {
                        return Err(Error::Stale);
                    }
                    refs
                } else {
                    [NULL_BLOCK; RPB]
                };
                if i2 == NULL_BLOCK {
                    i2 = self.alloc_data_block()?;
                    self.write_ref_block(i2, &l2)?;
                    self.inode_mut(h)?.i2 = i2;
                    self.save_inode(h)?;
                }
                if b1 == NULL_BLOCK {
                    b1 = self.alloc_data_block()?;
                    self.write_ref_block(b1, &refs)?;
                    l2[q] = b1;
                    self.write_ref_block(i2, &l2)?;
                }
                let bn = self.alloc_data_block()?;
                refs[r] = bn;
                self.write_ref_block(b1, &refs)?;
                self.save_inode(h)?;
                Ok(bn)
            }
        }
    }

    /// Frees every block of the inode at positions greater than or equal to
    /// `ffbn`. Holes are skipped; index blocks whose entries all become null
    /// are freed as well. `ffbn == 0` releases everything.
    pub fn free_inode_blocks(&mut self, h: InodeHandle, ffbn: u32) -> Result<()> {
        trace!("free_inode_blocks({h:?}, {ffbn})");
        self.check_inode_handle(h)?;
        // direct references
        for i in 0..N_DIRECT {
            if (i as u32) < ffbn {
                continue;
            }
            let bn = self.inode(h)?.d[i];
            if bn != NULL_BLOCK {
                self.inode_mut(h)?.d[i] = NULL_BLOCK;
                self.free_data_block(bn)?;
            }
        }
        // single-indirect subtree
        let i1 = self.inode(h)?.i1;
        if i1 != NULL_BLOCK && ffbn < (N_DIRECT + RPB) as u32 {
            let start = (ffbn as usize).saturating_sub(N_DIRECT);
            if self.release_ref_block(i1, start)? {
                self.inode_mut(h)?.i1 = NULL_BLOCK;
                self.free_data_block(i1)?;
            }
        }
        // double-indirect subtree
        let i2 = self.inode(h)?.i2;
        let dstart = (N_DIRECT + RPB) as u32;
        if i2 != NULL_BLOCK {
            let mut l2 = self.read_ref_block(i2)?;
            let mut modified = false;
            for q in 0..RPB {
                let b1 = l2[q];
                if b1 == NULL_BLOCK {
                    continue;
                }
                let base = dstart + (q * RPB) as u32;
                if base + RPB as u32 <= ffbn {
                    continue;
                }
                let start = ffbn.saturating_sub(base) as usize;
                if self.release_ref_block(b1, start)? {
                    l2[q] = NULL_BLOCK;
                    modified = true;
                    self.free_data_block(b1)?;
                }
            }
            if l2.iter().all(|&r| r == NULL_BLOCK) {
                self.inode_mut(h)?.i2 = NULL_BLOCK;
                self.free_data_block(i2)?;
            } else if modified {
                self.write_ref_block(i2, &l2)?;
            }
        }
        self.save_inode(h)?;
        Ok(())
    }

    /// Reads the inode block `ibn` into `buf`.
    ///
    /// An unallocated position yields a zero-filled buffer.
    pub fn read_inode_block(&mut self, h: InodeHandle, ibn: u32, buf: &mut Block) -> Result<()> {
        let bn = self.get_inode_block(h, ibn)?;
        if bn == NULL_BLOCK {
            buf.bytes.fill(0);
            Ok(())
        } else {
            self.read_data_block(bn, buf)
        }
    }

    /// Writes `buf` to the inode block `ibn`, allocating the position if it
    /// was not allocated yet.
    pub fn write_inode_block(&mut self, h: InodeHandle, ibn: u32, buf: &Block) -> Result<()> {
        let mut bn = self.get_inode_block(h, ibn)?;
        if bn == NULL_BLOCK {
            bn = self.alloc_inode_block(h, ibn)?;
        }
        self.write_data_block(bn, buf)
    }

    /// Gets a new inode of the given type and permissions.
    ///
    /// A free inode is preferred; when none is left, the oldest deleted inode
    /// is pulled from the queue, its content reclaimed, and reused.
    pub fn new_inode(&mut self, ftype: FileType, perm: u16) -> Result<u16> {
        trace!("new_inode({ftype:?}, {perm:#o})");
        if perm > 0o777 {
            return Err(Error::Inval("permissions out of range"));
        }
        let n = match self.alloc_inode()? {
            Some(n) => n,
            None => {
                let Some(n) = self.unqueue_hidden_inode()? else {
                    return Err(Error::NoSpace);
                };
                let h = self.open_inode(n)?;
                let res = self.free_inode_blocks(h, 0);
                self.close_inode(h)?;
                res?;
                n
            }
        };
        let h = self.open_inode(n)?;
        let now = util::get_timestamp();
        let res = (|| {
            let inode = self.inode_mut(h)?;
            *inode = Inode::clean();
            inode.mode = ftype.mode_bits() | perm;
            inode.owner = util::current_uid();
            inode.group = util::current_gid();
            inode.atime = now;
            inode.mtime = now;
            inode.ctime = now;
            self.save_inode(h)
        })();
        self.close_inode(h)?;
        res?;
        Ok(n)
    }

    /// Transfers the inode `n` to the queue of deleted inodes, keeping its
    /// content on disk.
    ///
    /// When the queue is full, its oldest entry is reclaimed for real: its
    /// blocks are released and the inode freed.
    pub fn remove_inode(&mut self, n: u16) -> Result<()> {
        trace!("remove_inode({n})");
        if self.hide_inode(n)? {
            return Ok(());
        }
        let Some(victim) = self.unqueue_hidden_inode()? else {
            return Err(Error::NoSpace);
        };
        let h = self.open_inode(victim)?;
        let res = self.free_inode_blocks(h, 0);
        self.close_inode(h)?;
        res?;
        self.free_inode(victim)?;
        if !self.hide_inode(n)? {
            return Err(Error::NoSpace);
        }
        Ok(())
    }

    /// Reads a block of references from the data pool.
    fn read_ref_block(&mut self, bn: u32) -> Result<[u32; RPB]> {
        let mut blk = Block::zeroed();
        self.read_data_block(bn, &mut blk)?;
        Ok(*blk.as_refs())
    }

    /// Writes a block of references to the data pool.
    fn write_ref_block(&mut self, bn: u32, refs: &[u32; RPB]) -> Result<()> {
        let mut blk = Block::zeroed();
        *blk.as_refs_mut() = *refs;
        self.write_data_block(bn, &blk)
    }

    /// Clears the reference entries at positions `start..` of the index
    /// block `bn`, freeing the referenced data blocks.
    ///
    /// Returns `true` when the block holds no reference afterwards, in which
    /// case the caller is expected to free the block itself; otherwise the
    /// modified block is written back.
    fn release_ref_block(&mut self, bn: u32, start: usize) -> Result<bool> {
        let mut refs = self.read_ref_block(bn)?;
        let mut modified = false;
        for i in start..RPB {
            let r = refs[i];
            if r != NULL_BLOCK {
                refs[i] = NULL_BLOCK;
                modified = true;
                self.free_data_block(r)?;
            }
        }
        let empty = refs.iter().all(|&r| r == NULL_BLOCK);
        if !empty && modified {
            self.write_ref_block(bn, &refs)?;
        }
        Ok(empty)
    }
}
