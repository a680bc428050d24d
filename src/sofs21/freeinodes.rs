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

//! Management of free inodes.
//!
//! Free inodes are recorded in the superblock's inode bitmap (a bit at one
//! means free). Removed inodes are not freed immediately: they first go
//! through a bounded circular FIFO of deleted inodes, keeping their content
//! on disk until the slot is reclaimed.

use crate::daal::Sofs;
use crate::error::{Error, Result};
use crate::inode::INODE_TYPE_MASK;
use crate::superblock::DELETED_QUEUE_SIZE;
use crate::NULL_INODE;
use log::trace;

impl Sofs {
    /// Allocates a free inode from the bitmap.
    ///
    /// The bitmap is searched circularly starting at the superblock's `iidx`
    /// cursor; the first bit at one is cleared and its position returned.
    /// Returns `None` when the bitmap holds no free inode, even if the
    /// deleted queue is not empty.
    pub fn alloc_inode(&mut self) -> Result<Option<u16>> {
        trace!("alloc_inode()");
        let sb = self.superblock_mut()?;
        let itotal = sb.itotal as u32;
        if itotal == 0 {
            return Ok(None);
        }
        let mut found = None;
        let mut pos = sb.iidx as u32 % itotal;
        for _ in 0..itotal {
            if sb.ibitmap_test(pos as u16) {
                sb.ibitmap_clear(pos as u16);
                sb.iidx = ((pos + 1) % itotal) as u16;
                sb.ifree -= 1;
                found = Some(pos as u16);
                break;
            }
            pos = (pos + 1) % itotal;
        }
        if found.is_some() {
            self.save_superblock()?;
        }
        Ok(found)
    }

    /// Inserts the inode `n` into the queue of deleted inodes, complementing
    /// the type bits of its `mode` field so that it no longer parses as a
    /// valid file.
    ///
    /// Returns `false` without doing anything when the queue is full.
    pub fn hide_inode(&mut self, n: u16) -> Result<bool> {
        trace!("hide_inode({n})");
        let sb = self.superblock()?;
        if n >= sb.itotal {
            return Err(Error::Inval("inode number out of range"));
        }
        if sb.iqcount as usize == DELETED_QUEUE_SIZE {
            return Ok(false);
        }
        let h = self.open_inode(n)?;
        let res = (|| {
            self.inode_mut(h)?.mode ^= INODE_TYPE_MASK;
            self.save_inode(h)
        })();
        self.close_inode(h)?;
        res?;
        let sb = self.superblock_mut()?;
        let tail = (sb.iqhead as usize + sb.iqcount as usize) % DELETED_QUEUE_SIZE;
        sb.iqueue[tail] = n;
        sb.iqcount += 1;
        self.save_superblock()?;
        Ok(true)
    }

    /// Removes and returns the oldest inode of the queue of deleted inodes,
    /// or `None` when the queue is empty.
    pub fn unqueue_hidden_inode(&mut self) -> Result<Option<u16>> {
        trace!("unqueue_hidden_inode()");
        let sb = self.superblock_mut()?;
        if sb.iqcount == 0 {
            return Ok(None);
        }
        let head = sb.iqhead as usize;
        let n = sb.iqueue[head];
        sb.iqueue[head] = NULL_INODE;
        sb.iqhead = ((head + 1) % DELETED_QUEUE_SIZE) as u16;
        sb.iqcount -= 1;
        self.save_superblock()?;
        Ok(Some(n))
    }

    /// Frees the inode `n`: the record is put in the clean state and the
    /// corresponding bitmap bit set.
    ///
    /// The inode's block references are not touched; they must already be
    /// null.
    pub fn free_inode(&mut self, n: u16) -> Result<()> {
        trace!("free_inode({n})");
        let sb = self.superblock()?;
        if n >= sb.itotal {
            return Err(Error::Inval("inode number out of range"));
        }
        let h = self.open_inode(n)?;
        let res = (|| {
            let inode = self.inode_mut(h)?;
            inode.mode = 0;
            inode.owner = 0;
            inode.group = 0;
            self.save_inode(h)
        })();
        self.close_inode(h)?;
        res?;
        let sb = self.superblock_mut()?;
        sb.ibitmap_set(n);
        sb.ifree += 1;
        self.save_superblock()?;
        Ok(())
    }
}
