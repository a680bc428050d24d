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

//! Management of directory entries.
//!
//! A directory's content is a flat array of slots spread over its data
//! blocks; its size is always a multiple of the block size. A logical entry
//! occupies one slot, or two contiguous slots when its name does not fit in
//! one (the pair may straddle a block boundary). Empty slots can appear
//! between occupied ones; insertion uses the first hole big enough.

use crate::daal::{InodeHandle, Sofs};
use crate::direntry::{slots_for, DirectorySlot, SLOT_NAME_LEN};
use crate::error::{Error, Result};
use crate::rawdisk::Block;
use crate::{BLOCK_SIZE, DPB, FILENAME_MAX, NULL_INODE};
use log::trace;

/// A directory's content, loaded in memory for manipulation.
struct DirContent {
    /// The directory's data blocks, in order.
    blocks: Vec<Block>,
    /// Dirty flag of each block.
    dirty: Vec<bool>,
}

/// A logical directory entry located during a scan.
#[derive(Clone, Copy)]
struct DirEntry {
    /// Index of the entry's first slot.
    slot: usize,
    /// Number of slots the entry occupies (1 or 2).
    nslots: usize,
    /// The referenced inode number.
    inode: u16,
    /// The entry's name bytes.
    name: [u8; FILENAME_MAX],
    /// The entry's name length.
    name_len: usize,
}

impl DirEntry {
    fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }
}

impl DirContent {
    fn nslots(&self) -> usize {
        self.blocks.len() * DPB
    }

    fn slot(&self, s: usize) -> &DirectorySlot {
        &self.blocks[s / DPB].as_slots()[s % DPB]
    }

    fn slot_mut(&mut self, s: usize) -> &mut DirectorySlot {
        self.dirty[s / DPB] = true;
        &mut self.blocks[s / DPB].as_slots_mut()[s % DPB]
    }

    /// Returns the first logical entry whose first slot is at position `s`
    /// or after, pasting two-slot pairs together.
    fn next_entry(&self, mut s: usize) -> Option<DirEntry> {
        let total = self.nslots();
        while s < total {
            let slot = self.slot(s);
            if slot.is_empty() {
                s += 1;
                continue;
            }
            if slot.inode == NULL_INODE {
                // first slot of a pair: the full prefix plus the suffix in
                // the next slot, which holds the real inode number
                if s + 1 >= total {
                    return None;
                }
                let second = self.slot(s + 1);
                let suffix = second.name_bytes();
                let mut name = [0; FILENAME_MAX];
                name[..SLOT_NAME_LEN].copy_from_slice(&slot.name);
                name[SLOT_NAME_LEN..SLOT_NAME_LEN + suffix.len()].copy_from_slice(suffix);
                return Some(DirEntry {
                    slot: s,
                    nslots: 2,
                    inode: second.inode,
                    name,
                    name_len: SLOT_NAME_LEN + suffix.len(),
                });
            }
            let bytes = slot.name_bytes();
            let mut name = [0; FILENAME_MAX];
            name[..bytes.len()].copy_from_slice(bytes);
            return Some(DirEntry {
                slot: s,
                nslots: 1,
                inode: slot.inode,
                name,
                name_len: bytes.len(),
            });
        }
        None
    }

    /// Returns the entry with the given name, if present.
    fn find(&self, name: &[u8]) -> Option<DirEntry> {
        let mut s = 0;
        while let Some(e) = self.next_entry(s) {
            if e.name() == name {
                return Some(e);
            }
            s = e.slot + e.nslots;
        }
        None
    }

    /// Returns the first run of `need` consecutive empty slots, if any.
    fn find_hole(&self, need: usize) -> Option<usize> {
        let mut run = 0;
        for s in 0..self.nslots() {
            if self.slot(s).is_empty() {
                run += 1;
                if run == need {
                    return Some(s + 1 - need);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// Writes the entry `name` → `inode` at slot position `s`, using one or
    /// two slots depending on the name length.
    fn write_entry(&mut self, s: usize, name: &[u8], inode: u16) {
        if name.len() <= SLOT_NAME_LEN {
            let slot = self.slot_mut(s);
            slot.set_name(name);
            slot.inode = inode;
        } else {
            let first = self.slot_mut(s);
            first.set_name(&name[..SLOT_NAME_LEN]);
            first.inode = NULL_INODE;
            let second = self.slot_mut(s + 1);
            second.set_name(&name[SLOT_NAME_LEN..]);
            second.inode = inode;
        }
    }

    /// Clears the `nslots` slots starting at position `s`.
    fn clear_entry(&mut self, s: usize, nslots: usize) {
        for k in 0..nslots {
            self.slot_mut(s + k).clear();
        }
    }
}

/// Checks that `name` is a valid entry name and returns its bytes.
fn validate_name(name: &str) -> Result<&[u8]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > FILENAME_MAX || bytes.contains(&b'/') || bytes.contains(&0)
    {
        return Err(Error::Inval("invalid entry name"));
    }
    Ok(bytes)
}

impl Sofs {
    /// Returns the inode number associated to `name` in the directory open
    /// as `pih`, or `None` when no such entry exists.
    pub fn get_direntry(&mut self, pih: InodeHandle, name: &str) -> Result<Option<u16>> {
        trace!("get_direntry({pih:?}, {name})");
        let name = validate_name(name)?;
        let dir = self.load_dir(pih)?;
        Ok(dir.find(name).map(|e| e.inode))
    }

    /// Adds the entry `name` → `cin` to the directory open as `pih`.
    ///
    /// The entry goes into the first hole big enough to hold it; when there
    /// is none, the directory is extended by one block. The child's link
    /// count is not touched.
    pub fn add_direntry(&mut self, pih: InodeHandle, name: &str, cin: u16) -> Result<()> {
        trace!("add_direntry({pih:?}, {name}, {cin})");
        let name = validate_name(name)?;
        let need = slots_for(name);
        let mut dir = self.load_dir(pih)?;
        if dir.find(name).is_some() {
            return Err(Error::Exists);
        }
        match dir.find_hole(need) {
            Some(s) => {
                dir.write_entry(s, name, cin);
                self.store_dir(pih, &dir)?;
            }
            None => self.append_dir_block(pih, name, cin)?,
        }
        Ok(())
    }

    /// Deletes the entry `name` from the directory open as `pih` and
    /// returns the inode number it referenced.
    ///
    /// The child's link count is not touched.
    pub fn delete_direntry(&mut self, pih: InodeHandle, name: &str) -> Result<u16> {
        trace!("delete_direntry({pih:?}, {name})");
        let name = validate_name(name)?;
        let mut dir = self.load_dir(pih)?;
        let e = dir.find(name).ok_or(Error::NotFound)?;
        dir.clear_entry(e.slot, e.nslots);
        self.store_dir(pih, &dir)?;
        Ok(e.inode)
    }

    /// Renames the entry `name` to `new_name`, preserving its inode number.
    ///
    /// The entry is rewritten in place when the new name needs at most as
    /// many slots as the old one, or when the slot following it is free;
    /// otherwise it moves to the first hole big enough, or to a fresh block.
    pub fn rename_direntry(&mut self, pih: InodeHandle, name: &str, new_name: &str) -> Result<()> {
        trace!("rename_direntry({pih:?}, {name}, {new_name})");
        let name = validate_name(name)?;
        let new_name = validate_name(new_name)?;
        let mut dir = self.load_dir(pih)?;
        let old = dir.find(name).ok_or(Error::NotFound)?;
        if let Some(e) = dir.find(new_name) {
            if e.slot != old.slot {
                return Err(Error::Exists);
            }
        }
        let n = slots_for(new_name);
        if n <= old.nslots {
            dir.write_entry(old.slot, new_name, old.inode);
            if n < old.nslots {
                dir.slot_mut(old.slot + 1).clear();
            }
        } else {
            // the entry grows from one slot to two
            let next = old.slot + 1;
            if next < dir.nslots() && dir.slot(next).is_empty() {
                dir.write_entry(old.slot, new_name, old.inode);
            } else if let Some(s) = dir.find_hole(n) {
                dir.write_entry(s, new_name, old.inode);
                dir.clear_entry(old.slot, old.nslots);
            } else {
                self.append_dir_block(pih, new_name, old.inode)?;
                dir.clear_entry(old.slot, old.nslots);
            }
        }
        self.store_dir(pih, &dir)?;
        Ok(())
    }

    /// Tells whether the directory open as `pih` only holds the `.` and
    /// `..` entries.
    pub fn check_dir_empty(&mut self, pih: InodeHandle) -> Result<bool> {
        trace!("check_dir_empty({pih:?})");
        let dir = self.load_dir(pih)?;
        let mut s = 0;
        while let Some(e) = dir.next_entry(s) {
            if e.name() != b"." && e.name() != b".." {
                return Ok(false);
            }
            s = e.slot + e.nslots;
        }
        Ok(true)
    }

    /// Resolves an absolute path to an inode number.
    ///
    /// Every component but the rightmost must be a directory on which the
    /// calling process has traverse permission. The rightmost component may
    /// be missing, in which case `None` is returned.
    pub fn traverse_path(&mut self, path: &str) -> Result<Option<u16>> {
        trace!("traverse_path({path})");
        if !path.starts_with('/') {
            return Err(Error::Inval("path must be absolute"));
        }
        let comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let mut cur = 0u16;
        for (i, &comp) in comps.iter().enumerate() {
            let last = i == comps.len() - 1;
            let h = self.open_inode(cur)?;
            let step = (|| {
                if !last {
                    if !self.inode(h)?.is_dir() {
                        return Err(Error::NotDir);
                    }
                    if !self.check_inode_access(h, libc::X_OK)? {
                        return Err(Error::Access);
                    }
                }
                self.get_direntry(h, comp)
            })();
            self.close_inode(h)?;
            let next = step?;
            if last {
                return Ok(next);
            }
            match next {
                Some(n) => cur = n,
                None => return Err(Error::NotFound),
            }
        }
        // the path has no component: it designates the root directory
        Ok(Some(0))
    }

    /// Loads the content of the directory open as `pih`.
    fn load_dir(&mut self, pih: InodeHandle) -> Result<DirContent> {
        let inode = self.inode(pih)?;
        if !inode.is_dir() {
            return Err(Error::NotDir);
        }
        let nb = inode.size / BLOCK_SIZE as u32;
        let mut blocks = Vec::with_capacity(nb as usize);
        for i in 0..nb {
            let mut blk = Block::zeroed();
            self.read_inode_block(pih, i, &mut blk)?;
            blocks.push(blk);
        }
        Ok(DirContent {
            dirty: vec![false; blocks.len()],
            blocks,
        })
    }

    /// Writes the modified blocks of `dir` back to the directory.
    fn store_dir(&mut self, pih: InodeHandle, dir: &DirContent) -> Result<()> {
        for (i, blk) in dir.blocks.iter().enumerate() {
            if dir.dirty[i] {
                self.write_inode_block(pih, i as u32, blk)?;
            }
        }
        Ok(())
    }

    /// Extends the directory with a fresh block holding the entry `name` →
    /// `inode` at its head, the remaining slots empty.
    fn append_dir_block(&mut self, pih: InodeHandle, name: &[u8], inode: u16) -> Result<()> {
        let nb = self.inode(pih)?.size / BLOCK_SIZE as u32;
        self.alloc_inode_block(pih, nb)?;
        let mut blk = Block::zeroed();
        for slot in blk.as_slots_mut().iter_mut() {
            slot.clear();
        }
        let mut tail = DirContent {
            blocks: vec![blk],
            dirty: vec![true],
        };
        tail.write_entry(0, name, inode);
        self.write_inode_block(pih, nb, &tail.blocks[0])?;
        let ino = self.inode_mut(pih)?;
        ino.size += BLOCK_SIZE as u32;
        self.save_inode(pih)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn empty_dir(nblocks: usize) -> DirContent {
        let mut blocks = Vec::new();
        for _ in 0..nblocks {
            let mut blk = Block::zeroed();
            for slot in blk.as_slots_mut().iter_mut() {
                slot.clear();
            }
            blocks.push(blk);
        }
        DirContent {
            dirty: vec![false; nblocks],
            blocks,
        }
    }

    #[test]
    fn one_and_two_slot_entries() {
        let mut dir = empty_dir(1);
        let short = [b'a'; SLOT_NAME_LEN];
        let long = [b'b'; SLOT_NAME_LEN + 1];
        dir.write_entry(0, &short, 7);
        dir.write_entry(1, &long, 9);
        let e = dir.find(&short).unwrap();
        assert_eq!((e.slot, e.nslots, e.inode), (0, 1, 7));
        let e = dir.find(&long).unwrap();
        assert_eq!((e.slot, e.nslots, e.inode), (1, 2, 9));
        // the prefix slot alone must not match
        assert!(dir.find(&long[..SLOT_NAME_LEN]).is_none());
    }

    #[test]
    fn hole_lookup_spans_entries() {
        let mut dir = empty_dir(1);
        dir.write_entry(0, b"a", 1);
        dir.write_entry(2, b"b", 2);
        // slot 1 is a one-slot hole; the first two-slot hole starts at 3
        assert_eq!(dir.find_hole(1), Some(1));
        assert_eq!(dir.find_hole(2), Some(3));
        dir.clear_entry(2, 1);
        assert_eq!(dir.find_hole(2), Some(1));
    }

    #[test]
    fn pair_straddles_blocks() {
        let mut dir = empty_dir(2);
        let long = [b'x'; FILENAME_MAX];
        dir.write_entry(DPB - 1, &long, 4);
        let e = dir.find(&long).unwrap();
        assert_eq!((e.slot, e.nslots, e.inode), (DPB - 1, 2, 4));
        assert!(dir.dirty[0] && dir.dirty[1]);
    }
}
