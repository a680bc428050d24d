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

//! The formatting functions.
//!
//! Formatting computes the structural partition of the device (inode table,
//! reference bitmap table, data block pool) and writes the initial image:
//! superblock, inode table with the root directory at inode 0, bitmap, and
//! the root directory content. All writes go through the raw device; the
//! higher layers are not involved at format time.

use crate::error::{Error, Result};
use crate::inode::{Inode, INODE_TYPE_DIRECTORY};
use crate::rawdisk::{Block, RawDisk};
use crate::superblock::{Superblock, MAGIC, VERSION};
use crate::util::{ceil_division, current_gid, current_uid, get_timestamp};
use crate::{BLOCK_SIZE, IPB, MAX_INODES};
use log::trace;

/// The number of bitmap bits held by one block.
const BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;

/// Formatting options.
pub struct FormatOpts {
    /// The volume name.
    pub name: String,
    /// The requested number of inodes; 0 requests the default.
    pub itotal: u16,
    /// Whether to fill the free data blocks with zeros.
    pub zero: bool,
    /// Whether to set timestamps to the current date; otherwise they are
    /// put at zero, which makes images reproducible.
    pub date: bool,
}

impl Default for FormatOpts {
    fn default() -> Self {
        Self {
            name: String::from("sofs21"),
            itotal: 0,
            zero: false,
            date: true,
        }
    }
}

/// The partition resulting from a format.
pub struct FormatReport {
    /// Total number of blocks on the device.
    pub ntotal: u32,
    /// Number of inodes.
    pub itotal: u16,
    /// Number of blocks of the inode table.
    pub itsize: u16,
    /// Number of blocks of the reference bitmap table.
    pub rbm_size: u32,
    /// Number of data blocks.
    pub dbtotal: u32,
    /// Physical number of the first data block.
    pub dbp_start: u32,
}

/// Computes the structural partition of a device with `ntotal` blocks and a
/// requested inode count, returning the size of the inode table in blocks
/// and the number of data blocks.
///
/// The inode count is rounded up to a multiple of [`IPB`], bounded below by
/// [`IPB`] and above by [`MAX_INODES`] and by one inode per 8 blocks of the
/// device. When 0 is requested, one inode per 20 blocks is used. Surplus
/// whole blocks of the bitmap table are handed over to the inode table.
pub fn compute_disk_structure(ntotal: u32, itotal: u16) -> Result<(u16, u32)> {
    let mut itotal = if itotal == 0 {
        ntotal / 20
    } else {
        itotal as u32
    };
    itotal = itotal.max(IPB as u32);
    let cap = (MAX_INODES as u32).min(ceil_division(ntotal, 8));
    itotal = itotal.min(cap).max(IPB as u32);
    let mut itsize = ceil_division(itotal, IPB as u32);
    itotal = itsize * IPB as u32;
    if ntotal < 1 + itsize + 2 {
        return Err(Error::Inval("device too small"));
    }
    let rest = ntotal - 1 - itsize;
    // first over-estimate the bitmap (as if the whole rest were data), then
    // hand surplus whole bitmap blocks to the inode table
    let mut rbm_size = ceil_division(rest, BITS_PER_BLOCK);
    let mut dbtotal = rest - rbm_size;
    while rbm_size > ceil_division(dbtotal, BITS_PER_BLOCK) && itotal + (IPB as u32) <= cap {
        rbm_size -= 1;
        itsize += 1;
        itotal += IPB as u32;
        dbtotal = ntotal - 1 - itsize - rbm_size;
    }
    if dbtotal == 0 || rbm_size == 0 {
        return Err(Error::Inval("device too small"));
    }
    Ok((itsize as u16, dbtotal))
}

/// Fills in and writes the superblock, returning the record.
///
/// The magic number is left invalid; the caller stamps the real value once
/// every other region of the image is written.
pub fn fill_in_superblock(
    disk: &mut RawDisk,
    name: &str,
    itsize: u16,
    dbtotal: u32,
) -> Result<Superblock> {
    trace!("fill_in_superblock({name}, {itsize}, {dbtotal})");
    let ntotal = disk.block_count();
    let mut sb = Superblock::zeroed();
    sb.magic = !0;
    sb.version = VERSION;
    sb.mntstat = 0;
    sb.set_name(name);
    sb.ntotal = ntotal;
    let itotal = itsize as u32 * IPB as u32;
    sb.itotal = itotal as u16;
    sb.ifree = (itotal - 1) as u16;
    sb.iidx = 1;
    // every inode is free except inode 0, the root directory
    for n in 1..itotal {
        sb.ibitmap_set(n as u16);
    }
    sb.clear_iqueue();
    sb.dbtotal = dbtotal;
    sb.dbp_start = ntotal - dbtotal;
    sb.dbfree = dbtotal - 1;
    sb.rbm_start = 1 + itsize as u32;
    sb.rbm_size = sb.dbp_start - sb.rbm_start;
    sb.rbm_idx = 0;
    sb.clear_caches();
    disk.write_block(0, &sb.to_block())?;
    Ok(sb)
}

/// Fills in and writes the blocks of the inode table.
///
/// Inode 0 is the root directory, its content stored in data block 0; every
/// other inode is in the clean state.
pub fn fill_in_inode_table(disk: &mut RawDisk, itsize: u16, date: bool) -> Result<()> {
    trace!("fill_in_inode_table({itsize}, {date})");
    let now = if date { get_timestamp() } else { 0 };
    for b in 0..itsize {
        let mut blk = Block::zeroed();
        let inodes = blk.as_inodes_mut();
        for inode in inodes.iter_mut() {
            *inode = Inode::clean();
        }
        if b == 0 {
            let mut root = Inode::clean();
            root.mode = INODE_TYPE_DIRECTORY | 0o755;
            root.lnkcnt = 2;
            root.owner = current_uid();
            root.group = current_gid();
            root.size = BLOCK_SIZE as u32;
            root.atime = now;
            root.mtime = now;
            root.ctime = now;
            root.d[0] = 0;
            inodes[0] = root;
        }
        disk.write_block(1 + b as u32, &blk)?;
    }
    Ok(())
}

/// Fills in and writes the blocks of the reference bitmap table.
///
/// Every data block is marked free except block 0, used by the root
/// directory; bits past the pool are left at zero.
pub fn fill_in_bitmap_table(disk: &mut RawDisk, itsize: u16, dbtotal: u32) -> Result<()> {
    trace!("fill_in_bitmap_table({itsize}, {dbtotal})");
    let ntotal = disk.block_count();
    let rbm_start = 1 + itsize as u32;
    let rbm_size = ntotal - dbtotal - rbm_start;
    for b in 0..rbm_size {
        let mut blk = Block::zeroed();
        let words = blk.as_refs_mut();
        for (w, word) in words.iter_mut().enumerate() {
            let lo = b * BITS_PER_BLOCK + w as u32 * 32;
            if lo >= dbtotal {
                break;
            }
            let used = (dbtotal - lo).min(32);
            *word = if used == 32 { !0 } else { (1 << used) - 1 };
        }
        if b == 0 {
            words[0] &= !1;
        }
        disk.write_block(rbm_start + b, &blk)?;
    }
    Ok(())
}

/// Fills in and writes the root directory content: the `.` and `..`
/// entries, both pointing to inode 0, the remaining slots empty.
pub fn fill_in_root_dir(disk: &mut RawDisk, dbtotal: u32) -> Result<()> {
    trace!("fill_in_root_dir({dbtotal})");
    let root_bn = disk.block_count() - dbtotal;
    let mut blk = Block::zeroed();
    let slots = blk.as_slots_mut();
    for slot in slots.iter_mut() {
        slot.clear();
    }
    slots[0].set_name(b".");
    slots[0].inode = 0;
    slots[1].set_name(b"..");
    slots[1].inode = 0;
    disk.write_block(root_bn, &blk)?;
    Ok(())
}

/// Fills every free data block with zeros.
pub fn zero_free_data_blocks(disk: &mut RawDisk, dbtotal: u32) -> Result<()> {
    trace!("zero_free_data_blocks({dbtotal})");
    let ntotal = disk.block_count();
    let dbp_start = ntotal - dbtotal;
    let blk = Block::zeroed();
    for bn in dbp_start + 1..ntotal {
        disk.write_block(bn, &blk)?;
    }
    Ok(())
}

/// Formats the device: computes the partition and writes the whole initial
/// image. The magic number is stamped last, so that an interrupted format
/// does not leave a volume that passes for a valid one.
pub fn format(disk: &mut RawDisk, opts: &FormatOpts) -> Result<FormatReport> {
    trace!("format({}, {})", opts.name, opts.itotal);
    let ntotal = disk.block_count();
    let (itsize, dbtotal) = compute_disk_structure(ntotal, opts.itotal)?;
    let mut sb = fill_in_superblock(disk, &opts.name, itsize, dbtotal)?;
    fill_in_inode_table(disk, itsize, opts.date)?;
    fill_in_bitmap_table(disk, itsize, dbtotal)?;
    fill_in_root_dir(disk, dbtotal)?;
    if opts.zero {
        zero_free_data_blocks(disk, dbtotal)?;
    }
    sb.magic = MAGIC;
    disk.write_block(0, &sb.to_block())?;
    Ok(FormatReport {
        ntotal,
        itotal: sb.itotal,
        itsize,
        rbm_size: sb.rbm_size,
        dbtotal,
        dbp_start: sb.dbp_start,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partition_defaults() {
        // 256 blocks, default inode count: 256/20 rounds up to one table
        // block of IPB inodes
        let (itsize, dbtotal) = compute_disk_structure(256, 0).unwrap();
        assert_eq!(itsize, 1);
        assert_eq!(dbtotal, 253);
    }

    #[test]
    fn partition_caps() {
        // the request is capped by one inode per 8 device blocks
        let (itsize, dbtotal) = compute_disk_structure(256, 100).unwrap();
        assert_eq!(itsize, 2);
        assert_eq!(dbtotal, 252);
        // the lower bound of one table block wins over the cap
        let (itsize, _) = compute_disk_structure(100, 0).unwrap();
        assert_eq!(itsize, 1);
    }

    #[test]
    fn partition_absorbs_surplus_bitmap_block() {
        // the over-estimated bitmap needs two blocks but the data pool fits
        // in one; the surplus block goes to the inode table
        let (itsize, dbtotal) = compute_disk_structure(8196, 16).unwrap();
        assert_eq!(itsize, 2);
        assert_eq!(dbtotal, 8192);
    }

    #[test]
    fn partition_too_small() {
        assert!(compute_disk_structure(3, 0).is_err());
    }
}
