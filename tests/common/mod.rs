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

//! Helpers shared by the integration tests: every test runs against a volume
//! formatted on a temporary file.

#![allow(dead_code)]

use sofs21::mksofs::{format, FormatOpts, FormatReport};
use sofs21::rawdisk::{Block, RawDisk};
use sofs21::superblock::{Superblock, REF_CACHE_SIZE};
use sofs21::Sofs;
use std::path::Path;
use tempfile::NamedTempFile;

/// Creates a device file of `ntotal` blocks and formats it.
pub fn format_volume(ntotal: u32, itotal: u16) -> (NamedTempFile, FormatReport) {
    let file = NamedTempFile::new().unwrap();
    let mut disk = RawDisk::create(file.path(), ntotal).unwrap();
    let opts = FormatOpts {
        itotal,
        ..Default::default()
    };
    let report = format(&mut disk, &opts).unwrap();
    (file, report)
}

/// Formats a fresh volume and opens it.
pub fn open_volume(ntotal: u32, itotal: u16) -> (NamedTempFile, Sofs) {
    let (file, _) = format_volume(ntotal, itotal);
    let fs = Sofs::open(file.path()).unwrap();
    (file, fs)
}

/// Reads the on-disk superblock of the volume at `path`.
pub fn read_superblock(path: &Path) -> Superblock {
    let mut disk = RawDisk::open(path).unwrap();
    let mut blk = Block::zeroed();
    disk.read_block(0, &mut blk).unwrap();
    Superblock::from_block(&blk)
}

/// Checks the free data block accounting invariant on the on-disk image:
/// `dbfree` must equal the number of set bitmap bits plus the number of
/// references held by the two caches.
pub fn check_accounting(path: &Path) {
    let sb = read_superblock(path);
    let mut disk = RawDisk::open(path).unwrap();
    let mut popcount: u32 = 0;
    for b in 0..sb.rbm_size {
        let mut blk = Block::zeroed();
        disk.read_block(sb.rbm_start + b, &mut blk).unwrap();
        popcount += blk.as_refs().iter().map(|w| w.count_ones()).sum::<u32>();
    }
    let cached = REF_CACHE_SIZE as u32 - sb.retrieval_cache.idx + sb.insertion_cache.idx;
    assert_eq!(sb.dbfree, popcount + cached, "free block accounting broken");
}
