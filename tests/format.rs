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

//! Formatting tests: the written image must parse back to the parameters
//! used to format, and the initial structures must be consistent.

mod common;

use common::{format_volume, read_superblock};
use sofs21::inode::INODE_TYPE_DIRECTORY;
use sofs21::mksofs::{format, FormatOpts};
use sofs21::rawdisk::{Block, RawDisk};
use sofs21::superblock::{MAGIC, REF_CACHE_SIZE, VERSION};
use sofs21::{Sofs, N_DIRECT, NULL_BLOCK};
use tempfile::NamedTempFile;

#[test]
fn partition_of_a_256_block_volume() {
    let (_file, report) = format_volume(256, 0);
    assert_eq!(report.ntotal, 256);
    assert_eq!(report.itotal, 16);
    assert_eq!(report.itsize, 1);
    assert_eq!(report.rbm_size, 1);
    assert_eq!(report.dbtotal, 253);
    assert_eq!(report.dbp_start, 3);
}

#[test]
fn superblock_reparses_after_format() {
    let (file, report) = format_volume(256, 0);
    let sb = read_superblock(file.path());
    assert_eq!(sb.magic, MAGIC);
    assert_eq!(sb.version, VERSION);
    assert_eq!(sb.name(), "sofs21");
    assert_eq!(sb.ntotal, 256);
    assert_eq!(sb.itotal, report.itotal);
    assert_eq!(sb.ifree, report.itotal - 1);
    assert_eq!(sb.iidx, 1);
    assert_eq!(sb.iqcount, 0);
    assert_eq!(sb.dbtotal, report.dbtotal);
    assert_eq!(sb.dbp_start, report.dbp_start);
    assert_eq!(sb.dbfree, report.dbtotal - 1);
    assert_eq!(sb.rbm_start, 1 + report.itsize as u32);
    assert_eq!(sb.rbm_size, report.rbm_size);
    assert_eq!(sb.rbm_idx, 0);
    assert_eq!(sb.retrieval_cache.idx, REF_CACHE_SIZE as u32);
    assert_eq!(sb.insertion_cache.idx, 0);
    // inode 0 is allocated, every other inode is free
    assert!(!sb.ibitmap_test(0));
    for n in 1..report.itotal {
        assert!(sb.ibitmap_test(n));
    }
    assert!(!sb.ibitmap_test(report.itotal));
}

#[test]
fn root_directory_after_format() {
    let (file, _) = format_volume(256, 0);
    let mut fs = Sofs::open(file.path()).unwrap();
    let h = fs.open_inode(0).unwrap();
    {
        let root = fs.inode(h).unwrap();
        assert_eq!(root.mode, INODE_TYPE_DIRECTORY | 0o755);
        assert_eq!(root.lnkcnt, 2);
        assert_eq!(root.size, 1024);
        assert_eq!(root.d[0], 0);
        for i in 1..N_DIRECT {
            assert_eq!(root.d[i], NULL_BLOCK);
        }
        assert_eq!(root.i1, NULL_BLOCK);
        assert_eq!(root.i2, NULL_BLOCK);
    }
    assert_eq!(fs.get_direntry(h, ".").unwrap(), Some(0));
    assert_eq!(fs.get_direntry(h, "..").unwrap(), Some(0));
    assert!(fs.check_dir_empty(h).unwrap());
    fs.close_inode(h).unwrap();
    fs.close().unwrap();
}

#[test]
fn initial_bitmap_bits() {
    let (file, report) = format_volume(256, 0);
    let mut disk = RawDisk::open(file.path()).unwrap();
    let mut blk = Block::zeroed();
    let rbm_start = report.dbp_start - report.rbm_size;
    disk.read_block(rbm_start, &mut blk).unwrap();
    let words = blk.as_refs();
    // data block 0 holds the root directory; blocks 1..253 are free
    assert_eq!(words[0], !1u32);
    for w in 1..7 {
        assert_eq!(words[w], !0u32);
    }
    assert_eq!(words[7], (1 << (253 - 7 * 32)) - 1);
    for w in 8..words.len() {
        assert_eq!(words[w], 0);
    }
}

#[test]
fn volume_name_and_inode_request() {
    let file = NamedTempFile::new().unwrap();
    let mut disk = RawDisk::create(file.path(), 512).unwrap();
    let opts = FormatOpts {
        name: String::from("scratch"),
        itotal: 40,
        ..Default::default()
    };
    let report = format(&mut disk, &opts).unwrap();
    // 40 inodes round up to 48, three table blocks
    assert_eq!(report.itotal, 48);
    assert_eq!(report.itsize, 3);
    drop(disk);
    let sb = read_superblock(file.path());
    assert_eq!(sb.name(), "scratch");
    assert_eq!(sb.itotal, 48);
}

#[test]
fn too_small_a_device_is_rejected() {
    let file = NamedTempFile::new().unwrap();
    let mut disk = RawDisk::create(file.path(), 3).unwrap();
    assert!(format(&mut disk, &FormatOpts::default()).is_err());
}

#[test]
fn opening_an_unformatted_device_fails() {
    let file = NamedTempFile::new().unwrap();
    RawDisk::create(file.path(), 64).unwrap();
    let mut fs = Sofs::open(file.path()).unwrap();
    assert!(fs.superblock().is_err());
}
