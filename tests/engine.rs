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

//! End-to-end tests of the engine operations over formatted volumes.

mod common;

use common::{check_accounting, open_volume, read_superblock};
use sofs21::inode::FileType;
use sofs21::rawdisk::Block;
use sofs21::superblock::{DELETED_QUEUE_SIZE, REF_CACHE_SIZE};
use sofs21::{Error, Sofs, N_DIRECT, NULL_BLOCK, RPB};
use std::collections::HashSet;

#[test]
fn data_blocks_allocate_in_ascending_order() {
    let (_file, mut fs) = open_volume(256, 0);
    let initial = fs.superblock().unwrap().dbfree;
    // one more than the cache capacity, to cross a refill boundary
    let mut got = Vec::new();
    for _ in 0..REF_CACHE_SIZE + 1 {
        got.push(fs.alloc_data_block().unwrap());
    }
    // block 0 belongs to the root directory and is skipped
    let expected: Vec<u32> = (1..=REF_CACHE_SIZE as u32 + 1).collect();
    assert_eq!(got, expected);
    assert_eq!(
        fs.superblock().unwrap().dbfree,
        initial - (REF_CACHE_SIZE as u32 + 1)
    );
}

#[test]
fn freed_block_is_eventually_returned() {
    let (file, mut fs) = open_volume(256, 0);
    let a = fs.alloc_data_block().unwrap();
    fs.free_data_block(a).unwrap();
    let total = fs.superblock().unwrap().dbfree;
    let mut seen = HashSet::new();
    for _ in 0..total {
        let bn = fs.alloc_data_block().unwrap();
        assert!(seen.insert(bn), "block {bn} handed out twice");
    }
    assert!(seen.contains(&a));
    assert!(matches!(fs.alloc_data_block(), Err(Error::NoSpace)));
    assert_eq!(fs.superblock().unwrap().dbfree, 0);
    fs.close().unwrap();
    check_accounting(file.path());
}

#[test]
fn deplete_moves_references_back_to_the_bitmap() {
    let (file, mut fs) = open_volume(1024, 0);
    let initial = fs.superblock().unwrap().dbfree;
    let mut blocks = Vec::new();
    for _ in 0..REF_CACHE_SIZE + 10 {
        blocks.push(fs.alloc_data_block().unwrap());
    }
    // freeing one block more than the insertion cache holds forces a
    // transfer to the bitmap
    for bn in &blocks {
        fs.free_data_block(*bn).unwrap();
    }
    assert_eq!(fs.superblock().unwrap().dbfree, initial);
    // every freed block is allocatable again
    let mut seen = HashSet::new();
    for _ in 0..blocks.len() {
        seen.insert(fs.alloc_data_block().unwrap());
    }
    fs.close().unwrap();
    check_accounting(file.path());
}

#[test]
fn replenish_from_cache_when_bitmap_is_exhausted() {
    let (file, mut fs) = open_volume(256, 0);
    let total = fs.superblock().unwrap().dbfree;
    let mut blocks = Vec::new();
    for _ in 0..total {
        blocks.push(fs.alloc_data_block().unwrap());
    }
    assert_eq!(fs.superblock().unwrap().rbm_idx, NULL_BLOCK);
    // the only free references now live in the insertion cache
    fs.free_data_block(blocks[5]).unwrap();
    fs.free_data_block(blocks[9]).unwrap();
    assert_eq!(fs.alloc_data_block().unwrap(), blocks[5]);
    assert_eq!(fs.alloc_data_block().unwrap(), blocks[9]);
    assert!(matches!(fs.alloc_data_block(), Err(Error::NoSpace)));
    fs.close().unwrap();
    check_accounting(file.path());
}

#[test]
fn direntry_add_get_delete() {
    let (_file, mut fs) = open_volume(256, 0);
    let n = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let h = fs.open_inode(0).unwrap();
    fs.add_direntry(h, "f", n).unwrap();
    assert_eq!(fs.get_direntry(h, "f").unwrap(), Some(n));
    assert!(matches!(fs.add_direntry(h, "f", n), Err(Error::Exists)));
    assert!(!fs.check_dir_empty(h).unwrap());
    assert_eq!(fs.delete_direntry(h, "f").unwrap(), n);
    assert_eq!(fs.get_direntry(h, "f").unwrap(), None);
    assert!(matches!(fs.delete_direntry(h, "f"), Err(Error::NotFound)));
    assert!(fs.check_dir_empty(h).unwrap());
    fs.close_inode(h).unwrap();
}

#[test]
fn add_then_delete_restores_the_directory_image() {
    let (_file, mut fs) = open_volume(256, 0);
    let n = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let mut before = Block::zeroed();
    // the root directory content lives in data block 0
    fs.read_data_block(0, &mut before).unwrap();
    let h = fs.open_inode(0).unwrap();
    fs.add_direntry(h, "transient", n).unwrap();
    fs.delete_direntry(h, "transient").unwrap();
    fs.close_inode(h).unwrap();
    let mut after = Block::zeroed();
    fs.read_data_block(0, &mut after).unwrap();
    assert_eq!(before.bytes, after.bytes);
}

#[test]
fn entry_slot_encoding_at_the_name_length_boundary() {
    let (file, mut fs) = open_volume(256, 0);
    let exact = "a".repeat(30);
    let over = "b".repeat(31);
    let n1 = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let n2 = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let h = fs.open_inode(0).unwrap();
    fs.add_direntry(h, &exact, n1).unwrap();
    fs.add_direntry(h, &over, n2).unwrap();
    assert_eq!(fs.get_direntry(h, &exact).unwrap(), Some(n1));
    assert_eq!(fs.get_direntry(h, &over).unwrap(), Some(n2));
    // a 30-byte prefix of the long name must not match
    assert_eq!(fs.get_direntry(h, &over[..30]).unwrap(), None);
    fs.close_inode(h).unwrap();
    fs.close().unwrap();
    // verify the on-disk slot usage: `.` and `..` occupy slots 0 and 1, the
    // 30-byte name one slot, the 31-byte name two slots
    let sb = read_superblock(file.path());
    let mut disk = sofs21::RawDisk::open(file.path()).unwrap();
    let mut blk = Block::zeroed();
    disk.read_block(sb.dbp_start, &mut blk).unwrap();
    let slots = blk.as_slots();
    assert_eq!(slots[2].inode, n1);
    assert_eq!(slots[3].inode, sofs21::NULL_INODE);
    assert_eq!(slots[4].inode, n2);
}

#[test]
fn rename_policies() {
    let (_file, mut fs) = open_volume(256, 0);
    let n1 = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let n2 = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let h = fs.open_inode(0).unwrap();
    fs.add_direntry(h, "short", n1).unwrap();
    fs.add_direntry(h, "blocker", n2).unwrap();

    // growing with the next slot occupied relocates the entry
    let long = "c".repeat(35);
    fs.rename_direntry(h, "short", &long).unwrap();
    assert_eq!(fs.get_direntry(h, &long).unwrap(), Some(n1));
    assert_eq!(fs.get_direntry(h, "short").unwrap(), None);

    // shrinking rewrites in place and clears the trailing slot
    fs.rename_direntry(h, &long, "tiny").unwrap();
    assert_eq!(fs.get_direntry(h, "tiny").unwrap(), Some(n1));
    assert_eq!(fs.get_direntry(h, &long).unwrap(), None);

    // renaming to itself is a no-op
    fs.rename_direntry(h, "tiny", "tiny").unwrap();
    assert_eq!(fs.get_direntry(h, "tiny").unwrap(), Some(n1));

    // name collisions and missing entries are rejected
    assert!(matches!(
        fs.rename_direntry(h, "tiny", "blocker"),
        Err(Error::Exists)
    ));
    assert!(matches!(
        fs.rename_direntry(h, "absent", "x"),
        Err(Error::NotFound)
    ));

    // growing with a free slot right after extends the entry in place
    let grown = "d".repeat(31);
    fs.rename_direntry(h, "tiny", &grown).unwrap();
    assert_eq!(fs.get_direntry(h, &grown).unwrap(), Some(n1));
    assert_eq!(fs.get_direntry(h, "blocker").unwrap(), Some(n2));
    fs.close_inode(h).unwrap();
}

#[test]
fn a_two_slot_entry_may_straddle_a_block_boundary() {
    let (_file, mut fs) = open_volume(512, 0);
    let h = fs.open_inode(0).unwrap();
    let n = fs.new_inode(FileType::Regular, 0o644).unwrap();
    // fill slots 2..=30 of the first block
    for i in 0..29 {
        fs.add_direntry(h, &format!("e{i:02}"), n).unwrap();
    }
    // no room for two contiguous slots: the directory grows by one block
    let long1 = "x".repeat(31);
    fs.add_direntry(h, &long1, n).unwrap();
    assert_eq!(fs.inode(h).unwrap().size, 2048);
    // fill the remaining slot of the first block, then punch a hole
    // spanning the block boundary
    fs.add_direntry(h, "e29", n).unwrap();
    fs.delete_direntry(h, "e29").unwrap();
    fs.delete_direntry(h, &long1).unwrap();
    let long2 = "y".repeat(31);
    fs.add_direntry(h, &long2, n).unwrap();
    assert_eq!(fs.inode(h).unwrap().size, 2048);
    assert_eq!(fs.get_direntry(h, &long2).unwrap(), Some(n));
    assert_eq!(fs.delete_direntry(h, &long2).unwrap(), n);
    fs.close_inode(h).unwrap();
}

#[test]
fn inode_block_tree_grows_and_shrinks() {
    let (file, mut fs) = open_volume(2048, 0);
    let n = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let h = fs.open_inode(n).unwrap();
    let initial = fs.superblock().unwrap().dbfree;
    // enough blocks to reach the double-indirect tier
    let count = (N_DIRECT + RPB + 3) as u32;
    for ibn in 0..count {
        fs.alloc_inode_block(h, ibn).unwrap();
    }
    {
        let inode = fs.inode(h).unwrap();
        assert!(inode.d.iter().all(|&r| r != NULL_BLOCK));
        assert_ne!(inode.i1, NULL_BLOCK);
        assert_ne!(inode.i2, NULL_BLOCK);
    }
    assert_ne!(fs.get_inode_block(h, 0).unwrap(), NULL_BLOCK);
    assert_ne!(fs.get_inode_block(h, count - 1).unwrap(), NULL_BLOCK);
    assert_eq!(fs.get_inode_block(h, count).unwrap(), NULL_BLOCK);
    assert!(matches!(fs.alloc_inode_block(h, 0), Err(Error::Stale)));
    // the tree costs one single-indirect block, the double-indirect block
    // and one second-level block on top of the content itself
    let used = count + 3;
    assert_eq!(fs.superblock().unwrap().dbfree, initial - used);

    // freeing from the start of the double-indirect range releases that
    // subtree only
    fs.free_inode_blocks(h, (N_DIRECT + RPB) as u32).unwrap();
    {
        let inode = fs.inode(h).unwrap();
        assert_eq!(inode.i2, NULL_BLOCK);
        assert_ne!(inode.i1, NULL_BLOCK);
        assert_ne!(inode.d[0], NULL_BLOCK);
    }
    assert_ne!(fs.get_inode_block(h, N_DIRECT as u32).unwrap(), NULL_BLOCK);
    // 3 content blocks, the second-level block and the double-indirect one
    assert_eq!(fs.superblock().unwrap().dbfree, initial - used + 5);

    // freeing from 0 releases everything
    fs.free_inode_blocks(h, 0).unwrap();
    {
        let inode = fs.inode(h).unwrap();
        assert!(inode.d.iter().all(|&r| r == NULL_BLOCK));
        assert_eq!(inode.i1, NULL_BLOCK);
        assert_eq!(inode.i2, NULL_BLOCK);
    }
    assert_eq!(fs.superblock().unwrap().dbfree, initial);
    fs.close_inode(h).unwrap();
    fs.close().unwrap();
    check_accounting(file.path());
}

#[test]
fn freeing_inode_blocks_is_idempotent() {
    let (_file, mut fs) = open_volume(256, 0);
    let n = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let h = fs.open_inode(n).unwrap();
    fs.alloc_inode_block(h, 0).unwrap();
    fs.free_inode_blocks(h, 0).unwrap();
    let free = fs.superblock().unwrap().dbfree;
    fs.free_inode_blocks(h, 0).unwrap();
    assert_eq!(fs.superblock().unwrap().dbfree, free);
    fs.close_inode(h).unwrap();
}

#[test]
fn new_inode_falls_back_to_the_deleted_queue() {
    let (_file, mut fs) = open_volume(1024, 64);
    let mut inodes = Vec::new();
    for _ in 0..63 {
        inodes.push(fs.new_inode(FileType::Regular, 0o600).unwrap());
    }
    assert_eq!(fs.superblock().unwrap().ifree, 0);
    assert!(matches!(
        fs.new_inode(FileType::Regular, 0o600),
        Err(Error::NoSpace)
    ));
    // a removed inode is hidden, not freed; a new inode resurrects it
    fs.remove_inode(inodes[0]).unwrap();
    assert_eq!(fs.superblock().unwrap().iqcount, 1);
    assert_eq!(fs.superblock().unwrap().ifree, 0);
    let n = fs.new_inode(FileType::Regular, 0o600).unwrap();
    assert_eq!(n, inodes[0]);
    assert_eq!(fs.superblock().unwrap().iqcount, 0);
}

#[test]
fn full_deleted_queue_evicts_the_oldest_inode() {
    let (file, mut fs) = open_volume(1024, 64);
    let mut inodes = Vec::new();
    for _ in 0..63 {
        inodes.push(fs.new_inode(FileType::Regular, 0o600).unwrap());
    }
    // give the first inode a data block, to watch it come back
    let h = fs.open_inode(inodes[0]).unwrap();
    fs.alloc_inode_block(h, 0).unwrap();
    fs.close_inode(h).unwrap();
    let dbfree = fs.superblock().unwrap().dbfree;
    for i in 0..DELETED_QUEUE_SIZE + 1 {
        fs.remove_inode(inodes[i]).unwrap();
    }
    // the queue stayed full; the oldest entry was reclaimed for real and
    // its data block released
    let sb = fs.superblock().unwrap();
    assert_eq!(sb.iqcount as usize, DELETED_QUEUE_SIZE);
    assert_eq!(sb.ifree, 1);
    assert_eq!(sb.dbfree, dbfree + 1);
    // the reclaimed inode is allocatable again
    let n = fs.new_inode(FileType::Regular, 0o600).unwrap();
    assert_eq!(n, inodes[0]);
    fs.close().unwrap();
    check_accounting(file.path());
}

#[test]
fn hidden_inodes_keep_their_permissions() {
    let (_file, mut fs) = open_volume(256, 0);
    let n = fs.new_inode(FileType::Regular, 0o644).unwrap();
    assert!(fs.hide_inode(n).unwrap());
    let h = fs.open_inode(n).unwrap();
    {
        let inode = fs.inode(h).unwrap();
        assert_eq!(inode.file_type(), None);
        assert_eq!(inode.perm(), 0o644);
    }
    fs.close_inode(h).unwrap();
    assert_eq!(fs.unqueue_hidden_inode().unwrap(), Some(n));
    assert_eq!(fs.unqueue_hidden_inode().unwrap(), None);
    assert!(matches!(fs.hide_inode(9999), Err(Error::Inval(_))));
}

#[test]
fn open_inode_handles_are_shared_and_refcounted() {
    let (_file, mut fs) = open_volume(256, 0);
    let h1 = fs.open_inode(0).unwrap();
    let h2 = fs.open_inode(0).unwrap();
    assert_eq!(h1, h2);
    fs.close_inode(h1).unwrap();
    // still open through the second reference
    assert!(fs.inode(h2).is_ok());
    fs.close_inode(h2).unwrap();
    assert!(matches!(fs.inode(h2), Err(Error::Inval(_))));
}

#[test]
fn access_checks_follow_the_permission_bits() {
    let (_file, mut fs) = open_volume(256, 0);
    let n = fs.new_inode(FileType::Regular, 0o640).unwrap();
    let h = fs.open_inode(n).unwrap();
    assert!(fs.check_inode_access(h, libc::R_OK).unwrap());
    assert!(fs.check_inode_access(h, libc::W_OK).unwrap());
    assert!(!fs.check_inode_access(h, libc::X_OK).unwrap());
    assert!(!fs.check_inode_access(h, libc::R_OK | libc::X_OK).unwrap());
    fs.close_inode(h).unwrap();
    let n = fs.new_inode(FileType::Regular, 0o755).unwrap();
    let h = fs.open_inode(n).unwrap();
    assert!(fs.check_inode_access(h, libc::X_OK).unwrap());
    fs.close_inode(h).unwrap();
}

#[test]
fn path_traversal() {
    let (_file, mut fs) = open_volume(256, 0);
    let na = fs.new_inode(FileType::Directory, 0o755).unwrap();
    let nb = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let root = fs.open_inode(0).unwrap();
    fs.add_direntry(root, "a", na).unwrap();
    fs.close_inode(root).unwrap();
    let ha = fs.open_inode(na).unwrap();
    fs.add_direntry(ha, "b", nb).unwrap();
    fs.close_inode(ha).unwrap();

    assert_eq!(fs.traverse_path("/").unwrap(), Some(0));
    assert_eq!(fs.traverse_path("/a").unwrap(), Some(na));
    assert_eq!(fs.traverse_path("/a/b").unwrap(), Some(nb));
    // a missing final component is legal
    assert_eq!(fs.traverse_path("/a/zzz").unwrap(), None);
    // a missing intermediate component is not
    assert!(matches!(
        fs.traverse_path("/zzz/b"),
        Err(Error::NotFound)
    ));
    // a file in the middle of the path
    assert!(matches!(fs.traverse_path("/a/b/c"), Err(Error::NotDir)));
    // relative paths are rejected
    assert!(matches!(fs.traverse_path("a/b"), Err(Error::Inval(_))));

    // a directory without traverse permission denies descent
    let nd = fs.new_inode(FileType::Directory, 0o644).unwrap();
    let root = fs.open_inode(0).unwrap();
    fs.add_direntry(root, "locked", nd).unwrap();
    fs.close_inode(root).unwrap();
    assert!(matches!(
        fs.traverse_path("/locked/x"),
        Err(Error::Access)
    ));
}

#[test]
fn state_survives_a_reopen() {
    let (file, mut fs) = open_volume(256, 0);
    let n = fs.new_inode(FileType::Regular, 0o644).unwrap();
    let root = fs.open_inode(0).unwrap();
    fs.add_direntry(root, "kept", n).unwrap();
    fs.close_inode(root).unwrap();
    let b = fs.alloc_data_block().unwrap();
    let dbfree = fs.superblock().unwrap().dbfree;
    fs.close().unwrap();

    let mut fs = Sofs::open(file.path()).unwrap();
    assert_eq!(fs.superblock().unwrap().dbfree, dbfree);
    assert_eq!(fs.traverse_path("/kept").unwrap(), Some(n));
    // the allocation cursor also survived: the next block follows
    assert_eq!(fs.alloc_data_block().unwrap(), b + 1);
    fs.close().unwrap();
    check_accounting(file.path());
}
