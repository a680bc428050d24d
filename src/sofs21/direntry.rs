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

//! The directory slot, the unit of directory storage.
//!
//! A directory's content is an array of slots. A logical entry occupies one
//! slot when its name fits in [`SLOT_NAME_LEN`] bytes, or two contiguous
//! slots otherwise: the first slot then holds the name prefix with the inode
//! field at [`NULL_INODE`], and the second holds the suffix with the real
//! inode number.

use crate::{BLOCK_SIZE, DPB, NULL_INODE};
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// The number of name bytes a single slot can hold.
pub const SLOT_NAME_LEN: usize = 30;

/// The on-disk directory slot record.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirectorySlot {
    /// The name bytes; not necessarily NUL-terminated.
    pub name: [u8; SLOT_NAME_LEN],
    /// The inode number; [`NULL_INODE`] in the first slot of a two-slot
    /// entry and in empty slots.
    pub inode: u16,
}

// DPB is derived from this size; directory blocks depend on it
const_assert_eq!(size_of::<DirectorySlot>() * DPB, BLOCK_SIZE);

impl DirectorySlot {
    /// Tells whether the slot is empty.
    pub fn is_empty(&self) -> bool {
        self.name[0] == 0
    }

    /// Clears the slot.
    pub fn clear(&mut self) {
        self.name.fill(0);
        self.inode = NULL_INODE;
    }

    /// Copies `name` into the slot's name buffer, NUL-padding the rest.
    ///
    /// `name` must not exceed [`SLOT_NAME_LEN`] bytes.
    pub fn set_name(&mut self, name: &[u8]) {
        self.name.fill(0);
        self.name[..name.len()].copy_from_slice(name);
    }

    /// Returns the name bytes stored in the slot, up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SLOT_NAME_LEN);
        &self.name[..len]
    }
}

/// Returns the number of slots an entry with the given name occupies.
pub fn slots_for(name: &[u8]) -> usize {
    if name.len() <= SLOT_NAME_LEN {
        1
    } else {
        2
    }
}
