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

//! Management of free data blocks.
//!
//! Free data blocks live in three places: the reference bitmap table (one bit
//! per block of the data pool, a bit at one meaning free), the retrieval
//! cache (references ready to be handed out) and the insertion cache
//! (references collected by `free_data_block`, waiting to go back to the
//! bitmap). Both caches are stored in the superblock and survive unmounts.
//!
//! Allocation pops from the retrieval cache, refilling it from the bitmap
//! first and from the insertion cache second. Release pushes into the
//! insertion cache, depleting it into the bitmap when full. A block is
//! always in exactly one of the three places, or allocated.

use crate::daal::Sofs;
use crate::error::{Error, Result};
use crate::superblock::REF_CACHE_SIZE;
use crate::util::ceil_division;
use crate::{NULL_BLOCK, RPB};
use log::trace;

impl Sofs {
    /// Allocates a free data block and returns its number.
    pub fn alloc_data_block(&mut self) -> Result<u32> {
        trace!("alloc_data_block()");
        if self.superblock()?.retrieval_empty() {
            self.replenish_from_bitmap()?;
        }
        if self.superblock()?.retrieval_empty() {
            self.replenish_from_cache()?;
        }
        let sb = self.superblock_mut()?;
        if sb.retrieval_empty() {
            return Err(Error::NoSpace);
        }
        let idx = sb.retrieval_cache.idx as usize;
        let bn = sb.retrieval_cache.refs[idx];
        sb.retrieval_cache.refs[idx] = NULL_BLOCK;
        sb.retrieval_cache.idx += 1;
        sb.dbfree -= 1;
        self.save_superblock()?;
        Ok(bn)
    }

    /// Frees the data block `bn`.
    pub fn free_data_block(&mut self, bn: u32) -> Result<()> {
        trace!("free_data_block({bn})");
        let sb = self.superblock()?;
        if bn >= sb.dbtotal {
            return Err(Error::Inval("data block number out of range"));
        }
        if sb.insertion_full() {
            self.deplete()?;
        }
        let sb = self.superblock_mut()?;
        let idx = sb.insertion_cache.idx as usize;
        sb.insertion_cache.refs[idx] = bn;
        sb.insertion_cache.idx += 1;
        sb.dbfree += 1;
        self.save_superblock()?;
        Ok(())
    }

    /// Refills the retrieval cache by transferring every reference held by
    /// the insertion cache, preserving order.
    ///
    /// Does nothing if the retrieval cache is not empty, or if the insertion
    /// cache holds nothing.
    pub fn replenish_from_cache(&mut self) -> Result<()> {
        trace!("replenish_from_cache()");
        let sb = self.superblock_mut()?;
        if !sb.retrieval_empty() {
            return Ok(());
        }
        let cnt = sb.insertion_cache.idx as usize;
        if cnt == 0 {
            return Ok(());
        }
        // the valid entries end up in the tail of the retrieval array, so
        // that popping from `idx` forward consumes them in order
        let start = REF_CACHE_SIZE - cnt;
        for k in 0..cnt {
            sb.retrieval_cache.refs[start + k] = sb.insertion_cache.refs[k];
            sb.insertion_cache.refs[k] = NULL_BLOCK;
        }
        sb.retrieval_cache.idx = start as u32;
        sb.insertion_cache.idx = 0;
        self.save_superblock()
    }

    /// Refills the retrieval cache from the reference bitmap.
    ///
    /// The bitmap is walked word by word starting at the `rbm_idx` cursor,
    /// wrapping around once; each set bit found is cleared and its block
    /// number collected, until the cache is full or the bitmap is exhausted.
    /// Does nothing if the retrieval cache is not empty or the bitmap holds
    /// no set bit.
    pub fn replenish_from_bitmap(&mut self) -> Result<()> {
        trace!("replenish_from_bitmap()");
        let (rbm_idx, dbtotal) = {
            let sb = self.superblock()?;
            if !sb.retrieval_empty() {
                return Ok(());
            }
            (sb.rbm_idx, sb.dbtotal)
        };
        if rbm_idx == NULL_BLOCK {
            return Ok(());
        }
        let total_words = ceil_division(dbtotal, 32) as usize;
        let mut collected = [NULL_BLOCK; REF_CACHE_SIZE];
        let mut cnt = 0;
        let mut last = None;
        let mut w = rbm_idx as usize % total_words;
        for _ in 0..total_words {
            if cnt == REF_CACHE_SIZE {
                break;
            }
            let words = self.bitmap_block((w / RPB) as u32)?;
            let word = &mut words[w % RPB];
            while *word != 0 && cnt < REF_CACHE_SIZE {
                let bit = word.trailing_zeros();
                *word &= !(1u32 << bit);
                collected[cnt] = w as u32 * 32 + bit;
                cnt += 1;
                last = Some(w);
            }
            if *word != 0 {
                // the cache filled up with bits left in this word
                break;
            }
            w = (w + 1) % total_words;
        }
        let new_rbm_idx = if cnt < REF_CACHE_SIZE {
            // the walk visited every word without filling the cache, so no
            // set bit remains anywhere
            NULL_BLOCK
        } else {
            let lw = last.unwrap();
            let residue = self.bitmap_block((lw / RPB) as u32)?[lw % RPB];
            if residue != 0 {
                lw as u32
            } else {
                ((lw + 1) % total_words) as u32
            }
        };
        let sb = self.superblock_mut()?;
        if cnt > 0 {
            let start = REF_CACHE_SIZE - cnt;
            sb.retrieval_cache.refs[start..].copy_from_slice(&collected[..cnt]);
            sb.retrieval_cache.idx = start as u32;
        }
        sb.rbm_idx = new_rbm_idx;
        self.save_bitmap_block()?;
        self.save_superblock()
    }

    /// Empties the insertion cache into the reference bitmap, setting the
    /// bit of every held reference.
    ///
    /// Does nothing if the insertion cache is not full.
    pub fn deplete(&mut self) -> Result<()> {
        trace!("deplete()");
        let sb = self.superblock_mut()?;
        if !sb.insertion_full() {
            return Ok(());
        }
        let refs = sb.insertion_cache.refs;
        if sb.rbm_idx == NULL_BLOCK {
            // future refills scan from the start again
            sb.rbm_idx = 0;
        }
        for bn in refs {
            let w = (bn / 32) as usize;
            let words = self.bitmap_block((w / RPB) as u32)?;
            words[w % RPB] |= 1u32 << (bn % 32);
        }
        self.save_bitmap_block()?;
        let sb = self.superblock_mut()?;
        sb.insertion_cache.refs = [NULL_BLOCK; REF_CACHE_SIZE];
        sb.insertion_cache.idx = 0;
        self.save_superblock()
    }
}
