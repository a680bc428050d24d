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

//! Utility functions shared across the engine and the tools.

use std::fmt;
use std::mem::size_of;
use std::process::exit;
use std::slice;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Returns the current timestamp since the Unix epoch, in seconds, truncated
/// to the on-disk width.
pub fn get_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Computes `ceil(n0 / n1)` without overflowing.
pub fn ceil_division(n0: u32, n1: u32) -> u32 {
    n0 / n1 + u32::from(n0 % n1 != 0)
}

/// Returns the user ID of the calling process.
pub fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

/// Returns the group ID of the calling process.
pub fn current_gid() -> u32 {
    unsafe { libc::getgid() }
}

/// Reinterprets the given record as a byte slice.
pub fn reinterpret<T>(val: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(val as *const _ as *const u8, size_of::<T>()) }
}

/// Writes an error to stderr, then exits.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}
