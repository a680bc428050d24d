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

//! This module implements prompting.

use std::io::BufRead;
use std::io::Write;
use std::{fmt, io};

/// Show a prompt, then read a line from standard input.
///
/// Returns `None` when the input stream is closed.
pub fn prompt<P: fmt::Display>(prompt: P) -> Option<String> {
    print!("{prompt}");
    let _ = io::stdout().flush();
    let input = io::stdin().lock().lines().next()?.unwrap_or(String::new());
    Some(input)
}
