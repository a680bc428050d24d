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

//! The `mksofs` tool creates a sofs21 filesystem on a device.

use sofs21::mksofs::{format, FormatOpts};
use sofs21::prompt::prompt;
use sofs21::rawdisk::{Block, RawDisk};
use sofs21::superblock::{Superblock, MAGIC};
use sofs21::util::error;
use std::env;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// If true, do not print the resulting partition.
    quiet: bool,
    /// If true, fill the free data blocks with zeros.
    zero: bool,
    /// The volume name.
    name: Option<String>,
    /// The requested number of inodes.
    itotal: Option<u16>,
    /// If set, create the device file with this number of blocks first.
    nblocks: Option<u32>,
    /// The path to the device file.
    device_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => res.help = true,
            "-q" => res.quiet = true,
            "-z" => res.zero = true,
            "-n" => {
                res.name = Some(args.next().unwrap_or_else(|| {
                    error("mksofs", "option -n requires a volume name");
                }));
            }
            "-i" => {
                let val = args
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        error("mksofs", "option -i requires an inode count");
                    });
                res.itotal = Some(val);
            }
            "-b" => {
                let val = args
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        error("mksofs", "option -b requires a block count");
                    });
                res.nblocks = Some(val);
            }
            _ => res.device_path = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" mksofs [options] device");
    println!();
    println!("Creates a sofs21 filesystem on the given device.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
    println!(" -n <name>\tSets the volume name.");
    println!(" -i <count>\tSets the number of inodes (0 = default).");
    println!(" -b <count>\tCreates the device file with the given number of blocks.");
    println!(" -q\t\tQuiet: does not print the resulting partition.");
    println!(" -z\t\tFills the free data blocks with zeros.");
}

/// Tells whether the device already holds a formatted volume.
fn is_formatted(disk: &mut RawDisk) -> bool {
    let mut blk = Block::zeroed();
    if disk.read_block(0, &mut blk).is_err() {
        return false;
    }
    Superblock::from_block(&blk).magic == MAGIC
}

fn main() {
    env_logger::init();
    let args = parse_args();
    if args.help {
        print_help();
        exit(0);
    }
    let device_path = args.device_path.unwrap_or_else(|| {
        error("mksofs", "specify the path to a device");
    });
    let mut disk = match args.nblocks {
        Some(n) => RawDisk::create(&device_path, n),
        None => RawDisk::open(&device_path),
    }
    .unwrap_or_else(|e| {
        error("mksofs", format_args!("{}: {e}", device_path.display()));
    });
    if args.nblocks.is_none() && is_formatted(&mut disk) {
        println!(
            "{} already contains a sofs21 filesystem",
            device_path.display()
        );
        let confirm = prompt("Proceed anyway? (y/N) ")
            .map(|s| s.to_lowercase() == "y")
            .unwrap_or(false);
        if !confirm {
            eprintln!("Abort.");
            exit(1);
        }
    }
    let opts = FormatOpts {
        name: args.name.unwrap_or_else(|| String::from("sofs21")),
        itotal: args.itotal.unwrap_or(0),
        zero: args.zero,
        date: true,
    };
    let report = format(&mut disk, &opts).unwrap_or_else(|e| {
        error("mksofs", format_args!("failed to create filesystem: {e}"));
    });
    if !args.quiet {
        println!("{}: {} blocks", device_path.display(), report.ntotal);
        println!(
            " inode table:\t{} blocks ({} inodes)",
            report.itsize, report.itotal
        );
        println!(" bitmap table:\t{} blocks", report.rbm_size);
        println!(
            " data pool:\t{} blocks, starting at block {}",
            report.dbtotal, report.dbp_start
        );
    }
}
