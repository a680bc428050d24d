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

//! `sofs21tool` is a menu-driven tool exposing each engine operation on an
//! open volume, one command per operation.

use sofs21::daal::{InodeHandle, Sofs};
use sofs21::inode::FileType;
use sofs21::prompt::prompt;
use sofs21::rawdisk::Block;
use sofs21::util::error;
use sofs21::{Result, NULL_BLOCK};
use std::env;
use std::path::PathBuf;
use std::process::exit;
use std::str::{FromStr, SplitWhitespace};

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the device file.
    device_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => res.help = true,
            _ => res.device_path = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" sofs21tool device");
    println!();
    println!("Opens the volume on the given device and prompts for commands.");
}

/// Prints help for the tool's internal commands.
fn print_cmd_help() {
    println!();
    println!("Help:");
    println!();
    println!("  Display");
    println!("   sb                     print the superblock");
    println!("   ino <n>                print inode n");
    println!("   db <bn>                dump data block bn");
    println!();
    println!("  Free inodes");
    println!("   ai                     allocate an inode");
    println!("   fi <n>                 free inode n");
    println!("   hi <n>                 hide inode n");
    println!("   ui                     unqueue the oldest hidden inode");
    println!();
    println!("  Free data blocks");
    println!("   ab                     allocate a data block");
    println!("   fb <bn>                free data block bn");
    println!("   rb                     replenish the retrieval cache from the bitmap");
    println!("   rc                     replenish the retrieval cache from the insertion cache");
    println!("   dp                     deplete the insertion cache into the bitmap");
    println!();
    println!("  Inode blocks");
    println!("   gib <n> <ibn>          get the data block at inode block position ibn");
    println!("   aib <n> <ibn>          allocate the inode block position ibn");
    println!("   fib <n> <ffbn>         free every inode block from position ffbn on");
    println!("   ni <r|d|l> <perm>      get a new inode of the given type");
    println!("   ri <n>                 remove inode n");
    println!();
    println!("  Directory entries");
    println!("   gd <pin> <name>        look an entry up");
    println!("   ad <pin> <name> <cin>  add an entry");
    println!("   dd <pin> <name>        delete an entry");
    println!("   rn <pin> <old> <new>   rename an entry");
    println!("   ce <pin>               check directory emptiness");
    println!("   tp <path>              traverse an absolute path");
    println!();
    println!("  Misc");
    println!("   m                      print this menu");
    println!("   q                      quit");
    println!();
}

/// Parses the next whitespace-separated argument of the command line.
fn arg<T: FromStr>(it: &mut SplitWhitespace) -> Result<T> {
    it.next()
        .and_then(|s| s.parse().ok())
        .ok_or(sofs21::Error::Inval("missing or malformed argument"))
}

/// Opens inode `n` around the call to `f`, closing it on every path.
fn with_inode<T>(
    fs: &mut Sofs,
    n: u16,
    f: impl FnOnce(&mut Sofs, InodeHandle) -> Result<T>,
) -> Result<T> {
    let h = fs.open_inode(n)?;
    let res = f(fs, h);
    fs.close_inode(h)?;
    res
}

fn show_superblock(fs: &mut Sofs) -> Result<()> {
    let sb = fs.superblock()?;
    println!("name:\t\t{}", sb.name());
    println!("ntotal:\t\t{}", sb.ntotal);
    println!(
        "inodes:\t\t{} total, {} free, cursor at {}",
        sb.itotal, sb.ifree, sb.iidx
    );
    println!(
        "deleted queue:\t{} entries, head at {}",
        sb.iqcount, sb.iqhead
    );
    println!(
        "data blocks:\t{} total, {} free, pool at block {}",
        sb.dbtotal, sb.dbfree, sb.dbp_start
    );
    let rbm_idx = if sb.rbm_idx == NULL_BLOCK {
        String::from("(null)")
    } else {
        sb.rbm_idx.to_string()
    };
    println!(
        "bitmap table:\t{} blocks at block {}, cursor at word {}",
        sb.rbm_size, sb.rbm_start, rbm_idx
    );
    println!(
        "caches:\t\tretrieval idx {}, insertion idx {}",
        sb.retrieval_cache.idx, sb.insertion_cache.idx
    );
    Ok(())
}

fn show_inode(fs: &mut Sofs, n: u16) -> Result<()> {
    with_inode(fs, n, |fs, h| {
        let inode = fs.inode(h)?;
        let ftype = match inode.file_type() {
            Some(FileType::Regular) => "regular file",
            Some(FileType::Directory) => "directory",
            Some(FileType::Symlink) => "symlink",
            None => "(invalid type)",
        };
        println!("mode:\t{:#06o} ({ftype})", inode.mode);
        println!("lnkcnt:\t{}", inode.lnkcnt);
        println!("owner:\t{}:{}", inode.owner, inode.group);
        println!("size:\t{} bytes", inode.size);
        println!(
            "times:\ta {} / m {} / c {}",
            inode.atime, inode.mtime, inode.ctime
        );
        let fmt_ref = |r: u32| {
            if r == NULL_BLOCK {
                String::from("-")
            } else {
                r.to_string()
            }
        };
        let d: Vec<String> = inode.d.iter().map(|&r| fmt_ref(r)).collect();
        println!("d:\t[{}]", d.join(" "));
        println!("i1:\t{}", fmt_ref(inode.i1));
        println!("i2:\t{}", fmt_ref(inode.i2));
        Ok(())
    })
}

fn dump_data_block(fs: &mut Sofs, bn: u32) -> Result<()> {
    let mut blk = Block::zeroed();
    fs.read_data_block(bn, &mut blk)?;
    for (i, chunk) in blk.bytes.chunks(16).enumerate() {
        print!("{:04x}:", i * 16);
        for b in chunk {
            print!(" {b:02x}");
        }
        println!();
    }
    Ok(())
}

fn run_cmd(fs: &mut Sofs, cmd: &str, it: &mut SplitWhitespace) -> Result<()> {
    match cmd {
        "sb" => show_superblock(fs)?,
        "ino" => show_inode(fs, arg(it)?)?,
        "db" => dump_data_block(fs, arg(it)?)?,

        "ai" => match fs.alloc_inode()? {
            Some(n) => println!("allocated inode {n}"),
            None => println!("no free inode"),
        },
        "fi" => fs.free_inode(arg(it)?)?,
        "hi" => {
            if fs.hide_inode(arg(it)?)? {
                println!("inode hidden");
            } else {
                println!("deleted queue is full");
            }
        }
        "ui" => match fs.unqueue_hidden_inode()? {
            Some(n) => println!("unqueued inode {n}"),
            None => println!("deleted queue is empty"),
        },

        "ab" => println!("allocated data block {}", fs.alloc_data_block()?),
        "fb" => fs.free_data_block(arg(it)?)?,
        "rb" => fs.replenish_from_bitmap()?,
        "rc" => fs.replenish_from_cache()?,
        "dp" => fs.deplete()?,

        "gib" => {
            let n = arg(it)?;
            let ibn = arg(it)?;
            let bn = with_inode(fs, n, |fs, h| fs.get_inode_block(h, ibn))?;
            if bn == NULL_BLOCK {
                println!("(null)");
            } else {
                println!("{bn}");
            }
        }
        "aib" => {
            let n = arg(it)?;
            let ibn = arg(it)?;
            let bn = with_inode(fs, n, |fs, h| fs.alloc_inode_block(h, ibn))?;
            println!("allocated data block {bn}");
        }
        "fib" => {
            let n = arg(it)?;
            let ffbn = arg(it)?;
            with_inode(fs, n, |fs, h| fs.free_inode_blocks(h, ffbn))?;
        }
        "ni" => {
            let ftype = match it.next() {
                Some("r") => FileType::Regular,
                Some("d") => FileType::Directory,
                Some("l") => FileType::Symlink,
                _ => return Err(sofs21::Error::Inval("type must be r, d or l")),
            };
            let perm = it
                .next()
                .and_then(|s| u16::from_str_radix(s, 8).ok())
                .ok_or(sofs21::Error::Inval("missing or malformed permissions"))?;
            println!("new inode {}", fs.new_inode(ftype, perm)?);
        }
        "ri" => fs.remove_inode(arg(it)?)?,

        "gd" => {
            let pin = arg(it)?;
            let name: String = arg(it)?;
            match with_inode(fs, pin, |fs, h| fs.get_direntry(h, &name))? {
                Some(n) => println!("{name} -> inode {n}"),
                None => println!("no such entry"),
            }
        }
        "ad" => {
            let pin = arg(it)?;
            let name: String = arg(it)?;
            let cin = arg(it)?;
            with_inode(fs, pin, |fs, h| fs.add_direntry(h, &name, cin))?;
        }
        "dd" => {
            let pin = arg(it)?;
            let name: String = arg(it)?;
            let n = with_inode(fs, pin, |fs, h| fs.delete_direntry(h, &name))?;
            println!("deleted entry referencing inode {n}");
        }
        "rn" => {
            let pin = arg(it)?;
            let old: String = arg(it)?;
            let new: String = arg(it)?;
            with_inode(fs, pin, |fs, h| fs.rename_direntry(h, &old, &new))?;
        }
        "ce" => {
            let pin = arg(it)?;
            if with_inode(fs, pin, |fs, h| fs.check_dir_empty(h))? {
                println!("directory is empty");
            } else {
                println!("directory is not empty");
            }
        }
        "tp" => {
            let path = it
                .next()
                .ok_or(sofs21::Error::Inval("missing or malformed argument"))?;
            match fs.traverse_path(path)? {
                Some(n) => println!("{path} -> inode {n}"),
                None => println!("no such entry"),
            }
        }

        "m" => print_cmd_help(),
        _ => eprintln!("{cmd}: unknown command"),
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = parse_args();
    if args.help {
        print_help();
        exit(0);
    }
    let Some(device_path) = args.device_path else {
        error("sofs21tool", "specify the path to a device");
    };
    let mut fs = Sofs::open(&device_path).unwrap_or_else(|e| {
        error(
            "sofs21tool",
            format_args!("{}: {e}", device_path.display()),
        );
    });
    while let Some(line) = prompt("Command (m for help): ") {
        let mut it = line.split_whitespace();
        let Some(cmd) = it.next() else {
            continue;
        };
        if cmd == "q" {
            break;
        }
        if let Err(e) = run_cmd(&mut fs, cmd, &mut it) {
            eprintln!("error: {e}");
        }
    }
    if let Err(e) = fs.close() {
        error("sofs21tool", format_args!("cannot close volume: {e}"));
    }
}
