//! hfs-inspect: print the partition map of a disk image and browse the
//! HFS-family volumes on it.
//!
//! Usage: hfs-inspect [--json] <image> [path inside volume]
//!
//! `RUST_LOG=debug` shows detection and B-tree decisions.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::AtomicBool;

use hfs_reader::fs::{Filesystem, FileEntry, HfsVolume};
use hfs_reader::partition::format_size;
use hfs_reader::{open_volume, Partition, PartitionSystem, ReaderConfig};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run() {
        eprintln!("hfs-inspect: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut json = false;
    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            "-h" | "--help" => {
                println!("Usage: hfs-inspect [--json] <image> [path inside volume]");
                return Ok(());
            }
            _ => positional.push(arg),
        }
    }
    let Some(image) = positional.first() else {
        bail!("no image given (try --help)");
    };
    let browse_path = positional.get(1).map(String::as_str).unwrap_or("/");

    let config = ReaderConfig::load();
    let file = File::open(image).with_context(|| format!("cannot open {image}"))?;
    let length = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let system = PartitionSystem::detect_and_load(&mut reader, 0, length, &config)
        .context("partition map is damaged")?;
    let partitions = match &system {
        Some(system) => system.partitions_recursive(&mut reader, &config),
        None => Vec::new(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&partitions)?);
        return Ok(());
    }

    match &system {
        Some(system) => {
            println!("{} ({})", system.system_type().long_name(), image);
            for p in &partitions {
                print_partition(p);
            }
        }
        None => println!("{image}: no partition map, probing whole image"),
    }

    let candidates: Vec<(u64, u64)> = if partitions.is_empty() {
        vec![(0, length)]
    } else {
        partitions
            .iter()
            .filter(|p| p.kind.is_hfs_family())
            .map(|p| (p.start_offset, p.length))
            .collect()
    };

    let mut found = 0;
    for (offset, len) in candidates {
        let file = File::open(image)?;
        let Some(mut volume) = open_volume(BufReader::new(file), offset, Some(len), &config)
            .with_context(|| format!("volume at offset {offset}"))?
        else {
            continue;
        };
        found += 1;
        println!();
        inspect_volume(&mut volume, browse_path)?;
    }
    if found == 0 {
        println!("no HFS volumes found");
    }
    Ok(())
}

fn print_partition(p: &Partition) {
    println!(
        "  #{:<2} {:>12} {:>10}  {:<24} {}",
        p.index,
        p.start_offset,
        format_size(p.length),
        p.type_label,
        p.name
    );
}

fn inspect_volume<R: std::io::Read + std::io::Seek + Send>(
    volume: &mut HfsVolume<R>,
    browse_path: &str,
) -> Result<()> {
    println!(
        "{} \"{}\" at offset {}: {} total, {} used",
        volume.fs_type(),
        volume.volume_label().unwrap_or(""),
        volume.volume_offset(),
        format_size(volume.total_size()),
        format_size(volume.used_size())
    );
    if let Err(e) = volume.run_sanity_checks() {
        println!("  sanity checks failed: {e}");
    }
    if let Some(journal) = volume.journal()? {
        let state = match &journal.header {
            Some(h) if h.is_empty() => "clean",
            Some(_) => "has pending transactions",
            None => "external",
        };
        println!("  journaled ({state})");
    }

    let stop = AtomicBool::new(false);
    let counts = volume.allocation_file()?.count_blocks(&stop)?.into_inner();
    println!("  bitmap: {} used, {} free of {} blocks", counts.used, counts.free, counts.total);

    let components: Vec<&str> = browse_path.split('/').filter(|c| !c.is_empty()).collect();
    let dir = if components.is_empty() {
        volume.root()?
    } else {
        let Some(record) = volume.get_entry(&components)? else {
            bail!("{browse_path}: not found");
        };
        let Some(folder) = record.value.as_folder() else {
            bail!("{browse_path}: not a folder");
        };
        FileEntry::new_directory(
            record.key.name.to_string_lossy(),
            browse_path.to_string(),
            folder.folder_id.0 as u64,
        )
    };

    for entry in volume.list_directory(&dir)? {
        if entry.is_directory() {
            println!("  {:>10}  {:<9} {}/", "", "", entry.name);
        } else {
            let codes = match (&entry.type_code, &entry.creator_code) {
                (Some(t), Some(c)) => format!("{t}/{c}"),
                _ => String::new(),
            };
            println!("  {:>10}  {:<9} {}", entry.size_string(), codes, entry.name);
        }
    }
    Ok(())
}
