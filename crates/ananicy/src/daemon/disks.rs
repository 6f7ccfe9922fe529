//! Startup check of block device I/O schedulers.
//!
//! I/O classes and levels only take effect under schedulers that honour
//! them.

use std::fs;
use std::path::Path;

const COMPATIBLE: [&str; 3] = ["cfq", "bfq", "bfq-mq"];
const SKIPPED_PREFIXES: [&str; 3] = ["loop", "ram", "sr"];

/// Disks whose active scheduler ignores I/O priorities, with that scheduler.
#[must_use]
pub fn incompatible_schedulers(block_root: &Path) -> Vec<(String, String)> {
    let Ok(entries) = fs::read_dir(block_root) else {
        tracing::debug!(path = %block_root.display(), "Block device directory not readable");
        return Vec::new();
    };

    let mut disks: Vec<(String, String)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let disk = entry.file_name().to_string_lossy().into_owned();
            if SKIPPED_PREFIXES.iter().any(|prefix| disk.starts_with(prefix)) {
                return None;
            }
            let content = fs::read_to_string(entry.path().join("queue/scheduler")).ok()?;
            let scheduler = active_scheduler(&content)?;
            (!COMPATIBLE.contains(&scheduler)).then(|| (disk, scheduler.to_string()))
        })
        .collect();
    disks.sort();
    disks
}

/// Warn about every disk found by [`incompatible_schedulers`].
pub fn warn_incompatible(block_root: &Path) {
    for (disk, scheduler) in incompatible_schedulers(block_root) {
        tracing::warn!(
            disk = %disk,
            scheduler = %scheduler,
            "Disk does not use cfq/bfq scheduler, ioclass and ionice will not work on it"
        );
    }
}

/// The bracketed entry of `queue/scheduler`, or the only entry.
fn active_scheduler(content: &str) -> Option<&str> {
    let names: Vec<&str> = content.split_whitespace().collect();
    if let Some(active) = names
        .iter()
        .find_map(|name| name.strip_prefix('[').and_then(|n| n.strip_suffix(']')))
    {
        return Some(active);
    }
    match names.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}
