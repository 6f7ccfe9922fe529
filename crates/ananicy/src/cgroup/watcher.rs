//! Background mirror of a cgroup's member list.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;

/// Shared, swap-published member set.
pub type MemberSet = Arc<RwLock<HashSet<u32>>>;

/// Polls between unconditional reloads.
const FULL_RELOAD_EVERY: u32 = 10;

/// Thread that reloads a membership file whenever its mtime or size changes,
/// and every [`FULL_RELOAD_EVERY`] polls regardless.
///
/// Dropping the watcher stops the thread and waits for it.
#[derive(Debug)]
pub struct MembershipWatcher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MembershipWatcher {
    /// Start watching `path`, publishing into `members`.
    pub fn spawn(name: &str, path: PathBuf, members: MemberSet, poll: Duration) -> io::Result<Self> {
        let (stop, stopped) = crossbeam_channel::bounded(0);
        let handle = thread::Builder::new()
            .name(format!("cgroup-{name}"))
            .spawn(move || watch(&path, &members, &stopped, poll))?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

impl Drop for MembershipWatcher {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Cgroup watcher panicked");
            }
        }
    }
}

/// What the watcher compares between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: SystemTime,
    len: u64,
}

impl Stamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

fn watch(path: &Path, members: &MemberSet, stopped: &Receiver<()>, poll: Duration) {
    let mut last_stamp: Option<Stamp> = None;
    let mut polls_since_reload = 0;

    loop {
        let stamp = Stamp::of(path);
        polls_since_reload += 1;
        if stamp != last_stamp || polls_since_reload >= FULL_RELOAD_EVERY {
            last_stamp = stamp;
            polls_since_reload = 0;
            match read_members(path) {
                Ok(set) => {
                    let count = set.len();
                    *members.write() = set;
                    tracing::trace!(path = %path.display(), members = count, "Reloaded cgroup members");
                }
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "Failed to read cgroup members");
                }
            }
        }

        match stopped.recv_timeout(poll) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::trace!(path = %path.display(), "Cgroup watcher stopped");
}

/// Read one id per line, ignoring anything that is not a number.
pub(crate) fn read_members(path: &Path) -> io::Result<HashSet<u32>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for(members: &MemberSet, predicate: impl Fn(&HashSet<u32>) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if predicate(&members.read()) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn parses_member_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks");
        fs::write(&path, "12\n13\n\nbogus\n").unwrap();
        assert_eq!(read_members(&path).unwrap(), HashSet::from([12, 13]));
    }

    #[test]
    fn publishes_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks");
        fs::write(&path, "1\n").unwrap();

        let members = MemberSet::default();
        let watcher =
            MembershipWatcher::spawn("test", path.clone(), Arc::clone(&members), Duration::from_millis(10))
                .unwrap();
        assert!(wait_for(&members, |set| set.contains(&1)));

        thread::sleep(Duration::from_millis(50));
        fs::write(&path, "1\n2\n").unwrap();
        assert!(wait_for(&members, |set| set.contains(&2)));

        drop(watcher);
    }

    fn rewrite_keeping_mtime(path: &Path, contents: &str) {
        let modified = fs::metadata(path).unwrap().modified().unwrap();
        fs::write(path, contents).unwrap();
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    fn watch_file(contents: &str) -> (tempfile::TempDir, PathBuf, MemberSet, MembershipWatcher) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks");
        fs::write(&path, contents).unwrap();
        let members = MemberSet::default();
        let watcher =
            MembershipWatcher::spawn("test", path.clone(), Arc::clone(&members), Duration::from_millis(10))
                .unwrap();
        (dir, path, members, watcher)
    }

    #[test]
    fn size_change_within_same_mtime_is_seen() {
        let (_dir, path, members, _watcher) = watch_file("1\n");
        assert!(wait_for(&members, |set| set.contains(&1)));

        rewrite_keeping_mtime(&path, "1\n2\n");
        assert!(wait_for(&members, |set| set.contains(&2)));
    }

    #[test]
    fn same_size_same_mtime_is_seen_on_full_reload() {
        let (_dir, path, members, _watcher) = watch_file("1\n");
        assert!(wait_for(&members, |set| set.contains(&1)));

        rewrite_keeping_mtime(&path, "3\n");
        assert!(wait_for(&members, |set| set.contains(&3) && !set.contains(&1)));
    }

    #[test]
    fn stamp_tracks_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks");
        assert_eq!(Stamp::of(&path), None);

        fs::write(&path, "1\n").unwrap();
        let before = Stamp::of(&path).unwrap();
        rewrite_keeping_mtime(&path, "1\n2\n");
        let after = Stamp::of(&path).unwrap();
        assert_eq!(before.modified, after.modified);
        assert_ne!(before, after);
    }

    #[test]
    fn drop_stops_thread() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = MembershipWatcher::spawn(
            "idle",
            dir.path().join("missing"),
            MemberSet::default(),
            Duration::from_secs(60),
        )
        .unwrap();

        let started = Instant::now();
        drop(watcher);
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
