//! Per-tick enumeration of live threads.

use std::collections::HashMap;
use std::sync::Arc;

use ananicy_common::AnanicyResult;

use super::{ProcessSource, TaskId, ThreadRecord};

/// Every live thread at one point in time, keyed by tid.
#[derive(Debug, Default)]
pub struct Snapshot {
    threads: HashMap<u32, ThreadRecord>,
}

impl Snapshot {
    /// Enumerate all processes and their threads.
    ///
    /// Processes whose executable cannot be resolved (kernel threads, or
    /// processes that exited mid-scan) are skipped, as are processes whose
    /// thread list disappears before it is read. Only failing to list the
    /// process table at all is an error.
    pub fn capture(source: &Arc<dyn ProcessSource>) -> AnanicyResult<Self> {
        let mut threads = HashMap::new();

        for pid in source.pids()? {
            let exe = match source.exe(pid) {
                Ok(exe) => exe,
                Err(err) => {
                    tracing::trace!(pid, error = %err, "Skipping process without executable");
                    continue;
                }
            };

            let tids = match source.tids(pid) {
                Ok(tids) => tids,
                Err(err) => {
                    tracing::trace!(pid, error = %err, "Skipping process without tasks");
                    continue;
                }
            };

            for tid in tids {
                let record = ThreadRecord::new(TaskId::new(pid, tid), exe.clone(), Arc::clone(source));
                threads.insert(tid, record);
            }
        }

        tracing::trace!(threads = threads.len(), "Captured process snapshot");
        Ok(Self { threads })
    }

    /// Build a snapshot from prepared records.
    pub fn from_records(records: impl IntoIterator<Item = ThreadRecord>) -> Self {
        Self {
            threads: records
                .into_iter()
                .map(|record| (record.task().tid, record))
                .collect(),
        }
    }

    /// Number of threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether no thread was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Record for a thread id.
    #[must_use]
    pub fn get(&self, tid: u32) -> Option<&ThreadRecord> {
        self.threads.get(&tid)
    }

    /// All records.
    pub fn records(&self) -> impl Iterator<Item = &ThreadRecord> {
        self.threads.values()
    }

    /// All records, mutably.
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut ThreadRecord> {
        self.threads.values_mut()
    }
}
