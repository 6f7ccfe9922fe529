//! JSON views for `ananicy dump`. Nothing here changes process state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use ananicy_common::{
    AnanicyPaths, AnanicyResult, IoClass, IoLevel, Nice, OomScoreAdj, RtPrio, SchedPolicy,
};
use serde::Serialize;

use super::DumpTarget;
use crate::cgroup::{self, CpuQuota};
use crate::config::{CgroupDefinition, RuleCatalog, Verbosity};
use crate::process::{Autogroup, ProcFs, ProcessSource, Snapshot, ThreadRecord};

#[derive(Serialize)]
struct CgroupView<'a> {
    #[serde(flatten)]
    definition: CgroupDefinition<'a>,
    #[serde(flatten)]
    quota: CpuQuota,
}

/// Current attributes of one thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    /// Thread group id.
    pub pid: u32,
    /// Thread id.
    pub tid: u32,
    /// Resolved executable.
    pub exe: PathBuf,
    /// Executable file name.
    pub cmd: String,
    /// Kernel short name.
    pub stat_name: String,
    /// Niceness.
    pub nice: Nice,
    /// Scheduling policy.
    pub sched: SchedPolicy,
    /// Realtime priority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtprio: Option<RtPrio>,
    /// I/O class as the kernel reports it.
    pub ioclass: IoClass,
    /// I/O level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ionice: Option<IoLevel>,
    /// OOM score adjustment.
    pub oom_score_adj: OomScoreAdj,
    /// Command line.
    pub cmdline: Vec<String>,
    /// Session autogroup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autogroup: Option<Autogroup>,
}

impl ThreadView {
    /// Read every attribute of `record`.
    pub fn read(record: &mut ThreadRecord) -> AnanicyResult<Self> {
        let task = record.task();
        let io = record.io_priority()?;
        Ok(Self {
            pid: task.pid,
            tid: task.tid,
            exe: record.exe().to_path_buf(),
            cmd: record.cmd().to_string(),
            stat_name: record.stat_name()?.to_string(),
            nice: record.nice()?,
            sched: record.sched_policy()?,
            rtprio: record.rt_priority()?,
            ioclass: io.class,
            ionice: io.level,
            oom_score_adj: record.oom_score_adj()?,
            cmdline: record.cmdline()?.to_vec(),
            autogroup: record.autogroup()?,
        })
    }
}

/// Threads sharing an autogroup.
#[derive(Debug, Clone, Serialize)]
pub struct AutogroupView {
    /// Autogroup niceness.
    pub nice: i32,
    /// Member threads.
    pub threads: Vec<ThreadView>,
}

/// Attributes of every live thread, ordered by pid then tid. Threads that
/// exit while being read are left out.
pub fn processes(source: &Arc<dyn ProcessSource>) -> AnanicyResult<Vec<ThreadView>> {
    let mut snapshot = Snapshot::capture(source)?;
    let mut views: Vec<ThreadView> = snapshot
        .records_mut()
        .filter_map(|record| match ThreadView::read(record) {
            Ok(view) => Some(view),
            Err(err) => {
                tracing::debug!(task = %record.task(), error = %err, "Skipping thread");
                None
            }
        })
        .collect();
    views.sort_by_key(|view| (view.pid, view.tid));
    Ok(views)
}

/// Group threads by autogroup id.
#[must_use]
pub fn autogroups(views: Vec<ThreadView>) -> BTreeMap<u64, AutogroupView> {
    let mut groups: BTreeMap<u64, AutogroupView> = BTreeMap::new();
    for view in views {
        let Some(group) = view.autogroup else {
            continue;
        };
        groups
            .entry(group.id)
            .or_insert_with(|| AutogroupView {
                nice: group.nice,
                threads: Vec::new(),
            })
            .threads
            .push(view);
    }
    groups
}

/// Render `target` as pretty JSON.
pub fn render(target: DumpTarget, paths: &AnanicyPaths) -> AnanicyResult<String> {
    let output = match target {
        DumpTarget::Rules => {
            let catalog = RuleCatalog::load(&paths.config_dir, &Verbosity::quiet())?;
            serde_json::to_string_pretty(&catalog.rules().collect::<Vec<_>>())?
        }
        DumpTarget::Types => {
            let catalog = RuleCatalog::load(&paths.config_dir, &Verbosity::quiet())?;
            serde_json::to_string_pretty(&catalog.types().collect::<Vec<_>>())?
        }
        DumpTarget::Cgroups => {
            let catalog = RuleCatalog::load(&paths.config_dir, &Verbosity::quiet())?;
            let cores = cgroup::host_cores();
            let views: Vec<CgroupView<'_>> = catalog
                .cgroups()
                .map(|definition| CgroupView {
                    definition,
                    quota: definition.quota(cores),
                })
                .collect();
            serde_json::to_string_pretty(&views)?
        }
        DumpTarget::Proc => {
            let source: Arc<dyn ProcessSource> = Arc::new(ProcFs::new(&paths.proc_root));
            serde_json::to_string_pretty(&processes(&source)?)?
        }
        DumpTarget::Autogroup => {
            let source: Arc<dyn ProcessSource> = Arc::new(ProcFs::new(&paths.proc_root));
            serde_json::to_string_pretty(&autogroups(processes(&source)?))?
        }
    };
    Ok(output)
}
