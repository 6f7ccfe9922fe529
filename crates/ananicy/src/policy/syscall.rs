//! [`Actuator`] backed by real syscalls.

use std::fs;
use std::io;
use std::path::PathBuf;

use ananicy_common::{AnanicyError, AnanicyResult, IoClass, IoLevel, Nice, OomScoreAdj, RtPrio, SchedPolicy};

use super::Actuator;
use crate::process::{is_gone, TaskId};
use crate::sys;

/// Changes priorities of live threads.
#[derive(Debug, Clone)]
pub struct SyscallActuator {
    proc_root: PathBuf,
}

impl SyscallActuator {
    /// `oom_score_adj` is written through the procfs mounted at `proc_root`.
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl Default for SyscallActuator {
    fn default() -> Self {
        Self::new("/proc")
    }
}

fn failed(operation: &'static str, task: TaskId, err: io::Error) -> AnanicyError {
    if is_gone(&err) {
        task.vanished()
    } else {
        AnanicyError::Actuator {
            operation,
            tid: task.tid,
            source: err,
        }
    }
}

impl Actuator for SyscallActuator {
    fn set_nice(&self, task: TaskId, nice: Nice) -> AnanicyResult<()> {
        sys::set_nice(task.tid, nice).map_err(|e| failed("setpriority", task, e))
    }

    fn set_io_priority(&self, task: TaskId, class: IoClass, level: Option<IoLevel>) -> AnanicyResult<()> {
        sys::ioprio_set(task.tid, class, level).map_err(|e| failed("ioprio_set", task, e))
    }

    fn set_scheduler(&self, task: TaskId, policy: SchedPolicy, rtprio: Option<RtPrio>) -> AnanicyResult<()> {
        sys::sched_setscheduler(task.tid, policy, rtprio)
            .map_err(|e| failed("sched_setscheduler", task, e))
    }

    fn set_oom_score_adj(&self, task: TaskId, adj: OomScoreAdj) -> AnanicyResult<()> {
        let path = self
            .proc_root
            .join(task.pid.to_string())
            .join("task")
            .join(task.tid.to_string())
            .join("oom_score_adj");
        fs::write(path, adj.to_string()).map_err(|e| failed("write oom_score_adj", task, e))
    }
}
