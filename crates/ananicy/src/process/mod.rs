//! Process and thread records.
//!
//! A [`ThreadRecord`] is built for every live thread on each scan. Attributes
//! are read from a [`ProcessSource`] the first time they are asked for and
//! cached for the rest of the tick.

mod procfs;
mod snapshot;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ananicy_common::{
    AnanicyError, AnanicyResult, IoClass, IoLevel, IoPriority, Nice, OomScoreAdj, RtPrio,
    SchedPolicy,
};
use bitflags::bitflags;
use serde::Serialize;

pub use procfs::ProcFs;
pub use snapshot::Snapshot;

/// A (thread group, thread) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId {
    /// Thread group id.
    pub pid: u32,
    /// Thread id.
    pub tid: u32,
}

impl TaskId {
    /// Create a task id.
    #[must_use]
    pub const fn new(pid: u32, tid: u32) -> Self {
        Self { pid, tid }
    }

    /// Turn an OS error into [`AnanicyError::ProcessVanished`] when it only
    /// says the task is gone.
    #[must_use]
    pub fn vanished_or(self, err: std::io::Error) -> AnanicyError {
        if is_gone(&err) {
            self.vanished()
        } else {
            AnanicyError::Io(err)
        }
    }

    /// The error reported when this task no longer exists.
    #[must_use]
    pub const fn vanished(self) -> AnanicyError {
        AnanicyError::ProcessVanished {
            pid: self.pid,
            tid: self.tid,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pid, self.tid)
    }
}

/// Whether an OS error means the process or thread has exited.
pub(crate) fn is_gone(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ESRCH)
}

bitflags! {
    /// Categories of a rule that have been applied to a thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ApplicationState: u8 {
        /// CPU niceness.
        const NICE = 1 << 0;
        /// I/O class and level.
        const IOCLASS = 1 << 1;
        /// Scheduling policy and realtime priority.
        const SCHED = 1 << 2;
        /// OOM score adjustment.
        const OOM_SCORE_ADJ = 1 << 3;
        /// Cgroup membership.
        const CGROUP = 1 << 4;
        /// Every category.
        const ALLSET = Self::NICE.bits()
            | Self::IOCLASS.bits()
            | Self::SCHED.bits()
            | Self::OOM_SCORE_ADJ.bits()
            | Self::CGROUP.bits();
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        bitflags::parser::to_writer(self, f)
    }
}

/// Scheduling fields from `/proc/<pid>/task/<tid>/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStat {
    /// Niceness.
    pub nice: Nice,
    /// Scheduling policy.
    pub policy: SchedPolicy,
    /// Realtime priority; `None` for non-realtime policies.
    pub rt_priority: Option<RtPrio>,
}

/// Session autogroup a process belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Autogroup {
    /// Autogroup number.
    pub id: u64,
    /// Autogroup niceness.
    pub nice: i32,
}

/// Read access to live process attributes.
///
/// Every per-task read may fail with [`AnanicyError::ProcessVanished`].
pub trait ProcessSource: Send + Sync {
    /// All visible thread group ids.
    fn pids(&self) -> AnanicyResult<Vec<u32>>;

    /// Resolved executable of a process.
    fn exe(&self, pid: u32) -> AnanicyResult<PathBuf>;

    /// Thread ids of a process.
    fn tids(&self, pid: u32) -> AnanicyResult<Vec<u32>>;

    /// Whether the thread still exists.
    fn exists(&self, task: TaskId) -> bool;

    /// Niceness, policy and realtime priority.
    fn stat(&self, task: TaskId) -> AnanicyResult<TaskStat>;

    /// Kernel short name (`comm`).
    fn status_name(&self, task: TaskId) -> AnanicyResult<String>;

    /// I/O priority as the kernel reports it, class `none` included.
    fn io_priority(&self, task: TaskId) -> AnanicyResult<IoPriority>;

    /// OOM score adjustment.
    fn oom_score_adj(&self, task: TaskId) -> AnanicyResult<OomScoreAdj>;

    /// Command line arguments.
    fn cmdline(&self, task: TaskId) -> AnanicyResult<Vec<String>>;

    /// Autogroup of the process, if the kernel has autogroups.
    fn autogroup(&self, pid: u32) -> AnanicyResult<Option<Autogroup>>;
}

/// One tracked thread for a single scan generation.
pub struct ThreadRecord {
    task: TaskId,
    exe: PathBuf,
    cmd: String,
    source: Arc<dyn ProcessSource>,
    stat: Option<TaskStat>,
    stat_name: Option<String>,
    io: Option<IoPriority>,
    oom_score_adj: Option<OomScoreAdj>,
    cmdline: Option<Vec<String>>,
    autogroup: Option<Option<Autogroup>>,
    state: ApplicationState,
}

impl ThreadRecord {
    /// Create a record; nothing is read until asked for.
    pub fn new(task: TaskId, exe: impl Into<PathBuf>, source: Arc<dyn ProcessSource>) -> Self {
        let exe = exe.into();
        let cmd = command_name(&exe);
        Self {
            task,
            exe,
            cmd,
            source,
            stat: None,
            stat_name: None,
            io: None,
            oom_score_adj: None,
            cmdline: None,
            autogroup: None,
            state: ApplicationState::empty(),
        }
    }

    /// The (pid, tid) pair.
    #[must_use]
    pub const fn task(&self) -> TaskId {
        self.task
    }

    /// Resolved executable path.
    #[must_use]
    pub fn exe(&self) -> &Path {
        &self.exe
    }

    /// Final path segment of the executable.
    #[must_use]
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Categories applied during the last [`crate::policy::Enforcer::apply`].
    #[must_use]
    pub const fn state(&self) -> ApplicationState {
        self.state
    }

    /// Whether the kernel still knows this thread.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.source.exists(self.task)
    }

    /// Kernel short name; differs from [`Self::cmd`] when a process renamed itself.
    pub fn stat_name(&mut self) -> AnanicyResult<&str> {
        if self.stat_name.is_none() {
            self.stat_name = Some(self.source.status_name(self.task)?);
        }
        Ok(self.stat_name.as_deref().unwrap_or_default())
    }

    /// Command line arguments.
    pub fn cmdline(&mut self) -> AnanicyResult<&[String]> {
        if self.cmdline.is_none() {
            self.cmdline = Some(self.source.cmdline(self.task)?);
        }
        Ok(self.cmdline.as_deref().unwrap_or_default())
    }

    fn stat(&mut self) -> AnanicyResult<TaskStat> {
        if let Some(stat) = self.stat {
            return Ok(stat);
        }
        let stat = self.source.stat(self.task)?;
        self.stat = Some(stat);
        Ok(stat)
    }

    /// Current niceness.
    pub fn nice(&mut self) -> AnanicyResult<Nice> {
        Ok(self.stat()?.nice)
    }

    /// Current scheduling policy.
    pub fn sched_policy(&mut self) -> AnanicyResult<SchedPolicy> {
        Ok(self.stat()?.policy)
    }

    /// Current realtime priority.
    pub fn rt_priority(&mut self) -> AnanicyResult<Option<RtPrio>> {
        Ok(self.stat()?.rt_priority)
    }

    /// I/O priority exactly as the kernel reports it.
    pub fn io_priority(&mut self) -> AnanicyResult<IoPriority> {
        if let Some(io) = self.io {
            return Ok(io);
        }
        let io = self.source.io_priority(self.task)?;
        self.io = Some(io);
        Ok(io)
    }

    /// I/O priority the thread actually gets.
    ///
    /// Class `none` is served as best-effort at level `(nice + 20) / 5`.
    pub fn effective_io_priority(&mut self) -> AnanicyResult<IoPriority> {
        let io = self.io_priority()?;
        if io.class != IoClass::None {
            return Ok(io);
        }
        let level = IoLevel::new((i64::from(self.nice()?.get()) + 20) / 5)?;
        Ok(IoPriority::new(IoClass::BestEffort, Some(level)))
    }

    /// Current OOM score adjustment.
    pub fn oom_score_adj(&mut self) -> AnanicyResult<OomScoreAdj> {
        if let Some(adj) = self.oom_score_adj {
            return Ok(adj);
        }
        let adj = self.source.oom_score_adj(self.task)?;
        self.oom_score_adj = Some(adj);
        Ok(adj)
    }

    /// Autogroup of the owning process.
    pub fn autogroup(&mut self) -> AnanicyResult<Option<Autogroup>> {
        if let Some(group) = self.autogroup {
            return Ok(group);
        }
        let group = self.source.autogroup(self.task.pid)?;
        self.autogroup = Some(group);
        Ok(group)
    }

    pub(crate) fn set_state(&mut self, state: ApplicationState) {
        self.state = state;
    }

    pub(crate) fn note_nice(&mut self, nice: Nice) {
        if let Some(stat) = self.stat.as_mut() {
            stat.nice = nice;
        }
    }

    pub(crate) fn note_sched(&mut self, policy: SchedPolicy, rt_priority: Option<RtPrio>) {
        if let Some(stat) = self.stat.as_mut() {
            stat.policy = policy;
            stat.rt_priority = rt_priority;
        }
    }

    pub(crate) fn note_io_priority(&mut self, io: IoPriority) {
        self.io = Some(io);
    }

    pub(crate) fn note_oom_score_adj(&mut self, adj: OomScoreAdj) {
        self.oom_score_adj = Some(adj);
    }
}

impl fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("task", &self.task)
            .field("exe", &self.exe)
            .field("cmd", &self.cmd)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn command_name(exe: &Path) -> String {
    exe.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
