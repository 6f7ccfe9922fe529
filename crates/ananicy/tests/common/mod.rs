//! In-memory kernel and cgroup fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ananicy::cgroup::{CgroupMembership, CgroupRegistry};
use ananicy::config::{RuleCatalog, Verbosity};
use ananicy::policy::Actuator;
use ananicy::process::{Autogroup, ProcessSource, TaskId, TaskStat, ThreadRecord};
use ananicy::Reconciler;
use ananicy_common::{
    AnanicyError, AnanicyResult, IoClass, IoLevel, IoPriority, Nice, OomScoreAdj, RtPrio,
    SchedPolicy,
};
use parking_lot::Mutex;

/// A call the daemon made against the fake kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Nice(u32, i8),
    Io(u32, IoClass, Option<u8>),
    Sched(u32, SchedPolicy, Option<u8>),
    Oom(u32, i16),
}

/// Kernel-side state of one thread.
#[derive(Debug, Clone)]
pub struct FakeThread {
    pub task: TaskId,
    pub exe: PathBuf,
    pub name: String,
    pub cmdline: Vec<String>,
    pub nice: Nice,
    pub policy: SchedPolicy,
    pub rtprio: Option<RtPrio>,
    pub io: IoPriority,
    pub oom_score_adj: OomScoreAdj,
    pub autogroup: Option<Autogroup>,
}

impl FakeThread {
    pub fn new(pid: u32, tid: u32, exe: &str) -> Self {
        let name = Path::new(exe)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            task: TaskId::new(pid, tid),
            exe: PathBuf::from(exe),
            cmdline: vec![exe.to_string()],
            name,
            nice: Nice::new(0).unwrap(),
            policy: SchedPolicy::Normal,
            rtprio: None,
            io: IoPriority::new(IoClass::None, None),
            oom_score_adj: OomScoreAdj::new(0).unwrap(),
            autogroup: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn cmdline(mut self, argv: &[&str]) -> Self {
        self.cmdline = argv.iter().map(ToString::to_string).collect();
        self
    }

    pub fn nice(mut self, nice: i64) -> Self {
        self.nice = Nice::new(nice).unwrap();
        self
    }

    pub fn sched(mut self, policy: SchedPolicy, rtprio: Option<i64>) -> Self {
        self.policy = policy;
        self.rtprio = rtprio.map(|prio| RtPrio::new(prio).unwrap());
        self
    }

    pub fn io(mut self, class: IoClass, level: Option<i64>) -> Self {
        self.io = IoPriority::new(class, level.map(|level| IoLevel::new(level).unwrap()));
        self
    }

    pub fn oom_score_adj(mut self, adj: i64) -> Self {
        self.oom_score_adj = OomScoreAdj::new(adj).unwrap();
        self
    }

    pub fn autogroup(mut self, id: u64, nice: i32) -> Self {
        self.autogroup = Some(Autogroup { id, nice });
        self
    }
}

/// Process table plus priority syscalls, all in memory.
#[derive(Debug, Default)]
pub struct FakeKernel {
    threads: Mutex<BTreeMap<u32, FakeThread>>,
    calls: Mutex<Vec<Call>>,
    denied: Mutex<HashSet<&'static str>>,
    cmdline_reads: Mutex<usize>,
}

impl FakeKernel {
    pub fn new(threads: impl IntoIterator<Item = FakeThread>) -> Arc<Self> {
        let kernel = Self::default();
        for thread in threads {
            kernel.spawn(thread);
        }
        Arc::new(kernel)
    }

    pub fn spawn(&self, thread: FakeThread) {
        self.threads.lock().insert(thread.task.tid, thread);
    }

    pub fn kill(&self, tid: u32) {
        self.threads.lock().remove(&tid);
    }

    pub fn thread(&self, tid: u32) -> FakeThread {
        self.threads.lock()[&tid].clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make an actuator operation fail with EPERM: "nice", "io", "sched" or "oom".
    pub fn deny(&self, operation: &'static str) {
        self.denied.lock().insert(operation);
    }

    pub fn cmdline_reads(&self) -> usize {
        *self.cmdline_reads.lock()
    }

    pub fn record(self: &Arc<Self>, tid: u32) -> ThreadRecord {
        let thread = self.thread(tid);
        ThreadRecord::new(thread.task, thread.exe, self.source())
    }

    pub fn source(self: &Arc<Self>) -> Arc<dyn ProcessSource> {
        Arc::clone(self) as Arc<dyn ProcessSource>
    }

    fn read<T>(&self, task: TaskId, f: impl FnOnce(&FakeThread) -> T) -> AnanicyResult<T> {
        self.threads
            .lock()
            .get(&task.tid)
            .map(f)
            .ok_or_else(|| task.vanished())
    }

    fn write(
        &self,
        operation: &'static str,
        task: TaskId,
        call: Call,
        f: impl FnOnce(&mut FakeThread),
    ) -> AnanicyResult<()> {
        let mut threads = self.threads.lock();
        let thread = threads.get_mut(&task.tid).ok_or_else(|| task.vanished())?;
        if self.denied.lock().contains(operation) {
            return Err(AnanicyError::Actuator {
                operation,
                tid: task.tid,
                source: io::Error::from_raw_os_error(libc::EPERM),
            });
        }
        f(thread);
        self.calls.lock().push(call);
        Ok(())
    }
}

impl ProcessSource for FakeKernel {
    fn pids(&self) -> AnanicyResult<Vec<u32>> {
        let mut pids: Vec<u32> = self.threads.lock().values().map(|t| t.task.pid).collect();
        pids.sort_unstable();
        pids.dedup();
        Ok(pids)
    }

    fn exe(&self, pid: u32) -> AnanicyResult<PathBuf> {
        self.threads
            .lock()
            .values()
            .find(|thread| thread.task.pid == pid)
            .map(|thread| thread.exe.clone())
            .ok_or_else(|| TaskId::new(pid, pid).vanished())
    }

    fn tids(&self, pid: u32) -> AnanicyResult<Vec<u32>> {
        Ok(self
            .threads
            .lock()
            .values()
            .filter(|thread| thread.task.pid == pid)
            .map(|thread| thread.task.tid)
            .collect())
    }

    fn exists(&self, task: TaskId) -> bool {
        self.threads.lock().contains_key(&task.tid)
    }

    fn stat(&self, task: TaskId) -> AnanicyResult<TaskStat> {
        self.read(task, |thread| TaskStat {
            nice: thread.nice,
            policy: thread.policy,
            rt_priority: thread.rtprio,
        })
    }

    fn status_name(&self, task: TaskId) -> AnanicyResult<String> {
        self.read(task, |thread| thread.name.clone())
    }

    fn io_priority(&self, task: TaskId) -> AnanicyResult<IoPriority> {
        self.read(task, |thread| thread.io)
    }

    fn oom_score_adj(&self, task: TaskId) -> AnanicyResult<OomScoreAdj> {
        self.read(task, |thread| thread.oom_score_adj)
    }

    fn cmdline(&self, task: TaskId) -> AnanicyResult<Vec<String>> {
        *self.cmdline_reads.lock() += 1;
        self.read(task, |thread| thread.cmdline.clone())
    }

    fn autogroup(&self, pid: u32) -> AnanicyResult<Option<Autogroup>> {
        self.read(TaskId::new(pid, pid), |thread| thread.autogroup)
    }
}

impl Actuator for FakeKernel {
    fn set_nice(&self, task: TaskId, nice: Nice) -> AnanicyResult<()> {
        self.write("nice", task, Call::Nice(task.tid, nice.get()), |thread| {
            thread.nice = nice;
        })
    }

    fn set_io_priority(&self, task: TaskId, class: IoClass, level: Option<IoLevel>) -> AnanicyResult<()> {
        let call = Call::Io(task.tid, class, level.map(IoLevel::get));
        self.write("io", task, call, |thread| {
            thread.io = IoPriority::new(class, level);
        })
    }

    fn set_scheduler(&self, task: TaskId, policy: SchedPolicy, rtprio: Option<RtPrio>) -> AnanicyResult<()> {
        let call = Call::Sched(task.tid, policy, rtprio.map(RtPrio::get));
        self.write("sched", task, call, |thread| {
            thread.policy = SchedPolicy::from_code(policy.code());
            thread.rtprio = rtprio;
        })
    }

    fn set_oom_score_adj(&self, task: TaskId, adj: OomScoreAdj) -> AnanicyResult<()> {
        self.write("oom", task, Call::Oom(task.tid, adj.get()), |thread| {
            thread.oom_score_adj = adj;
        })
    }
}

/// Cgroup whose member set is driven by the test.
#[derive(Debug)]
pub struct FakeCgroup {
    name: String,
    accept: bool,
    members: Mutex<HashSet<u32>>,
    requests: Mutex<Vec<TaskId>>,
}

impl FakeCgroup {
    pub fn new(name: &str, accept: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            accept,
            members: Mutex::default(),
            requests: Mutex::default(),
        })
    }

    /// Publish the requested tasks as members, like the watcher would. A
    /// group that refuses members publishes nothing.
    pub fn publish(&self) {
        if !self.accept {
            return;
        }
        let requests = self.requests.lock();
        self.members.lock().extend(requests.iter().map(|task| task.tid));
    }

    pub fn requests(&self) -> Vec<TaskId> {
        self.requests.lock().clone()
    }
}

impl CgroupMembership for FakeCgroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_member(&self, task: TaskId) -> bool {
        self.members.lock().contains(&task.tid)
    }

    fn add_member(&self, task: TaskId) {
        self.requests.lock().push(task);
    }
}

/// Build a catalog from config lines.
pub fn catalog(cgroups: &[&str], types: &[&str], rules: &[&str]) -> RuleCatalog {
    let mut catalog = RuleCatalog::default();
    for line in cgroups {
        catalog.add_cgroup_line(line).unwrap();
    }
    for line in types {
        catalog.add_type_line(line).unwrap();
    }
    for line in rules {
        catalog.add_rule_line(line).unwrap();
    }
    catalog
}

pub fn registry(groups: &[Arc<FakeCgroup>]) -> CgroupRegistry {
    let mut registry = CgroupRegistry::default();
    for group in groups {
        registry.insert(Arc::clone(group) as Arc<dyn CgroupMembership>);
    }
    registry
}

pub fn reconciler(catalog: RuleCatalog, kernel: &Arc<FakeKernel>, cgroups: CgroupRegistry) -> Reconciler {
    Reconciler::new(
        Arc::new(catalog),
        kernel.source(),
        Arc::clone(kernel) as Arc<dyn Actuator>,
        cgroups,
        Verbosity::default(),
    )
}
