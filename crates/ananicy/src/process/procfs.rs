//! procfs-backed [`ProcessSource`].

use std::fs;
use std::path::{Path, PathBuf};

use ananicy_common::{AnanicyError, AnanicyResult, IoPriority, Nice, OomScoreAdj, RtPrio, SchedPolicy};

use super::{Autogroup, ProcessSource, TaskId, TaskStat};
use crate::sys;

/// Reads process attributes from a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    /// Use the procfs mounted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The procfs mount point.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    fn task_dir(&self, task: TaskId) -> PathBuf {
        self.pid_dir(task.pid).join("task").join(task.tid.to_string())
    }

    fn read_task_file(&self, task: TaskId, name: &str) -> AnanicyResult<String> {
        fs::read_to_string(self.task_dir(task).join(name)).map_err(|e| task.vanished_or(e))
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessSource for ProcFs {
    fn pids(&self) -> AnanicyResult<Vec<u32>> {
        numeric_entries(&self.root).map_err(AnanicyError::Io)
    }

    fn exe(&self, pid: u32) -> AnanicyResult<PathBuf> {
        fs::read_link(self.pid_dir(pid).join("exe")).map_err(|e| TaskId::new(pid, pid).vanished_or(e))
    }

    fn tids(&self, pid: u32) -> AnanicyResult<Vec<u32>> {
        numeric_entries(&self.pid_dir(pid).join("task"))
            .map_err(|e| TaskId::new(pid, pid).vanished_or(e))
    }

    fn exists(&self, task: TaskId) -> bool {
        self.task_dir(task).exists()
    }

    fn stat(&self, task: TaskId) -> AnanicyResult<TaskStat> {
        parse_stat(&self.read_task_file(task, "stat")?)
    }

    fn status_name(&self, task: TaskId) -> AnanicyResult<String> {
        Ok(parse_status_name(&self.read_task_file(task, "status")?))
    }

    fn io_priority(&self, task: TaskId) -> AnanicyResult<IoPriority> {
        sys::ioprio_get(task.tid).map_err(|e| task.vanished_or(e))
    }

    fn oom_score_adj(&self, task: TaskId) -> AnanicyResult<OomScoreAdj> {
        let content = self.read_task_file(task, "oom_score_adj")?;
        content.trim().parse().map_err(|_| AnanicyError::Parse {
            what: "oom_score_adj",
            value: content.trim().to_string(),
        })
    }

    fn cmdline(&self, task: TaskId) -> AnanicyResult<Vec<String>> {
        let raw = fs::read(self.task_dir(task).join("cmdline")).map_err(|e| task.vanished_or(e))?;
        Ok(parse_cmdline(&raw))
    }

    fn autogroup(&self, pid: u32) -> AnanicyResult<Option<Autogroup>> {
        match fs::read_to_string(self.pid_dir(pid).join("autogroup")) {
            Ok(content) => Ok(parse_autogroup(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TaskId::new(pid, pid).vanished_or(e)),
        }
    }
}

fn numeric_entries(dir: &Path) -> std::io::Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(|name| name.parse().ok()) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Parse the fields of `stat` that matter for scheduling.
///
/// `comm` may contain spaces and parentheses, so fields are counted from the
/// last `)`. After it come `state` (field 3), ..., `nice` (19),
/// `rt_priority` (40) and `policy` (41).
fn parse_stat(content: &str) -> AnanicyResult<TaskStat> {
    let malformed = || AnanicyError::Parse {
        what: "stat",
        value: content.trim().to_string(),
    };
    let (_, rest) = content.rsplit_once(')').ok_or_else(malformed)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let field = |number: usize| -> AnanicyResult<i64> {
        fields
            .get(number - 3)
            .and_then(|value| value.parse().ok())
            .ok_or_else(malformed)
    };

    let nice = Nice::new(field(19)?)?;
    let policy = SchedPolicy::from_code(i32::try_from(field(41)?).map_err(|_| malformed())?);
    let rt_priority = match field(40)? {
        0 => None,
        prio => Some(RtPrio::new(prio)?),
    };

    Ok(TaskStat {
        nice,
        policy,
        rt_priority,
    })
}

fn parse_status_name(content: &str) -> String {
    content
        .lines()
        .find_map(|line| line.strip_prefix("Name:"))
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    let raw = raw.strip_suffix(b"\0").unwrap_or(raw);
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(|byte| *byte == 0)
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

/// Parse `/autogroup-<id> nice <n>`.
fn parse_autogroup(content: &str) -> Option<Autogroup> {
    let (group, nice) = content.trim().trim_start_matches('/').split_once(" nice ")?;
    let (_, id) = group.split_once('-')?;
    Some(Autogroup {
        id: id.parse().ok()?,
        nice: nice.trim().parse().ok()?,
    })
}
