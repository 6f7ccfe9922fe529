//! CPU-bandwidth cgroups.
//!
//! Supports the legacy v1 `cpu` hierarchy and the unified v2 hierarchy.
//! Hybrid hosts use v1.

mod controller;
mod watcher;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ananicy_common::{AnanicyError, AnanicyResult};
use serde::Serialize;

use crate::config::CgroupDefinition;
use crate::process::TaskId;

pub use controller::CgroupController;
pub use watcher::{MemberSet, MembershipWatcher};

/// How often watchers look at the membership file.
pub const DEFAULT_POLL: Duration = Duration::from_secs(1);

/// Number of CPUs quotas are scaled by.
#[must_use]
pub fn host_cores() -> u64 {
    std::thread::available_parallelism()
        .ok()
        .and_then(|n| u64::try_from(n.get()).ok())
        .unwrap_or(1)
}

/// Derived CPU bandwidth values for a quota percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuQuota {
    /// Accounting period in microseconds.
    pub period_us: u64,
    /// Runtime allowed per period, across all CPUs.
    pub quota_us: u64,
    /// Relative weight in v1 `cpu.shares` units.
    pub cpu_shares: u64,
}

impl CpuQuota {
    /// Fixed accounting period.
    pub const PERIOD_US: u64 = 100_000;

    /// Quota for `percent` of `cores` CPUs.
    #[must_use]
    pub fn new(percent: u8, cores: u64) -> Self {
        let percent = u64::from(percent);
        Self {
            period_us: Self::PERIOD_US,
            quota_us: Self::PERIOD_US * cores * percent / 100,
            cpu_shares: 1024 * percent / 100,
        }
    }

    /// `cpu.weight` equivalent of [`Self::cpu_shares`].
    #[must_use]
    pub const fn cpu_weight(&self) -> u64 {
        1 + (self.cpu_shares.saturating_sub(2) * 9999) / 262_142
    }

    /// `cpu.max` contents.
    #[must_use]
    pub fn cpu_max(&self) -> String {
        format!("{} {}", self.quota_us, self.period_us)
    }
}

/// Cgroup hierarchy flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupLayout {
    /// Per-controller hierarchies; groups live under `<root>/cpu`.
    V1,
    /// Unified hierarchy; groups live directly under `<root>`.
    V2,
}

impl CgroupLayout {
    /// Detect the layout mounted at `root`.
    pub fn detect(root: &Path, name: &str) -> AnanicyResult<Self> {
        if root.join("cpu").is_dir() {
            return Ok(Self::V1);
        }

        let setup_error = |reason: String| AnanicyError::CgroupSetup {
            name: name.to_string(),
            reason,
        };
        let controllers_file = root.join("cgroup.controllers");
        let controllers = fs::read_to_string(&controllers_file).map_err(|_| {
            setup_error(format!("{} is not a mounted cgroup filesystem", root.display()))
        })?;

        if controllers.split_whitespace().any(|controller| controller == "cpu") {
            Ok(Self::V2)
        } else {
            Err(setup_error(format!(
                "cpu controller missing from {}",
                controllers_file.display()
            )))
        }
    }

    /// Directory of the group called `name`.
    #[must_use]
    pub fn group_dir(self, root: &Path, name: &str) -> PathBuf {
        match self {
            Self::V1 => root.join("cpu").join(name),
            Self::V2 => root.join(name),
        }
    }

    /// File listing the group's members.
    #[must_use]
    pub const fn members_file(self) -> &'static str {
        match self {
            Self::V1 => "tasks",
            Self::V2 => "cgroup.procs",
        }
    }

    /// Id written to and read from [`Self::members_file`].
    #[must_use]
    pub const fn member_id(self, task: TaskId) -> u32 {
        match self {
            Self::V1 => task.tid,
            Self::V2 => task.pid,
        }
    }

    fn write_quota(self, dir: &Path, quota: &CpuQuota) -> io::Result<()> {
        match self {
            Self::V1 => {
                fs::write(dir.join("cpu.cfs_period_us"), quota.period_us.to_string())?;
                fs::write(dir.join("cpu.cfs_quota_us"), quota.quota_us.to_string())?;
                fs::write(dir.join("cpu.shares"), quota.cpu_shares.to_string())?;
            }
            Self::V2 => {
                fs::write(dir.join("cpu.max"), quota.cpu_max())?;
                fs::write(dir.join("cpu.weight"), quota.cpu_weight().to_string())?;
            }
        }
        Ok(())
    }
}

/// Membership view of one cgroup.
pub trait CgroupMembership: Send + Sync {
    /// Cgroup name.
    fn name(&self) -> &str;

    /// Whether the task is in the last published member set.
    fn is_member(&self, task: TaskId) -> bool;

    /// Ask the kernel to move the task into the group. Failures are
    /// swallowed; membership shows up in the next published set.
    fn add_member(&self, task: TaskId);
}

/// Cgroups that were provisioned successfully, by name.
#[derive(Default, Clone)]
pub struct CgroupRegistry {
    groups: HashMap<String, Arc<dyn CgroupMembership>>,
}

impl CgroupRegistry {
    /// Provision every definition. Failures are logged and the cgroup is
    /// left out, so rules referring to it leave CGROUP unmet.
    pub fn provision<'a>(
        root: &Path,
        definitions: impl IntoIterator<Item = CgroupDefinition<'a>>,
        cores: u64,
        poll: Duration,
    ) -> Self {
        let mut registry = Self::default();
        for definition in definitions {
            match CgroupController::provision(root, definition, cores, poll) {
                Ok(controller) => registry.insert(Arc::new(controller)),
                Err(err) => {
                    tracing::warn!(cgroup = definition.name, error = %err, "Cgroup setup failed");
                }
            }
        }
        registry
    }

    /// Register a cgroup under its name.
    pub fn insert(&mut self, group: Arc<dyn CgroupMembership>) {
        self.groups.insert(group.name().to_string(), group);
    }

    /// Look up a cgroup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn CgroupMembership>> {
        self.groups.get(name)
    }

    /// Number of cgroups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no cgroup is available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl std::fmt::Debug for CgroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.groups.keys()).finish()
    }
}
