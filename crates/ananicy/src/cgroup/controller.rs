//! Provisioned cgroup with a mirrored member set.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ananicy_common::{AnanicyError, AnanicyResult};

use super::watcher::{self, MemberSet};
use super::{CgroupLayout, CgroupMembership, CpuQuota, MembershipWatcher};
use crate::config::CgroupDefinition;
use crate::process::TaskId;

/// A CPU-limited cgroup owned by the daemon.
#[derive(Debug)]
pub struct CgroupController {
    name: String,
    layout: CgroupLayout,
    path: PathBuf,
    quota: CpuQuota,
    members: MemberSet,
    _watcher: MembershipWatcher,
}

impl CgroupController {
    /// Create the group under `root`, write its quota and start mirroring its
    /// members.
    pub fn provision(
        root: &Path,
        definition: CgroupDefinition<'_>,
        cores: u64,
        poll: Duration,
    ) -> AnanicyResult<Self> {
        let name = definition.name;
        let setup_error = |action: &str, err: std::io::Error| AnanicyError::CgroupSetup {
            name: name.to_string(),
            reason: format!("{action}: {err}"),
        };

        let layout = CgroupLayout::detect(root, name)?;
        if layout == CgroupLayout::V2 {
            enable_cpu_controller(root);
        }

        let path = layout.group_dir(root, name);
        tracing::debug!(cgroup = name, path = %path.display(), ?layout, "Creating cgroup");
        fs::create_dir_all(&path).map_err(|e| setup_error("create group", e))?;

        let quota = definition.quota(cores);
        layout
            .write_quota(&path, &quota)
            .map_err(|e| setup_error("write quota", e))?;
        tracing::debug!(
            cgroup = name,
            quota_us = quota.quota_us,
            period_us = quota.period_us,
            cpu_shares = quota.cpu_shares,
            "Set CPU quota"
        );

        let members_file = path.join(layout.members_file());
        let members = MemberSet::default();
        if let Ok(initial) = watcher::read_members(&members_file) {
            *members.write() = initial;
        }
        let watcher = MembershipWatcher::spawn(name, members_file, MemberSet::clone(&members), poll)
            .map_err(|e| setup_error("start watcher", e))?;

        Ok(Self {
            name: name.to_string(),
            layout,
            path,
            quota,
            members,
            _watcher: watcher,
        })
    }

    /// Group directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hierarchy flavour in use.
    #[must_use]
    pub const fn layout(&self) -> CgroupLayout {
        self.layout
    }

    /// Values written at provisioning.
    #[must_use]
    pub const fn quota(&self) -> CpuQuota {
        self.quota
    }
}

impl CgroupMembership for CgroupController {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_member(&self, task: TaskId) -> bool {
        self.members.read().contains(&self.layout.member_id(task))
    }

    fn add_member(&self, task: TaskId) {
        let id = self.layout.member_id(task);
        if let Err(err) = fs::write(self.path.join(self.layout.members_file()), id.to_string()) {
            tracing::debug!(cgroup = %self.name, id, error = %err, "Failed to add cgroup member");
        }
    }
}

/// Delegate the cpu controller to child groups. Already enabled or not
/// permitted is left for the quota write to report.
fn enable_cpu_controller(root: &Path) {
    if let Err(err) = fs::write(root.join("cgroup.subtree_control"), "+cpu") {
        tracing::debug!(root = %root.display(), error = %err, "Could not enable cpu controller");
    }
}
