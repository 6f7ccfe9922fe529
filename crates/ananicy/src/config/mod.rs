//! Daemon configuration.
//!
//! `ananicy.conf` holds whitespace separated `key=value` tokens; anything
//! after `#` is a comment.

mod catalog;

use std::path::Path;
use std::time::Duration;

use ananicy_common::{AnanicyError, AnanicyResult};
use serde::Serialize;

pub use catalog::{Attributes, CgroupDefinition, RuleCatalog, RuleDefinition, TypeDefinition};

/// Which events are announced at info level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Verbosity {
    /// Announce each `.cgroups` file as it is loaded.
    pub cgroup_load: bool,
    /// Announce each `.types` file as it is loaded.
    pub type_load: bool,
    /// Announce each `.rules` file as it is loaded.
    pub rule_load: bool,
    /// Announce niceness changes.
    pub apply_nice: bool,
    /// Announce I/O class changes.
    pub apply_ioclass: bool,
    /// Announce I/O level changes.
    pub apply_ionice: bool,
    /// Announce scheduling policy changes.
    pub apply_sched: bool,
    /// Announce OOM score adjustment changes.
    pub apply_oom_score_adj: bool,
    /// Announce cgroup moves.
    pub apply_cgroup: bool,
    /// Check disk I/O schedulers at startup.
    pub check_disks_schedulers: bool,
}

impl Default for Verbosity {
    fn default() -> Self {
        Self {
            cgroup_load: true,
            type_load: true,
            rule_load: true,
            apply_nice: true,
            apply_ioclass: true,
            apply_ionice: true,
            apply_sched: true,
            apply_oom_score_adj: true,
            apply_cgroup: true,
            check_disks_schedulers: true,
        }
    }
}

impl Verbosity {
    /// Announce nothing.
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            cgroup_load: false,
            type_load: false,
            rule_load: false,
            apply_nice: false,
            apply_ioclass: false,
            apply_ionice: false,
            apply_sched: false,
            apply_oom_score_adj: false,
            apply_cgroup: false,
            check_disks_schedulers: false,
        }
    }

    fn switch(&mut self, key: &str) -> Option<&mut bool> {
        Some(match key {
            "cgroup_load" => &mut self.cgroup_load,
            "type_load" => &mut self.type_load,
            "rule_load" => &mut self.rule_load,
            "apply_nice" => &mut self.apply_nice,
            "apply_ioclass" => &mut self.apply_ioclass,
            "apply_ionice" => &mut self.apply_ionice,
            "apply_sched" => &mut self.apply_sched,
            "apply_oom_score_adj" => &mut self.apply_oom_score_adj,
            "apply_cgroup" => &mut self.apply_cgroup,
            "check_disks_schedulers" => &mut self.check_disks_schedulers,
            _ => return None,
        })
    }
}

/// Settings from `ananicy.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Time between reconciliation ticks.
    pub check_freq: Duration,
    /// Announcement switches.
    pub verbosity: Verbosity,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            check_freq: Duration::from_secs(5),
            verbosity: Verbosity::default(),
        }
    }
}

impl DaemonConfig {
    /// Load `ananicy.conf`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> AnanicyResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file missing, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse the contents of `ananicy.conf`.
    pub fn parse(content: &str) -> AnanicyResult<Self> {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default();
            for token in line.split_whitespace() {
                let Some((key, value)) = token.split_once('=') else {
                    continue;
                };
                let value = value.trim_matches('"');

                if key == "check_freq" {
                    config.check_freq = parse_check_freq(value)?;
                } else if let Some(switch) = config.verbosity.switch(key) {
                    *switch = parse_bool(value);
                } else {
                    tracing::debug!(key, "Ignoring unknown config key");
                }
            }
        }

        Ok(config)
    }
}

fn parse_check_freq(value: &str) -> AnanicyResult<Duration> {
    let invalid = || AnanicyError::config(format!("check_freq must be a positive number of seconds, got {value}"));
    let secs: f64 = value.parse().map_err(|_| invalid())?;
    match Duration::try_from_secs_f64(secs) {
        Ok(freq) if !freq.is_zero() => Ok(freq),
        _ => Err(invalid()),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "1")
}
