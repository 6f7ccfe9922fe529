//! Per-category convergence of a thread toward its rule.
//!
//! Each category is compared against the thread's current value first, so a
//! thread that already matches costs no [`Actuator`] calls.

mod syscall;

use std::fmt;

use ananicy_common::{
    AnanicyError, AnanicyResult, IoClass, IoLevel, IoPriority, Nice, OomScoreAdj, RtPrio,
    SchedPolicy,
};
use serde::Serialize;

use crate::cgroup::CgroupRegistry;
use crate::config::{Attributes, RuleDefinition};
use crate::process::{ApplicationState, TaskId, ThreadRecord};

pub use syscall::SyscallActuator;

/// Kernel calls that change a thread's priorities.
///
/// Implementations report a thread that is gone as
/// [`AnanicyError::ProcessVanished`].
pub trait Actuator: Send + Sync {
    /// Set CPU niceness.
    fn set_nice(&self, task: TaskId, nice: Nice) -> AnanicyResult<()>;

    /// Set I/O class and level.
    fn set_io_priority(&self, task: TaskId, class: IoClass, level: Option<IoLevel>) -> AnanicyResult<()>;

    /// Set scheduling policy; `rtprio` is `None` for non-realtime policies.
    fn set_scheduler(&self, task: TaskId, policy: SchedPolicy, rtprio: Option<RtPrio>) -> AnanicyResult<()>;

    /// Set OOM score adjustment.
    fn set_oom_score_adj(&self, task: TaskId, adj: OomScoreAdj) -> AnanicyResult<()>;
}

/// Attribute category of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// CPU niceness.
    Nice,
    /// I/O class and level.
    IoClass,
    /// Scheduling policy and realtime priority.
    Sched,
    /// OOM score adjustment.
    OomScoreAdj,
    /// Cgroup membership.
    Cgroup,
}

impl Category {
    /// State bit for this category.
    #[must_use]
    pub const fn flag(self) -> ApplicationState {
        match self {
            Self::Nice => ApplicationState::NICE,
            Self::IoClass => ApplicationState::IOCLASS,
            Self::Sched => ApplicationState::SCHED,
            Self::OomScoreAdj => ApplicationState::OOM_SCORE_ADJ,
            Self::Cgroup => ApplicationState::CGROUP,
        }
    }

    /// Config attribute name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nice => "nice",
            Self::IoClass => "ioclass",
            Self::Sched => "sched",
            Self::OomScoreAdj => "oom_score_adj",
            Self::Cgroup => "cgroup",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One applied correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    /// What was changed.
    pub category: Category,
    /// Thread that was changed.
    pub task: TaskId,
    /// Its command name.
    pub cmd: String,
    /// Value before, when known.
    pub from: Option<String>,
    /// Value applied.
    pub to: String,
}

impl Change {
    fn new(category: Category, record: &ThreadRecord, from: Option<String>, to: String) -> Self {
        Self {
            category,
            task: record.task(),
            cmd: record.cmd().to_string(),
            from,
            to,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {}: ", self.cmd, self.task, self.category)?;
        if let Some(from) = &self.from {
            write!(f, "{from} -> ")?;
        }
        f.write_str(&self.to)
    }
}

/// A category that could not be converged this tick.
#[derive(Debug)]
pub struct CategoryFailure {
    /// The category left unmet.
    pub category: Category,
    /// Why.
    pub error: AnanicyError,
}

/// Result of applying a rule to one thread.
#[derive(Debug, Default)]
pub struct Application {
    /// Categories that are satisfied, absent ones included.
    pub state: ApplicationState,
    /// Corrections made.
    pub changes: Vec<Change>,
    /// Categories that failed.
    pub failures: Vec<CategoryFailure>,
}

impl Application {
    /// Categories still unmet.
    #[must_use]
    pub fn unmet(&self) -> ApplicationState {
        ApplicationState::ALLSET.difference(self.state)
    }

    /// Whether every category is satisfied.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.state == ApplicationState::ALLSET
    }

    /// Fold one category's outcome in. A vanished thread aborts the whole
    /// application; other errors only leave the category unmet.
    fn settle(&mut self, category: Category, outcome: AnanicyResult<Option<Change>>) -> AnanicyResult<()> {
        match outcome {
            Ok(change) => {
                self.state |= category.flag();
                self.changes.extend(change);
                Ok(())
            }
            Err(err) if err.is_vanished() => Err(err),
            Err(error) => {
                self.failures.push(CategoryFailure { category, error });
                Ok(())
            }
        }
    }
}

/// Applies rules through an [`Actuator`] and a [`CgroupRegistry`].
#[derive(Clone, Copy)]
pub struct Enforcer<'a> {
    actuator: &'a dyn Actuator,
    cgroups: &'a CgroupRegistry,
}

impl<'a> Enforcer<'a> {
    /// Create an enforcer.
    #[must_use]
    pub const fn new(actuator: &'a dyn Actuator, cgroups: &'a CgroupRegistry) -> Self {
        Self { actuator, cgroups }
    }

    /// Converge `record` toward `rule`, one category at a time.
    ///
    /// Returns [`AnanicyError::ProcessVanished`] if the thread disappears;
    /// every other failure is recorded in the returned [`Application`].
    pub fn apply(&self, record: &mut ThreadRecord, rule: &RuleDefinition) -> AnanicyResult<Application> {
        let attributes = &rule.attributes;
        let mut application = Application::default();

        let outcome = self.apply_nice(record, attributes);
        application.settle(Category::Nice, outcome)?;

        let outcome = self.apply_io(record, attributes);
        application.settle(Category::IoClass, outcome)?;

        let outcome = self.apply_sched(record, attributes);
        application.settle(Category::Sched, outcome)?;

        let outcome = self.apply_oom_score_adj(record, attributes);
        application.settle(Category::OomScoreAdj, outcome)?;

        let outcome = self.apply_cgroup(record, attributes);
        application.settle(Category::Cgroup, outcome)?;

        record.set_state(application.state);
        Ok(application)
    }

    fn apply_nice(&self, record: &mut ThreadRecord, attributes: &Attributes) -> AnanicyResult<Option<Change>> {
        let Some(desired) = attributes.nice else {
            return Ok(None);
        };
        let current = record.nice()?;
        if current == desired {
            return Ok(None);
        }

        self.actuator.set_nice(record.task(), desired)?;
        record.note_nice(desired);
        Ok(Some(Change::new(
            Category::Nice,
            record,
            Some(current.to_string()),
            desired.to_string(),
        )))
    }

    fn apply_io(&self, record: &mut ThreadRecord, attributes: &Attributes) -> AnanicyResult<Option<Change>> {
        if attributes.ioclass.is_none() && attributes.ionice.is_none() {
            return Ok(None);
        }

        let effective = record.effective_io_priority()?;
        let class = attributes.ioclass.unwrap_or(effective.class);
        // Only an explicit request for class `none` compares against the raw value.
        let current = if class == IoClass::None {
            record.io_priority()?
        } else {
            effective
        };
        let level = class
            .has_level()
            .then(|| attributes.ionice.or(current.level).unwrap_or(IoLevel::DEFAULT));

        let desired = IoPriority::new(class, level);
        if desired == current {
            return Ok(None);
        }

        self.actuator.set_io_priority(record.task(), desired.class, desired.level)?;
        record.note_io_priority(desired);
        Ok(Some(Change::new(
            Category::IoClass,
            record,
            Some(current.to_string()),
            desired.to_string(),
        )))
    }

    fn apply_sched(&self, record: &mut ThreadRecord, attributes: &Attributes) -> AnanicyResult<Option<Change>> {
        let Some(policy) = attributes.sched else {
            return Ok(None);
        };
        let current = record.sched_policy()?;
        let current_prio = record.rt_priority()?;
        let desired_prio = policy
            .is_realtime()
            .then(|| attributes.rtprio.unwrap_or(RtPrio::LOWEST));

        let prio_matches =
            !policy.is_realtime() || attributes.rtprio.is_none() || current_prio == desired_prio;
        if current.is_equivalent(policy) && prio_matches {
            return Ok(None);
        }

        self.actuator.set_scheduler(record.task(), policy, desired_prio)?;
        record.note_sched(policy, desired_prio);
        Ok(Some(Change::new(
            Category::Sched,
            record,
            Some(describe_sched(current, current_prio)),
            describe_sched(policy, desired_prio),
        )))
    }

    fn apply_oom_score_adj(
        &self,
        record: &mut ThreadRecord,
        attributes: &Attributes,
    ) -> AnanicyResult<Option<Change>> {
        let Some(desired) = attributes.oom_score_adj else {
            return Ok(None);
        };
        let current = record.oom_score_adj()?;
        if current == desired {
            return Ok(None);
        }

        self.actuator.set_oom_score_adj(record.task(), desired)?;
        record.note_oom_score_adj(desired);
        Ok(Some(Change::new(
            Category::OomScoreAdj,
            record,
            Some(current.to_string()),
            desired.to_string(),
        )))
    }

    fn apply_cgroup(&self, record: &ThreadRecord, attributes: &Attributes) -> AnanicyResult<Option<Change>> {
        let Some(name) = attributes.cgroup.as_deref() else {
            return Ok(None);
        };
        let group = self.cgroups.get(name).ok_or_else(|| AnanicyError::CgroupSetup {
            name: name.to_string(),
            reason: "not provisioned".to_string(),
        })?;

        let task = record.task();
        if group.is_member(task) {
            return Ok(None);
        }
        group.add_member(task);

        Ok(Some(Change::new(Category::Cgroup, record, None, name.to_string())))
    }
}

fn describe_sched(policy: SchedPolicy, rtprio: Option<RtPrio>) -> String {
    match rtprio {
        Some(prio) => format!("{policy} (rtprio {prio})"),
        None => policy.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmet_is_complement() {
        let application = Application {
            state: ApplicationState::NICE | ApplicationState::SCHED,
            ..Application::default()
        };
        assert_eq!(
            application.unmet(),
            ApplicationState::IOCLASS | ApplicationState::OOM_SCORE_ADJ | ApplicationState::CGROUP
        );
        assert!(!application.converged());
    }

    #[test]
    fn settle_contains_non_vanished_errors() {
        let mut application = Application::default();
        application
            .settle(Category::Nice, Err(AnanicyError::config("denied")))
            .unwrap();
        assert_eq!(application.failures.len(), 1);
        assert!(!application.state.contains(ApplicationState::NICE));

        let err = application
            .settle(Category::Sched, Err(TaskId::new(1, 2).vanished()))
            .unwrap_err();
        assert!(err.is_vanished());
    }

    #[test]
    fn change_display() {
        let change = Change {
            category: Category::Nice,
            task: TaskId::new(10, 11),
            cmd: "make".to_string(),
            from: Some("0".to_string()),
            to: "19".to_string(),
        };
        assert_eq!(change.to_string(), "make[10/11] nice: 0 -> 19");
    }

    #[test]
    fn sched_description() {
        assert_eq!(describe_sched(SchedPolicy::Batch, None), "batch");
        assert_eq!(
            describe_sched(SchedPolicy::Fifo, Some(RtPrio::new(5).unwrap())),
            "fifo (rtprio 5)"
        );
    }
}
