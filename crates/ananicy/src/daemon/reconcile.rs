//! One reconciliation pass over every live thread.

use std::sync::Arc;

use ananicy_common::AnanicyResult;
use serde::Serialize;

use crate::cgroup::CgroupRegistry;
use crate::config::{RuleCatalog, Verbosity};
use crate::policy::{Actuator, Application, Category, Change, Enforcer};
use crate::process::{ProcessSource, Snapshot, ThreadRecord};
use crate::resolver::RuleResolver;

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Threads in the snapshot.
    pub threads: usize,
    /// Threads a rule matched.
    pub matched: usize,
    /// Matched threads with every category satisfied.
    pub converged: usize,
    /// Matched threads with at least one category unmet.
    pub partial: usize,
    /// Threads that exited mid-tick.
    pub vanished: usize,
    /// Threads skipped because of an unexpected error.
    pub errors: usize,
    /// Corrections applied.
    pub changes: usize,
}

/// Drives snapshot, resolution and enforcement.
pub struct Reconciler {
    catalog: Arc<RuleCatalog>,
    source: Arc<dyn ProcessSource>,
    actuator: Arc<dyn Actuator>,
    cgroups: CgroupRegistry,
    verbosity: Verbosity,
}

impl Reconciler {
    /// Assemble a reconciler from its parts.
    pub fn new(
        catalog: Arc<RuleCatalog>,
        source: Arc<dyn ProcessSource>,
        actuator: Arc<dyn Actuator>,
        cgroups: CgroupRegistry,
        verbosity: Verbosity,
    ) -> Self {
        Self {
            catalog,
            source,
            actuator,
            cgroups,
            verbosity,
        }
    }

    /// The loaded rules.
    #[must_use]
    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// Provisioned cgroups.
    #[must_use]
    pub const fn cgroups(&self) -> &CgroupRegistry {
        &self.cgroups
    }

    /// Capture a snapshot and reconcile it.
    pub fn tick(&self) -> AnanicyResult<TickReport> {
        let mut snapshot = Snapshot::capture(&self.source)?;
        Ok(self.reconcile(&mut snapshot))
    }

    /// Reconcile every thread of `snapshot`. Failures stay with the thread
    /// they happened on.
    pub fn reconcile(&self, snapshot: &mut Snapshot) -> TickReport {
        let resolver = RuleResolver::new(&self.catalog);
        let enforcer = Enforcer::new(&*self.actuator, &self.cgroups);
        let mut report = TickReport {
            threads: snapshot.len(),
            ..TickReport::default()
        };

        for record in snapshot.records_mut() {
            match self.reconcile_thread(&resolver, &enforcer, record) {
                Ok(None) => {}
                Ok(Some(application)) => {
                    report.matched += 1;
                    report.changes += application.changes.len();
                    if application.converged() {
                        report.converged += 1;
                    } else {
                        report.partial += 1;
                    }
                }
                Err(err) if err.is_vanished() => {
                    report.vanished += 1;
                    tracing::debug!(task = %record.task(), cmd = record.cmd(), "Thread vanished");
                }
                Err(err) => {
                    report.errors += 1;
                    tracing::warn!(task = %record.task(), cmd = record.cmd(), error = %err, "Failed to reconcile thread");
                }
            }
        }

        tracing::debug!(
            threads = report.threads,
            matched = report.matched,
            converged = report.converged,
            partial = report.partial,
            vanished = report.vanished,
            errors = report.errors,
            changes = report.changes,
            "Tick complete"
        );
        report
    }

    fn reconcile_thread(
        &self,
        resolver: &RuleResolver<'_>,
        enforcer: &Enforcer<'_>,
        record: &mut ThreadRecord,
    ) -> AnanicyResult<Option<Application>> {
        let Some(rule) = resolver.resolve(record)? else {
            return Ok(None);
        };
        let application = enforcer.apply(record, rule)?;

        for change in &application.changes {
            self.announce(change);
        }
        if !application.failures.is_empty() {
            let errors = application
                .failures
                .iter()
                .map(|failure| format!("{}: {}", failure.category, failure.error))
                .collect::<Vec<_>>()
                .join("; ");
            tracing::warn!(
                task = %record.task(),
                cmd = record.cmd(),
                unmet = %application.unmet(),
                errors = %errors,
                "Rule not fully applied"
            );
        }

        Ok(Some(application))
    }

    fn announce(&self, change: &Change) {
        let verbosity = &self.verbosity;
        let loud = match change.category {
            Category::Nice => verbosity.apply_nice,
            Category::IoClass => verbosity.apply_ioclass || verbosity.apply_ionice,
            Category::Sched => verbosity.apply_sched,
            Category::OomScoreAdj => verbosity.apply_oom_score_adj,
            Category::Cgroup => verbosity.apply_cgroup,
        };
        if loud {
            tracing::info!(category = change.category.name(), "{change}");
        } else {
            tracing::debug!(category = change.category.name(), "{change}");
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("rules", &self.catalog.rule_count())
            .field("cgroups", &self.cgroups)
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}
