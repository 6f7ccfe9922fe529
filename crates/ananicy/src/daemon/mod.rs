//! The long-running daemon.

pub mod disks;
pub mod notify;
mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use ananicy_common::{AnanicyPaths, AnanicyResult};
use tokio::signal::unix::{SignalKind, signal};

use crate::cgroup::{self, CgroupRegistry};
use crate::config::{DaemonConfig, RuleCatalog};
use crate::policy::SyscallActuator;
use crate::process::{ProcFs, ProcessSource};

pub use reconcile::{Reconciler, TickReport};

/// Loaded configuration plus provisioned cgroups, ready to run.
#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    reconciler: Arc<Reconciler>,
}

impl Daemon {
    /// Load configuration and rules, check disks and provision cgroups.
    ///
    /// Any configuration error is returned; a cgroup that cannot be
    /// provisioned is only logged.
    pub fn init(paths: &AnanicyPaths) -> AnanicyResult<Self> {
        let config = DaemonConfig::load(&paths.config_file())?;
        let catalog = RuleCatalog::load(&paths.config_dir, &config.verbosity)?;

        if config.verbosity.check_disks_schedulers {
            disks::warn_incompatible(&paths.block_root);
        }

        let cgroups = CgroupRegistry::provision(
            &paths.cgroup_root,
            catalog.cgroups(),
            cgroup::host_cores(),
            cgroup::DEFAULT_POLL,
        );

        tracing::info!(
            rules = catalog.rule_count(),
            types = catalog.types().count(),
            cgroups = cgroups.len(),
            check_freq = ?config.check_freq,
            "Daemon initialized"
        );

        let source: Arc<dyn ProcessSource> = Arc::new(ProcFs::new(&paths.proc_root));
        let actuator = Arc::new(SyscallActuator::new(&paths.proc_root));
        let reconciler = Reconciler::new(
            Arc::new(catalog),
            source,
            actuator,
            cgroups,
            config.verbosity,
        );

        Ok(Self {
            config,
            reconciler: Arc::new(reconciler),
        })
    }

    /// Time between ticks.
    #[must_use]
    pub const fn check_freq(&self) -> Duration {
        self.config.check_freq
    }

    /// Reconcile every `check_freq` until SIGINT or SIGTERM.
    pub async fn run(self) -> AnanicyResult<()> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        notify::notify("READY=1");

        loop {
            let reconciler = Arc::clone(&self.reconciler);
            match tokio::task::spawn_blocking(move || reconciler.tick()).await {
                Ok(Ok(_report)) => {}
                Ok(Err(err)) => tracing::error!(error = %err, "Tick failed"),
                Err(err) => tracing::error!(error = %err, "Tick task panicked"),
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.check_freq) => {}
                _ = interrupt.recv() => {
                    tracing::info!("Received SIGINT, shutting down");
                    break;
                }
                _ = terminate.recv() => {
                    tracing::info!("Received SIGTERM, shutting down");
                    break;
                }
            }
        }

        notify::notify("STOPPING=1");
        drop(self);
        tracing::info!("Daemon stopped");
        Ok(())
    }
}
