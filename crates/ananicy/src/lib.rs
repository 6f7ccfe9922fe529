//! # Ananicy
//!
//! Auto nice daemon. Every few seconds it scans the process table, matches
//! each thread against a rule set and converges the thread's priorities to
//! what its rule declares:
//!
//! - **nice**: CPU niceness
//! - **ioclass / ionice**: I/O scheduling class and level
//! - **sched / rtprio**: CPU scheduling policy and realtime priority
//! - **oom_score_adj**: OOM killer bias
//! - **cgroup**: membership of a CPU-limited cgroup
//!
//! ## Usage
//!
//! ```no_run
//! use ananicy::daemon::Daemon;
//! use ananicy_common::AnanicyPaths;
//!
//! # async fn example() -> ananicy_common::AnanicyResult<()> {
//! let daemon = Daemon::init(&AnanicyPaths::new())?;
//! daemon.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cgroup;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod policy;
pub mod process;
pub mod resolver;
mod sys;

pub use daemon::{Daemon, Reconciler, TickReport};
