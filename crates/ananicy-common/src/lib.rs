//! # ananicy-common
//!
//! Shared types for the ananicy daemon:
//! - Validated priority values (nice, ionice, scheduler policy, rtprio, OOM score)
//! - Standard filesystem paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod paths;
pub mod priority;

pub use error::{AnanicyError, AnanicyResult};
pub use paths::AnanicyPaths;
pub use priority::{IoClass, IoLevel, IoPriority, Nice, OomScoreAdj, RtPrio, SchedPolicy};
