//! Validated scheduling and priority values.
//!
//! Every type here checks the range the kernel accepts when it is built, so
//! a value that made it into a rule can always be handed to the kernel:
//! - nice: -20..19
//! - ionice level: 0..7
//! - realtime priority: 1..99
//! - OOM score adjustment: -1000..1000

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AnanicyError, AnanicyResult};

macro_rules! ranged_value {
    ($(#[$meta:meta])* $name:ident($repr:ty), $field:literal, $min:expr, $max:expr, $expected:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub struct $name($repr);

        impl $name {
            /// Smallest accepted value.
            pub const MIN: $repr = $min;
            /// Largest accepted value.
            pub const MAX: $repr = $max;

            /// Validate and wrap a value.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            pub fn new(value: i64) -> AnanicyResult<Self> {
                if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
                    Ok(Self(value as $repr))
                } else {
                    Err(AnanicyError::OutOfRange {
                        field: $field,
                        value: value.to_string(),
                        expected: $expected,
                    })
                }
            }

            /// The raw value.
            #[must_use]
            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = AnanicyError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                Self::from(value.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = AnanicyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value: i64 = s.trim().parse().map_err(|_| AnanicyError::InvalidValue {
                    field: $field,
                    value: s.to_string(),
                })?;
                Self::new(value)
            }
        }
    };
}

ranged_value!(
    /// CPU niceness (-20 highest priority, 19 lowest).
    Nice(i8), "nice", -20, 19, "-20..19"
);

ranged_value!(
    /// Level within the realtime and best-effort I/O classes (0 highest).
    IoLevel(u8), "ionice", 0, 7, "0..7"
);

ranged_value!(
    /// Static priority for the fifo and rr scheduling policies.
    RtPrio(u8), "rtprio", 1, 99, "1..99"
);

ranged_value!(
    /// Bias applied to the OOM killer's badness score.
    OomScoreAdj(i16), "oom_score_adj", -1000, 1000, "-1000..1000"
);

impl IoLevel {
    /// Level the kernel and `ionice` use when none is given.
    pub const DEFAULT: Self = Self(4);
}

impl RtPrio {
    /// Priority used for fifo/rr when the rule does not name one.
    pub const LOWEST: Self = Self(1);
}

/// I/O scheduling class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IoClass {
    /// No class set; the kernel derives best-effort from the nice value.
    None,
    /// Realtime class.
    Realtime,
    /// Best-effort class.
    BestEffort,
    /// Idle class, only served when the disk is otherwise idle.
    Idle,
}

impl IoClass {
    /// Kernel class number (`IOPRIO_CLASS_*`).
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Realtime => 1,
            Self::BestEffort => 2,
            Self::Idle => 3,
        }
    }

    /// Map a kernel class number back to a class.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Realtime),
            2 => Some(Self::BestEffort),
            3 => Some(Self::Idle),
            _ => None,
        }
    }

    /// Whether this class carries a 0..7 level.
    #[must_use]
    pub const fn has_level(self) -> bool {
        matches!(self, Self::Realtime | Self::BestEffort)
    }

    /// Name as printed by `ionice`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Realtime => "realtime",
            Self::BestEffort => "best-effort",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for IoClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IoClass {
    type Err = AnanicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Self::None),
            "realtime" | "rt" | "1" => Ok(Self::Realtime),
            "best-effort" | "besteffort" | "be" | "2" => Ok(Self::BestEffort),
            "idle" | "3" => Ok(Self::Idle),
            _ => Err(AnanicyError::InvalidValue {
                field: "ioclass",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for IoClass {
    type Error = AnanicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IoClass> for String {
    fn from(value: IoClass) -> Self {
        value.name().to_string()
    }
}

/// I/O class plus level, as reported by `ioprio_get(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoPriority {
    /// Scheduling class.
    pub class: IoClass,
    /// Level; `None` for the idle class.
    pub level: Option<IoLevel>,
}

impl IoPriority {
    /// Build a priority, dropping the level for classes that have none.
    #[must_use]
    pub const fn new(class: IoClass, level: Option<IoLevel>) -> Self {
        let level = if class.has_level() { level } else { None };
        Self { class, level }
    }
}

impl fmt::Display for IoPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Some(level) => write!(f, "{}: prio {}", self.class, level),
            None => write!(f, "{}", self.class),
        }
    }
}

/// CPU scheduling policy.
///
/// `Other` is the POSIX spelling of `Normal` and maps to the same kernel
/// policy. `Unknown` carries a policy number this build does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SchedPolicy {
    /// `SCHED_NORMAL`.
    Normal,
    /// `SCHED_FIFO`.
    Fifo,
    /// `SCHED_RR`.
    Rr,
    /// `SCHED_BATCH`.
    Batch,
    /// `SCHED_ISO` (out-of-tree kernels only).
    Iso,
    /// `SCHED_IDLE`.
    Idle,
    /// `SCHED_DEADLINE`.
    Deadline,
    /// `SCHED_OTHER`, alias of `Normal`.
    Other,
    /// A policy number outside the known set.
    Unknown(i32),
}

impl SchedPolicy {
    /// Map a kernel policy number to a policy.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Normal,
            1 => Self::Fifo,
            2 => Self::Rr,
            3 => Self::Batch,
            4 => Self::Iso,
            5 => Self::Idle,
            6 => Self::Deadline,
            other => Self::Unknown(other),
        }
    }

    /// Kernel policy number.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Normal | Self::Other => 0,
            Self::Fifo => 1,
            Self::Rr => 2,
            Self::Batch => 3,
            Self::Iso => 4,
            Self::Idle => 5,
            Self::Deadline => 6,
            Self::Unknown(code) => code,
        }
    }

    /// Whether the policy needs a realtime priority.
    #[must_use]
    pub const fn is_realtime(self) -> bool {
        matches!(self, Self::Fifo | Self::Rr)
    }

    /// Whether a rule may request this policy through `sched_setscheduler(2)`.
    #[must_use]
    pub const fn is_settable(self) -> bool {
        !matches!(self, Self::Deadline | Self::Unknown(_))
    }

    /// Compare two policies, treating `Other` and `Normal` as the same.
    #[must_use]
    pub const fn is_equivalent(self, other: Self) -> bool {
        self.code() == other.code()
    }
}

impl fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Fifo => f.write_str("fifo"),
            Self::Rr => f.write_str("rr"),
            Self::Batch => f.write_str("batch"),
            Self::Iso => f.write_str("iso"),
            Self::Idle => f.write_str("idle"),
            Self::Deadline => f.write_str("deadline"),
            Self::Other => f.write_str("other"),
            Self::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

impl FromStr for SchedPolicy {
    type Err = AnanicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "other" => Ok(Self::Other),
            "fifo" => Ok(Self::Fifo),
            "rr" => Ok(Self::Rr),
            "batch" => Ok(Self::Batch),
            "iso" => Ok(Self::Iso),
            "idle" => Ok(Self::Idle),
            "deadline" => Ok(Self::Deadline),
            _ => Err(AnanicyError::InvalidValue {
                field: "sched",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for SchedPolicy {
    type Error = AnanicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchedPolicy> for String {
    fn from(value: SchedPolicy) -> Self {
        value.to_string()
    }
}
