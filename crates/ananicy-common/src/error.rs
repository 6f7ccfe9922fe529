//! Common error types for the ananicy daemon.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`AnanicyError`].
pub type AnanicyResult<T> = Result<T, AnanicyError>;

/// Errors raised while loading configuration or reconciling processes.
#[derive(Error, Diagnostic, Debug)]
pub enum AnanicyError {
    /// Configuration error not tied to a specific line.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(ananicy::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// A configuration line could not be loaded.
    #[error("File: {}, Line: {line}, Error: {message}", path.display())]
    #[diagnostic(
        code(ananicy::config::line),
        help("Each non-comment line must be a single JSON object")
    )]
    ConfigLine {
        /// File the line came from.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// The error message.
        message: String,
    },

    /// A value is outside the range the kernel accepts.
    #[error("{field} must be in range {expected}, got {value}")]
    #[diagnostic(code(ananicy::config::out_of_range))]
    OutOfRange {
        /// Attribute name.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Human readable range.
        expected: &'static str,
    },

    /// A textual value is not recognized.
    #[error("Invalid {field}: {value}")]
    #[diagnostic(code(ananicy::config::invalid_value))]
    InvalidValue {
        /// Attribute name.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The thread exited between the snapshot and the read or write.
    #[error("Process {pid}/{tid} vanished")]
    #[diagnostic(code(ananicy::process::vanished))]
    ProcessVanished {
        /// Thread group id.
        pid: u32,
        /// Thread id.
        tid: u32,
    },

    /// Kernel-provided data could not be parsed.
    #[error("Failed to parse {what}: {value}")]
    #[diagnostic(code(ananicy::process::parse))]
    Parse {
        /// What was being parsed.
        what: &'static str,
        /// The offending input.
        value: String,
    },

    /// A priority-control call failed.
    #[error("{operation} failed for thread {tid}: {source}")]
    #[diagnostic(code(ananicy::actuator))]
    Actuator {
        /// The operation that failed.
        operation: &'static str,
        /// Thread id.
        tid: u32,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A cgroup could not be provisioned.
    #[error("Cgroup {name}: {reason}")]
    #[diagnostic(
        code(ananicy::cgroup::setup),
        help("Rules referencing this cgroup will leave their cgroup category unapplied")
    )]
    CgroupSetup {
        /// Cgroup name.
        name: String,
        /// Why provisioning failed.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(ananicy::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(ananicy::serialization))]
    Serialization(String),
}

impl AnanicyError {
    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error only means the thread is gone.
    #[must_use]
    pub const fn is_vanished(&self) -> bool {
        matches!(self, Self::ProcessVanished { .. })
    }
}

impl From<serde_json::Error> for AnanicyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_line_display() {
        let err = AnanicyError::ConfigLine {
            path: PathBuf::from("/etc/ananicy.d/00-default/games.rules"),
            line: 7,
            message: "Missing \"name\"".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "File: /etc/ananicy.d/00-default/games.rules, Line: 7, Error: Missing \"name\""
        );
    }

    #[test]
    fn vanished_is_detected() {
        assert!(AnanicyError::ProcessVanished { pid: 1, tid: 2 }.is_vanished());
        assert!(!AnanicyError::config("boom").is_vanished());
    }

    #[test]
    fn diagnostic_codes() {
        let errors = [
            AnanicyError::config("boom"),
            AnanicyError::OutOfRange {
                field: "nice",
                value: "99".to_string(),
                expected: "-20..=19",
            },
            AnanicyError::ProcessVanished { pid: 1, tid: 1 },
            AnanicyError::Actuator {
                operation: "setpriority",
                tid: 1,
                source: std::io::Error::from_raw_os_error(1),
            },
            AnanicyError::CgroupSetup {
                name: "cpu50".to_string(),
                reason: "not provisioned".to_string(),
            },
        ];
        let codes: Vec<String> = errors
            .iter()
            .filter_map(|err| err.code().map(|code| code.to_string()))
            .collect();
        assert_eq!(
            codes,
            [
                "ananicy::config",
                "ananicy::config::out_of_range",
                "ananicy::process::vanished",
                "ananicy::actuator",
                "ananicy::cgroup::setup",
            ]
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AnanicyError = io_err.into();
        assert!(matches!(err, AnanicyError::Io(_)));
    }
}
