//! Error types for the pslu factorization engine
//!
//! Every failure a factorization can report is a [`PsluError`]. Structural and
//! configuration errors are raised before any worker starts; numeric failures
//! are reconciled after the worker pool drains so that the lowest failing
//! column is reported no matter how many threads ran.
//!
//! # Example
//!
//! ```ignore
//! use pslu_core::{PsluError, PsluResult};
//!
//! fn factor_file(path: &str) -> PsluResult<()> {
//!     let options = FactorOptions::load_from(path)?;
//!     options.validate()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all pslu operations.
#[derive(Error, Debug)]
pub enum PsluError {
    /// Malformed input: not CSC, non-square, empty, bad indices or a bad
    /// column permutation
    #[error("Structural error: {0}")]
    Structural(String),

    /// No acceptable pivot in `column` (factorization order)
    #[error(
        "Singular pivot at column {column} (original column {original_column}), \
         last committed column: {}",
        last_committed.map_or_else(|| "none".to_string(), |c| c.to_string())
    )]
    SingularPivot {
        column: usize,
        original_column: usize,
        last_committed: Option<usize>,
    },

    /// A factor buffer could not grow
    #[error("Out of memory: growing {buffer} by {requested_bytes} bytes failed")]
    OutOfMemory {
        buffer: &'static str,
        requested_bytes: usize,
    },

    /// A scheduling or synchronization invariant was broken
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid options or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (config files, matrix files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using PsluError.
pub type PsluResult<T> = Result<T, PsluError>;

/// Coarse classification used by drivers to pick an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    Numeric,
    Resource,
    Internal,
}

impl PsluError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PsluError::Structural(_) | PsluError::Config(_) | PsluError::Io(_) => {
                ErrorClass::Input
            }
            PsluError::SingularPivot { .. } => ErrorClass::Numeric,
            PsluError::OutOfMemory { .. } => ErrorClass::Resource,
            PsluError::InvariantViolation(_) => ErrorClass::Internal,
        }
    }

    /// SuperLU-style status code for a factorization of order `n`.
    ///
    /// * `column + 1` for a singular pivot,
    /// * `n + requested_bytes` for a failed allocation (`-2` if that overflows),
    /// * `-1` for bad input, `-3` for a broken internal invariant.
    pub fn info_code(&self, n: usize) -> i64 {
        match self {
            PsluError::SingularPivot { column, .. } => {
                i64::try_from(*column).map_or(-2, |c| c + 1)
            }
            PsluError::OutOfMemory {
                requested_bytes, ..
            } => n
                .checked_add(*requested_bytes)
                .and_then(|code| i64::try_from(code).ok())
                .unwrap_or(-2),
            PsluError::Structural(_) | PsluError::Config(_) | PsluError::Io(_) => -1,
            PsluError::InvariantViolation(_) => -3,
        }
    }
}

impl From<toml::de::Error> for PsluError {
    fn from(err: toml::de::Error) -> Self {
        PsluError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PsluError {
    fn from(err: toml::ser::Error) -> Self {
        PsluError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PsluError {
    fn from(err: serde_json::Error) -> Self {
        PsluError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PsluError::SingularPivot {
            column: 7,
            original_column: 3,
            last_committed: Some(6),
        };
        let msg = err.to_string();
        assert!(msg.contains("Singular pivot at column 7"));
        assert!(msg.contains("original column 3"));
        assert!(msg.contains("last committed column: 6"));

        let err = PsluError::SingularPivot {
            column: 0,
            original_column: 0,
            last_committed: None,
        };
        assert!(err.to_string().contains("none"));
    }

    #[test]
    fn test_info_codes() {
        let pivot = PsluError::SingularPivot {
            column: 4,
            original_column: 9,
            last_committed: Some(3),
        };
        assert_eq!(pivot.info_code(10), 5);

        let oom = PsluError::OutOfMemory {
            buffer: "lusup",
            requested_bytes: 4096,
        };
        assert_eq!(oom.info_code(10), 4106);

        let huge = PsluError::OutOfMemory {
            buffer: "lusup",
            requested_bytes: usize::MAX,
        };
        assert_eq!(huge.info_code(10), -2);

        assert_eq!(PsluError::Structural("bad".into()).info_code(10), -1);
        assert_eq!(PsluError::InvariantViolation("x".into()).info_code(10), -3);
    }

    #[test]
    fn test_error_class() {
        assert_eq!(
            PsluError::Config("panel".into()).class(),
            ErrorClass::Input
        );
        assert_eq!(
            PsluError::OutOfMemory {
                buffer: "lsub",
                requested_bytes: 1
            }
            .class(),
            ErrorClass::Resource
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PsluError = io_err.into();
        assert!(matches!(err, PsluError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse: Result<toml::Value, _> = toml::from_str("panel_size = [");
        let err: PsluError = parse.unwrap_err().into();
        assert!(matches!(err, PsluError::Config(_)));
    }
}
