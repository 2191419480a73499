//! Error taxonomy for the coalbuf journal buffer.
//!
//! One enum, one `Result` alias. Admission-path failures are surfaced to the
//! producer; backend I/O failures never travel this way (they reach the
//! per-record completion handles instead).

use thiserror::Error;

/// Errors surfaced by the journal buffer's public operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JournalError {
    /// A public operation other than `start`/`stop` was invoked before
    /// `start` or after `stop`.
    #[error("journal buffer is not started")]
    NotStarted,

    /// A record was offered that can never fit the configured batch region.
    /// Not retryable.
    #[error("record of {size} bytes exceeds batch capacity of {capacity} bytes")]
    RecordTooLarge {
        /// Bytes the producer asked to reserve.
        size: usize,
        /// Configured capacity of the batch region.
        capacity: usize,
    },

    /// A background thread could not be joined cleanly. The buffer is in an
    /// indeterminate state and should be discarded.
    #[error("interrupted while {what}")]
    Interrupted {
        /// The operation that was interrupted.
        what: String,
    },

    /// Invariant violation inside the buffer itself.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl JournalError {
    /// Build a [`JournalError::Internal`] from anything displayable.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Build a [`JournalError::Interrupted`] naming the interrupted step.
    pub fn interrupted(what: impl Into<String>) -> Self {
        Self::Interrupted { what: what.into() }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, JournalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_too_large_names_both_sizes() {
        let err = JournalError::RecordTooLarge {
            size: 2048,
            capacity: 1024,
        };
        let rendered = err.to_string();
        assert!(rendered.contains("2048"), "message should name the record size");
        assert!(rendered.contains("1024"), "message should name the capacity");
    }

    #[test]
    fn helpers_build_expected_variants() {
        assert!(matches!(
            JournalError::internal("cursor out of range"),
            JournalError::Internal { .. }
        ));
        assert!(matches!(
            JournalError::interrupted("joining flush timer"),
            JournalError::Interrupted { .. }
        ));
    }
}
