//! Shared error types for the dataset codec.

use std::io;

/// Errors that can occur reading or writing dataset files.
///
/// The training engine treats every variant as fatal: a detected
/// inconsistency invalidates the whole run, so errors propagate to the
/// top instead of being logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid index: {what} has {actual} entries, expected {expected}")]
    IndexShape {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid record range: {from}..{to}")]
    InvalidRange { from: u64, to: u64 },
}
