use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the triage core.
///
/// Each variant is tagged below with which of the four error classes in
/// the core's error-handling design it belongs to. Only `Fatal`-class
/// variants are meant to unwind all the way out of [`crate::dispatcher`] --
/// everything else is either logged and swallowed, or folded back into the
/// dispatcher's own retry loop.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Fatal: could not create a queue or hangs file.
    #[error("failed to create '{path}': {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fatal: calibration reported an execution error.
    #[error("target application could not be executed during calibration")]
    CalibrationFailed,

    /// Fatal: the describe buffer would overflow `max_description_len`.
    #[error("description string exceeds max length ({len} > {max})")]
    DescribeOverflow { len: usize, max: usize },

    /// Fatal: the configured executor reported an unrecoverable error.
    #[error("target application could not be executed: {0}")]
    ExecutorFailed(String),

    /// Impolite-silent: failed to open the crash README for append.
    #[error("failed to open crash README: {0}")]
    CrashReadmeUnavailable(std::io::Error),

    /// Impolite-silent: failed to open the call-stack dump file.
    #[error("failed to open call-stack file '{0}': {1}")]
    CallstackUnavailable(PathBuf, std::io::Error),

    /// Impolite-silent: the symbolizer subprocess returned zero symbols,
    /// or could not be reached at all.
    #[error("symbolizer failed for '{image}'+{offset:#x}: {reason}")]
    SymbolizerFailed {
        image: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Impolite-silent: propagated from an I/O operation that the caller
    /// should log and continue past rather than abort on.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True for the subset of errors that must abort the fuzzer process
    /// rather than being logged and swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::CreateFile { .. }
                | CoreError::CalibrationFailed
                | CoreError::DescribeOverflow { .. }
                | CoreError::ExecutorFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
