//! RedevError: error type for substrate-facing operations.
//!
//! Only failures originating in the streaming substrate travel through this
//! type; they propagate to the caller untranslated. Contract violations
//! (bad layouts, phase misuse, unknown partition tags, version mismatch)
//! are fatal and reported through [`always_assert!`](crate::always_assert)
//! instead — see the error-handling table in the crate docs.

use thiserror::Error;

/// Errors surfaced by the streaming substrate seam.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedevError {
    /// The engine type string is not one the crate knows how to drive.
    #[error("unsupported engine type `{0}` (expected \"BP4\" or \"SST\")")]
    UnsupportedEngine(String),
    /// A reader opened a stream no writer has produced yet.
    #[error("stream `{0}` is not available for reading")]
    StreamUnavailable(String),
    /// Waiting for a peer open or a step exceeded the configured timeout.
    #[error("timed out after {seconds}s waiting on stream `{stream}`")]
    OpenTimeout { stream: String, seconds: u64 },
    /// A variable was inquired that the current step does not contain.
    #[error("variable `{0}` is not present in the current step")]
    MissingVariable(String),
    /// A typed access did not match the variable's defined element type.
    #[error("variable `{name}` holds {found} but {expected} was requested")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    /// A put/get selection falls outside the variable's global shape.
    #[error("selection [{start}, {start}+{count}) exceeds shape {shape} of variable `{name}`")]
    SelectionOutOfBounds {
        name: String,
        start: u64,
        count: u64,
        shape: u64,
    },
    /// An operation ran against a stream whose writers have all closed.
    #[error("stream `{0}` was closed by its writer")]
    StreamClosed(String),
    /// An engine operation that requires an active step ran outside one.
    #[error("no step is active on stream `{0}`")]
    NoActiveStep(String),
    /// A variable was defined twice with incompatible shape or type.
    #[error("conflicting redefinition of variable `{0}`")]
    VariableRedefined(String),
}
