// This module defines the error type for unwind info generation using the thiserror crate.
// UnwindError covers the failures that can escape the reservation and emission drivers:
// the host refusing a reservation or commit, a code location the oracle cannot resolve,
// an unwind record the target format cannot express, and a malformed function/funclet
// set. Contract violations by the code generator (emitting while a prolog is open,
// splitting a funclet) are not represented here; they are debug assertions.

//! Error types for unwind info generation.

use thiserror::Error;

use super::location::CodeLocation;

/// Main error type for unwind reservation and emission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnwindError {
    #[error("Host failed to reserve unwind info: {reason}")]
    HostReserve {
        reason: String,
    },

    #[error("Host failed to commit unwind info: {reason}")]
    HostCommit {
        reason: String,
    },

    #[error("Code location {location:?} has no final offset")]
    UnresolvedLocation {
        location: CodeLocation,
    },

    #[error("Unwind encoding failed: {reason}")]
    Encoding {
        reason: String,
    },

    #[error("Invalid function/funclet set: {reason}")]
    InvalidFuncSet {
        reason: String,
    },
}

/// Result type alias for unwind operations.
pub type UnwindResult<T> = Result<T, UnwindError>;
