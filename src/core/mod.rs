// This module serves as the hub for the architecture-independent part of unwind info
// generation. It exports the building blocks shared by every target variant: the error type,
// register handles, the arena-backed compilation session with its statistics, the
// function/funclet descriptor set, code locations and their post-layout oracle, the recorder
// protocol, the host reserve/commit interface, configuration, and the per-compilation
// context together with the reservation and emission drivers that walk it.

//! Core unwind infrastructure
//!
//! Everything here is target independent. A target supplies an
//! [`UnwindRecorder`] implementation; the drivers on [`UnwindContext`]
//! handle reservation and emission for any of them.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based storage for the descriptor set using `bumpalo`
//! - Reservation and commit statistics
//!
//! ## Recording (`recorder`)
//! - The prolog/epilog recording protocol
//! - Nesting checks through `PrologTracker`
//!
//! ## Drivers (`reserve`, `emit`)
//! - Pre-layout size reservation
//! - Post-layout commit, including the debug-only fake split

pub mod config;
pub mod context;
pub mod emit;
pub mod error;
pub mod funclet;
pub mod host;
pub mod location;
pub mod recorder;
pub mod reg;
pub mod reserve;
pub mod session;
pub mod test_utils;

pub use config::{UnwindConfig, FAKE_SPLITTING_ENV};
pub use context::UnwindContext;
pub use emit::UnitLayout;
pub use error::{UnwindError, UnwindResult};
pub use funclet::{CodeSpan, FuncInfo, FuncInfoSet, FuncInfoSetBuilder, FuncKind};
pub use host::{CodeAddr, CommittedUnwind, RecordingHost, Reservation, UnwindCommit, UnwindHost};
pub use location::{CodeLocation, CodeRegion, LocationOracle, LocationTable};
pub use recorder::{PrologTracker, UnwindInfo, UnwindRecorder};
pub use reg::AsmReg;
pub use session::{CompilationSession, UnwindStats};
