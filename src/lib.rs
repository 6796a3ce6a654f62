//! TPDE unwind - stack-unwind metadata for JIT-compiled code.
//!
//! The code generator reports every prolog and epilog step to an
//! [`UnwindRecorder`]. Before final layout the reservation driver tells the
//! host how many bytes of unwind info each function, funclet and cold
//! region needs; after layout the emission driver resolves code locations
//! and commits the finished records.
//!
//! # Primary Usage
//!
//! ```ignore
//! use tpde_unwind::core::{CompilationSession, UnwindConfig, UnwindContext, FuncInfoSetBuilder};
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let funcs = FuncInfoSetBuilder::new().root(hot, Some(cold)).handler(handler).build()?;
//! let mut ctx = UnwindContext::<NativeRecorder>::new(&session, &funcs, UnwindConfig::from_env())?;
//!
//! // ... generate code, driving ctx.recorder_mut(idx) ...
//! ctx.reserve(&mut host)?;
//! // ... final layout ...
//! ctx.emit(&mut host, &locations, &layout)?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Target-independent protocol, drivers and host interface
//! - [`x86`] - No-op recorder for 32-bit x86
//! - [`x64`] - Windows x64 unwind codes, encoder and unit code generation

pub mod core;
pub mod x64;
pub mod x86;

pub use crate::core::{
    CodeAddr, CodeLocation, CodeRegion, CodeSpan, CompilationSession, FuncInfo, FuncInfoSet,
    FuncInfoSetBuilder, FuncKind, LocationOracle, LocationTable, RecordingHost, UnitLayout,
    UnwindCommit, UnwindConfig, UnwindContext, UnwindError, UnwindHost, UnwindRecorder,
    UnwindResult,
};
pub use x64::X64UnwindRecorder;
pub use x86::X86UnwindRecorder;

/// Recorder for the architecture this crate is built for.
#[cfg(target_arch = "x86_64")]
pub type NativeRecorder = X64UnwindRecorder;

/// Recorder for the architecture this crate is built for.
#[cfg(not(target_arch = "x86_64"))]
pub type NativeRecorder = X86UnwindRecorder;
