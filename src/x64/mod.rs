//! x86-64 architecture-specific components.
//!
//! This module contains all x86-64 specific code:
//! - Instruction encoding using iced-x86
//! - Windows x64 `UNWIND_INFO` encoding
//! - The log-accumulating unwind recorder
//! - Unit code generation that drives the recorder

pub mod encoder;
pub mod function_codegen;
pub mod recorder;
pub mod unwind_codes;

pub use encoder::{AssembledCode, EncodingError, X64Encoder};
pub use function_codegen::{AssembledUnit, FrameLayout, FunctionCodegenError, UnitCodegen};
pub use recorder::X64UnwindRecorder;
pub use unwind_codes::UnwindOp;
