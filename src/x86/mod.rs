//! x86 (32-bit) unwind support.
//!
//! The x86 stack walker recovers frames from the EBP frame chain and the GC
//! info, so no unwind codes are authored: the recorder ignores every prolog
//! and epilog event and each record holds only the function length.

pub mod recorder;

pub use recorder::{X86UnwindRecorder, X86_UNWIND_INFO_SIZE};
