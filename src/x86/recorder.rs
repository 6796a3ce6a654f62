// This module provides the x86 unwind recorder. On this target every recording operation is a
// no-op: the runtime recovers frame state from the frame pointer convention, so nothing the
// prolog does needs describing. The recorder still implements the full UnwindRecorder protocol
// so the code generator issues the same calls it issues on targets that author unwind codes.
// The record it produces is the x86 UNWIND_INFO, a single little-endian u32 holding the
// length of the covered code, identical for hot and cold regions.

//! No-op unwind recorder for x86.

use crate::core::error::UnwindResult;
use crate::core::location::CodeRegion;
use crate::core::recorder::{UnwindInfo, UnwindRecorder};
use crate::core::reg::AsmReg;

/// Size of the x86 `UNWIND_INFO` record (`FunctionLength` only).
pub const X86_UNWIND_INFO_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct X86UnwindRecorder;

impl X86UnwindRecorder {
    pub fn new() -> Self {
        Self
    }
}

impl UnwindRecorder for X86UnwindRecorder {
    fn begin_prolog(&mut self) {}

    fn end_prolog(&mut self) {}

    fn begin_epilog(&mut self) {}

    fn end_epilog(&mut self) {}

    fn push(&mut self, _reg: AsmReg) {}

    fn alloc_stack(&mut self, _size: u32) {}

    fn set_frame_reg(&mut self, _reg: AsmReg, _offset: u32) {}

    fn save_reg(&mut self, _reg: AsmReg, _offset: u32) {}

    fn unwind_info_size(&self, _region: CodeRegion) -> usize {
        X86_UNWIND_INFO_SIZE
    }

    fn unwind_info(&self, _region: CodeRegion, function_length: u32) -> UnwindResult<UnwindInfo> {
        Ok(UnwindInfo {
            function_length,
            bytes: function_length.to_le_bytes().to_vec(),
        })
    }
}
