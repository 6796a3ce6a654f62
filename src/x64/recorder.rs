//! Log-accumulating unwind recorder for x86-64.
//!
//! Prolog operations are kept in order and turned into Windows x64 unwind
//! codes when the emission driver asks for the record. Epilogs need no codes
//! in this format; they and the operations inside them are only counted.

use crate::core::error::UnwindResult;
use crate::core::location::CodeRegion;
use crate::core::recorder::{UnwindInfo, UnwindRecorder};
use crate::core::reg::AsmReg;

use super::unwind_codes::{
    encode_chained_unwind_info, encode_unwind_info, unwind_info_size, UnwindOp,
    UNWIND_INFO_HEADER_SIZE,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct X64UnwindRecorder {
    ops: Vec<UnwindOp>,
    epilogs: u32,
    in_epilog: bool,
    epilog_ops: u32,
}

impl X64UnwindRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded prolog operations, in prolog order.
    pub fn ops(&self) -> &[UnwindOp] {
        &self.ops
    }

    pub fn epilog_count(&self) -> u32 {
        self.epilogs
    }

    /// Operations reported inside epilogs; they produce no unwind codes.
    pub fn epilog_op_count(&self) -> u32 {
        self.epilog_ops
    }

    fn record(&mut self, op: UnwindOp) {
        if self.in_epilog {
            log::trace!("epilog op {:?} (no unwind code)", op);
            self.epilog_ops += 1;
            return;
        }
        log::trace!("unwind op #{}: {:?}", self.ops.len(), op);
        self.ops.push(op);
    }
}

impl UnwindRecorder for X64UnwindRecorder {
    fn begin_prolog(&mut self) {
        debug_assert!(self.ops.is_empty(), "prolog recorded twice");
    }

    fn end_prolog(&mut self) {
        log::trace!("prolog recorded with {} op(s)", self.ops.len());
    }

    fn begin_epilog(&mut self) {
        self.in_epilog = true;
    }

    fn end_epilog(&mut self) {
        self.in_epilog = false;
        self.epilogs += 1;
    }

    fn push(&mut self, reg: AsmReg) {
        self.record(UnwindOp::PushNonvol { reg });
    }

    fn alloc_stack(&mut self, size: u32) {
        self.record(UnwindOp::AllocStack { size });
    }

    fn set_frame_reg(&mut self, reg: AsmReg, offset: u32) {
        self.record(UnwindOp::SetFrameReg { reg, offset });
    }

    fn save_reg(&mut self, reg: AsmReg, offset: u32) {
        self.record(UnwindOp::SaveReg { reg, offset });
    }

    fn unwind_info_size(&self, region: CodeRegion) -> usize {
        match region {
            CodeRegion::Hot => unwind_info_size(&self.ops),
            CodeRegion::Cold => UNWIND_INFO_HEADER_SIZE,
        }
    }

    fn unwind_info(&self, region: CodeRegion, function_length: u32) -> UnwindResult<UnwindInfo> {
        let bytes = match region {
            CodeRegion::Hot => encode_unwind_info(&self.ops)?,
            CodeRegion::Cold => encode_chained_unwind_info(),
        };
        Ok(UnwindInfo { function_length, bytes })
    }
}
