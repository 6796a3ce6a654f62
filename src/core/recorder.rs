// This module defines the unwind recorder protocol the code generator drives while it builds
// prologs and epilogs. Every target implements the same UnwindRecorder trait so the code
// generator has one call sequence: targets whose stack walker recovers frames structurally
// implement it as no-ops, targets with authored unwind codes accumulate an ordered log and
// encode it when the emission driver asks for the finished record. PrologTracker wraps any
// recorder and checks the nesting grammar (one prolog bracket, then any number of epilog
// brackets, with frame operations only inside a bracket), and lets the drivers assert that
// no prolog or epilog is still open.

//! Unwind recording protocol shared by all target variants.

use super::error::UnwindResult;
use super::location::CodeRegion;
use super::reg::AsmReg;

/// One finished unwind record, ready to be committed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwindInfo {
    /// Length in bytes of the code the record covers.
    pub function_length: u32,
    /// Target-defined payload handed to the host verbatim.
    pub bytes: Vec<u8>,
}

impl UnwindInfo {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Capability surface invoked during prolog and epilog construction.
///
/// Calls follow `begin_prolog → {push | alloc_stack | set_frame_reg |
/// save_reg}* → end_prolog`, and independently `begin_epilog → ... →
/// end_epilog` once per return point. The four frame operations may appear
/// inside either bracket.
pub trait UnwindRecorder {
    fn begin_prolog(&mut self);
    fn end_prolog(&mut self);
    fn begin_epilog(&mut self);
    fn end_epilog(&mut self);

    /// A callee-saved register was pushed.
    fn push(&mut self, reg: AsmReg);

    /// The stack pointer was lowered by `size` bytes.
    fn alloc_stack(&mut self, size: u32);

    /// `reg` became the frame pointer, at `offset` bytes above the stack pointer.
    fn set_frame_reg(&mut self, reg: AsmReg, offset: u32);

    /// A callee-saved register was stored at `offset` bytes above the stack pointer.
    fn save_reg(&mut self, reg: AsmReg, offset: u32);

    /// Byte size of the record this recorder produces for `region`.
    ///
    /// Called by the reservation driver; must agree with the length of
    /// [`UnwindRecorder::unwind_info`] for the same region.
    fn unwind_info_size(&self, region: CodeRegion) -> usize;

    /// Build the record for `function_length` bytes of code in `region`.
    fn unwind_info(&self, region: CodeRegion, function_length: u32) -> UnwindResult<UnwindInfo>;
}

/// Where a recorder currently is in the prolog/epilog grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    BeforeProlog,
    InProlog,
    Body,
    InEpilog,
}

/// Nesting checker around a target recorder.
#[derive(Debug, Clone, Default)]
pub struct PrologTracker<R> {
    inner: R,
    phase: Phase,
    epilog_count: u32,
}

impl<R: UnwindRecorder> PrologTracker<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            phase: Phase::BeforeProlog,
            epilog_count: 0,
        }
    }

    pub fn generating_prolog(&self) -> bool {
        self.phase == Phase::InProlog
    }

    pub fn generating_epilog(&self) -> bool {
        self.phase == Phase::InEpilog
    }

    /// Number of completed epilogs.
    pub fn epilog_count(&self) -> u32 {
        self.epilog_count
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn expect_bracket(&self, op: &str) {
        debug_assert!(
            matches!(self.phase, Phase::InProlog | Phase::InEpilog),
            "unwind op `{op}` outside of a prolog or epilog (phase {:?})",
            self.phase
        );
    }
}

impl<R: UnwindRecorder> UnwindRecorder for PrologTracker<R> {
    fn begin_prolog(&mut self) {
        debug_assert_eq!(self.phase, Phase::BeforeProlog, "prolog already generated");
        self.phase = Phase::InProlog;
        self.inner.begin_prolog();
    }

    fn end_prolog(&mut self) {
        debug_assert_eq!(self.phase, Phase::InProlog, "end_prolog without begin_prolog");
        self.phase = Phase::Body;
        self.inner.end_prolog();
    }

    fn begin_epilog(&mut self) {
        debug_assert_eq!(self.phase, Phase::Body, "epilog must follow a finished prolog");
        self.phase = Phase::InEpilog;
        self.inner.begin_epilog();
    }

    fn end_epilog(&mut self) {
        debug_assert_eq!(self.phase, Phase::InEpilog, "end_epilog without begin_epilog");
        self.phase = Phase::Body;
        self.epilog_count += 1;
        self.inner.end_epilog();
    }

    fn push(&mut self, reg: AsmReg) {
        self.expect_bracket("push");
        self.inner.push(reg);
    }

    fn alloc_stack(&mut self, size: u32) {
        self.expect_bracket("alloc_stack");
        self.inner.alloc_stack(size);
    }

    fn set_frame_reg(&mut self, reg: AsmReg, offset: u32) {
        self.expect_bracket("set_frame_reg");
        self.inner.set_frame_reg(reg, offset);
    }

    fn save_reg(&mut self, reg: AsmReg, offset: u32) {
        self.expect_bracket("save_reg");
        self.inner.save_reg(reg, offset);
    }

    fn unwind_info_size(&self, region: CodeRegion) -> usize {
        self.inner.unwind_info_size(region)
    }

    fn unwind_info(&self, region: CodeRegion, function_length: u32) -> UnwindResult<UnwindInfo> {
        self.inner.unwind_info(region, function_length)
    }
}
