// This module drives x86-64 code generation for one compilation unit and keeps the unwind
// recorder in step with the machine code. UnitCodegen owns the encoder, hands out code
// locations backed by encoder labels, and emits the standard Windows x64 prolog and epilog
// shape for a FrameLayout: push rbp, push callee-saved GP registers, allocate the fixed
// frame, spill callee-saved XMM registers, then establish rbp. Each instruction is followed
// by the matching recorder call so the recorder's log mirrors the emitted bytes exactly.
// The unit is laid out hot first; begin_cold_section marks where cold code starts. Finishing
// the unit assembles the code, resolves every placed location and reports the hot and total
// sizes the emission driver needs.

//! Unit code generation with unwind recording.
//!
//! This module provides the bridge between frame layout, machine code
//! generation and the unwind recorder protocol.

use std::fmt;

use crate::{
    core::{
        emit::UnitLayout,
        host::CodeAddr,
        location::{CodeLocation, LocationTable},
        recorder::UnwindRecorder,
        reg::AsmReg,
    },
    x64::{
        encoder::{gp64_register, xmm_register, EncodingError, X64Encoder},
        unwind_codes::MAX_FRAME_OFFSET,
    },
};

/// Stack frame shape of one function or funclet.
///
/// Layout below the return address:
/// saved rbp, pushed GP registers, optional 8-byte pad, then the fixed
/// allocation holding locals at the bottom and XMM save slots above them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameLayout {
    /// Callee-saved GP registers, pushed in this order after rbp.
    pub saved_registers: Vec<AsmReg>,
    /// Callee-saved XMM registers, stored into the fixed allocation.
    pub saved_xmm: Vec<AsmReg>,
    /// Bytes of locals and spill slots.
    pub local_size: u32,
    /// rbp is set to rsp plus this offset once the frame is allocated.
    pub frame_pointer_offset: u32,
    /// Size of the fixed allocation, valid after `calculate_frame_size`.
    pub frame_size: u32,
}

impl FrameLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callee-saved register that needs preservation.
    pub fn add_saved_register(&mut self, reg: AsmReg) {
        let list = if reg.is_xmm() {
            &mut self.saved_xmm
        } else {
            &mut self.saved_registers
        };
        if !list.contains(&reg) {
            list.push(reg);
        }
    }

    /// Reserve `size` more bytes of locals, rounded up to 8.
    pub fn allocate_locals(&mut self, size: u32) {
        self.local_size += size.div_ceil(8) * 8;
    }

    pub fn set_frame_pointer_offset(&mut self, offset: u32) {
        self.frame_pointer_offset = offset;
    }

    /// Calculate the final size of the fixed allocation.
    pub fn calculate_frame_size(&mut self) {
        // rsp is 16-byte aligned after push rbp; every further push flips it.
        let locals = self.local_size.div_ceil(16) * 16;
        let xmm_area = self.saved_xmm.len() as u32 * 16;
        let pad = if self.saved_registers.len() % 2 == 1 { 8 } else { 0 };
        self.frame_size = locals + xmm_area + pad;
    }

    /// rsp-relative slot of the `idx`-th saved XMM register.
    pub fn xmm_save_offset(&self, idx: usize) -> u32 {
        self.local_size.div_ceil(16) * 16 + idx as u32 * 16
    }

    fn validate(&self) -> Result<(), FunctionCodegenError> {
        let offset = self.frame_pointer_offset;
        if offset % 16 != 0 || offset > MAX_FRAME_OFFSET || offset > self.frame_size {
            return Err(FunctionCodegenError::FrameLayoutError);
        }
        if self.saved_registers.iter().any(|&reg| reg == AsmReg::RBP || reg == AsmReg::RSP) {
            return Err(FunctionCodegenError::FrameLayoutError);
        }
        // Nothing may fail to encode once the prolog has been opened.
        if self.saved_registers.iter().any(|&reg| gp64_register(reg).is_none())
            || self.saved_xmm.iter().any(|&reg| xmm_register(reg).is_none())
            || i32::try_from(self.frame_size).is_err()
        {
            return Err(FunctionCodegenError::FrameLayoutError);
        }
        Ok(())
    }
}

/// Code generator for one compilation unit.
pub struct UnitCodegen {
    /// Machine code encoder.
    encoder: X64Encoder,
    /// Location marking the first cold byte, once cold code has begun.
    cold_start: Option<CodeLocation>,
}

impl UnitCodegen {
    pub fn new() -> Result<Self, FunctionCodegenError> {
        Ok(Self {
            encoder: X64Encoder::new()?,
            cold_start: None,
        })
    }

    /// Hand out a fresh, unplaced code location.
    pub fn new_location(&mut self) -> CodeLocation {
        CodeLocation::new(self.encoder.create_label() as u32)
    }

    /// Bind `location` to the current position.
    pub fn place_location(&mut self, location: CodeLocation) -> Result<(), FunctionCodegenError> {
        self.encoder.place_label(location.id() as usize)?;
        Ok(())
    }

    /// Create a location and place it immediately.
    pub fn here(&mut self) -> Result<CodeLocation, FunctionCodegenError> {
        let location = self.new_location();
        self.place_location(location)?;
        Ok(location)
    }

    pub fn in_cold_section(&self) -> bool {
        self.cold_start.is_some()
    }

    /// Start the cold section; everything emitted afterwards is cold code.
    ///
    /// Returns the location of the first cold byte.
    pub fn begin_cold_section(&mut self) -> Result<CodeLocation, FunctionCodegenError> {
        let location = self.new_location();
        self.begin_cold_section_at(location)?;
        Ok(location)
    }

    /// Start the cold section at a location handed out earlier, so the
    /// marker can already appear in a descriptor set.
    pub fn begin_cold_section_at(&mut self, location: CodeLocation) -> Result<(), FunctionCodegenError> {
        if self.cold_start.is_some() {
            return Err(FunctionCodegenError::ColdSectionStarted);
        }
        self.place_location(location)?;
        self.cold_start = Some(location);
        Ok(())
    }

    /// Emit the prolog for `frame`, reporting each step to `recorder`.
    ///
    /// The frame size is (re)calculated first.
    pub fn emit_prologue<R>(&mut self, recorder: &mut R, frame: &mut FrameLayout) -> Result<(), FunctionCodegenError>
    where
        R: UnwindRecorder + ?Sized,
    {
        if self.in_cold_section() {
            return Err(FunctionCodegenError::ColdSectionStarted);
        }
        frame.calculate_frame_size();
        frame.validate()?;

        recorder.begin_prolog();

        self.encoder.push_reg(AsmReg::RBP)?;
        recorder.push(AsmReg::RBP);

        for &reg in &frame.saved_registers {
            self.encoder.push_reg(reg)?;
            recorder.push(reg);
        }

        if frame.frame_size > 0 {
            self.encoder.sub_reg_imm(AsmReg::RSP, frame.frame_size)?;
            recorder.alloc_stack(frame.frame_size);
        }

        for (idx, &reg) in frame.saved_xmm.iter().enumerate() {
            let offset = frame.xmm_save_offset(idx);
            self.encoder.store_reg(AsmReg::RSP, offset, reg)?;
            recorder.save_reg(reg, offset);
        }

        if frame.frame_pointer_offset == 0 {
            self.encoder.mov_reg_reg(AsmReg::RBP, AsmReg::RSP)?;
        } else {
            self.encoder.lea(AsmReg::RBP, AsmReg::RSP, frame.frame_pointer_offset)?;
        }
        recorder.set_frame_reg(AsmReg::RBP, frame.frame_pointer_offset);

        recorder.end_prolog();
        Ok(())
    }

    /// Emit a return path undoing `frame`.
    ///
    /// Epilogs may appear in hot or cold code.
    pub fn emit_epilogue<R>(&mut self, recorder: &mut R, frame: &FrameLayout) -> Result<(), FunctionCodegenError>
    where
        R: UnwindRecorder + ?Sized,
    {
        recorder.begin_epilog();

        for (idx, &reg) in frame.saved_xmm.iter().enumerate() {
            self.encoder.load_reg(reg, AsmReg::RSP, frame.xmm_save_offset(idx))?;
        }

        if frame.frame_size > 0 {
            self.encoder.add_reg_imm(AsmReg::RSP, frame.frame_size)?;
        }

        for &reg in frame.saved_registers.iter().rev() {
            self.encoder.pop_reg(reg)?;
        }

        self.encoder.pop_reg(AsmReg::RBP)?;
        self.encoder.ret()?;

        recorder.end_epilog();
        Ok(())
    }

    /// Get access to the underlying encoder for body emission.
    pub fn encoder_mut(&mut self) -> &mut X64Encoder {
        &mut self.encoder
    }

    /// Assemble the unit and resolve every placed location.
    pub fn finish(mut self) -> Result<AssembledUnit, FunctionCodegenError> {
        let assembled = self.encoder.finalize()?;
        let total_native_code_size = u32::try_from(assembled.code.len())
            .map_err(|_| FunctionCodegenError::Encoding(EncodingError::InvalidImmediate(u32::MAX)))?;

        let mut locations = LocationTable::new();
        for (idx, offset) in assembled.label_offsets.iter().enumerate() {
            if let Some(offset) = *offset {
                locations.insert(CodeLocation::new(idx as u32), offset);
            }
        }

        let total_hot_code_size = match self.cold_start {
            Some(start) => assembled.label_offsets[start.id() as usize].unwrap_or(total_native_code_size),
            None => total_native_code_size,
        };

        log::debug!(
            "assembled unit: {} hot + {} cold bytes, {} locations",
            total_hot_code_size,
            total_native_code_size - total_hot_code_size,
            locations.len()
        );

        Ok(AssembledUnit {
            code: assembled.code,
            total_hot_code_size,
            total_native_code_size,
            split: self.cold_start.is_some(),
            locations,
        })
    }
}

/// Machine code of one unit, hot part first.
#[derive(Debug, Clone)]
pub struct AssembledUnit {
    pub code: Vec<u8>,
    pub total_hot_code_size: u32,
    pub total_native_code_size: u32,
    /// Whether a cold section was started.
    pub split: bool,
    /// Final offset of every placed location.
    pub locations: LocationTable,
}

impl AssembledUnit {
    pub fn hot_code(&self) -> &[u8] {
        &self.code[..self.total_hot_code_size as usize]
    }

    pub fn cold_code(&self) -> &[u8] {
        &self.code[self.total_hot_code_size as usize..]
    }

    /// Layout of the unit when its buffer is placed at `base`, cold code
    /// directly after hot code.
    pub fn layout(&self, base: CodeAddr) -> UnitLayout {
        if self.split {
            let cold = CodeAddr(base.0 + self.total_hot_code_size as usize);
            UnitLayout::split(base, cold, self.total_hot_code_size, self.total_native_code_size)
        } else {
            UnitLayout::hot_only(base, self.total_native_code_size)
        }
    }
}

/// Errors that can occur during unit code generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionCodegenError {
    /// Encoding error from the x64 encoder.
    Encoding(EncodingError),
    /// Stack frame layout cannot be expressed.
    FrameLayoutError,
    /// Operation is not allowed once cold code has begun.
    ColdSectionStarted,
}

impl fmt::Display for FunctionCodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionCodegenError::Encoding(err) => write!(f, "{err}"),
            FunctionCodegenError::FrameLayoutError => write!(f, "Invalid stack frame layout"),
            FunctionCodegenError::ColdSectionStarted => write!(f, "Cold section already started"),
        }
    }
}

impl std::error::Error for FunctionCodegenError {}

impl From<EncodingError> for FunctionCodegenError {
    fn from(err: EncodingError) -> Self {
        Self::Encoding(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::location::LocationOracle;
    use crate::core::recorder::PrologTracker;
    use crate::x64::recorder::X64UnwindRecorder;
    use crate::x64::unwind_codes::UnwindOp;

    fn windows_frame() -> FrameLayout {
        let mut frame = FrameLayout::new();
        frame.add_saved_register(AsmReg::RBX);
        frame.add_saved_register(AsmReg::R12);
        frame.add_saved_register(AsmReg::xmm(6));
        frame.allocate_locals(0x1C);
        frame.set_frame_pointer_offset(0x20);
        frame
    }

    #[test]
    fn test_frame_size() {
        let mut frame = windows_frame();
        frame.calculate_frame_size();
        // 0x20 locals + one XMM slot, even push count
        assert_eq!(frame.frame_size, 0x30);
        assert_eq!(frame.xmm_save_offset(0), 0x20);

        let mut odd = FrameLayout::new();
        odd.add_saved_register(AsmReg::RBX);
        odd.add_saved_register(AsmReg::RBX);
        odd.calculate_frame_size();
        assert_eq!(odd.saved_registers.len(), 1);
        assert_eq!(odd.frame_size, 8);
    }

    #[test]
    fn test_prologue_matches_recorded_ops() {
        let mut codegen = UnitCodegen::new().unwrap();
        let mut recorder = PrologTracker::new(X64UnwindRecorder::new());
        let mut frame = windows_frame();

        let start = codegen.here().unwrap();
        codegen.emit_prologue(&mut recorder, &mut frame).unwrap();
        let body = codegen.here().unwrap();
        codegen.encoder_mut().nop().unwrap();
        codegen.emit_epilogue(&mut recorder, &frame).unwrap();

        let unit = codegen.finish().unwrap();
        let recorder = recorder.into_inner();
        assert_eq!(
            recorder.ops(),
            &[
                UnwindOp::PushNonvol { reg: AsmReg::RBP },
                UnwindOp::PushNonvol { reg: AsmReg::RBX },
                UnwindOp::PushNonvol { reg: AsmReg::R12 },
                UnwindOp::AllocStack { size: 0x30 },
                UnwindOp::SaveReg { reg: AsmReg::xmm(6), offset: 0x20 },
                UnwindOp::SetFrameReg { reg: AsmReg::RBP, offset: 0x20 },
            ]
        );
        assert_eq!(recorder.epilog_count(), 1);

        // push rbp ; push rbx ; push r12 ; sub rsp, 0x30
        assert_eq!(&unit.code[..8], &[0x55, 0x53, 0x41, 0x54, 0x48, 0x83, 0xEC, 0x30]);
        assert_eq!(unit.locations.code_offset(start), Some(0));
        assert_eq!(unit.locations.code_offset(body), Some(18));

        let info = recorder
            .unwind_info(crate::core::location::CodeRegion::Hot, unit.total_hot_code_size)
            .unwrap();
        assert_eq!(info.bytes[1], 18);
        assert_eq!(*unit.code.last().unwrap(), 0xC3);
    }

    #[test]
    fn test_minimal_frame() {
        let mut codegen = UnitCodegen::new().unwrap();
        let mut recorder = X64UnwindRecorder::new();
        let mut frame = FrameLayout::new();

        codegen.emit_prologue(&mut recorder, &mut frame).unwrap();
        codegen.emit_epilogue(&mut recorder, &frame).unwrap();

        let unit = codegen.finish().unwrap();
        // push rbp ; mov rbp, rsp ; pop rbp ; ret
        assert_eq!(unit.code, vec![0x55, 0x48, 0x89, 0xE5, 0x5D, 0xC3]);
        assert_eq!(recorder.ops().len(), 2);
        assert!(!unit.split);
    }

    #[test]
    fn test_cold_section_sizes() {
        let mut codegen = UnitCodegen::new().unwrap();
        let mut recorder = X64UnwindRecorder::new();
        let mut frame = FrameLayout::new();

        codegen.emit_prologue(&mut recorder, &mut frame).unwrap();
        codegen.emit_epilogue(&mut recorder, &frame).unwrap();
        let cold = codegen.begin_cold_section().unwrap();
        codegen.encoder_mut().int3().unwrap();
        codegen.encoder_mut().int3().unwrap();
        let end = codegen.here().unwrap();

        assert!(codegen.begin_cold_section().is_err());
        assert_eq!(
            codegen.emit_prologue(&mut recorder, &mut frame),
            Err(FunctionCodegenError::ColdSectionStarted)
        );

        let unit = codegen.finish().unwrap();
        assert!(unit.split);
        assert_eq!(unit.total_hot_code_size, 6);
        assert_eq!(unit.total_native_code_size, 8);
        assert_eq!(unit.cold_code(), &[0xCC, 0xCC]);
        assert_eq!(unit.locations.code_offset(cold), Some(6));
        assert_eq!(unit.locations.code_offset(end), Some(8));

        let layout = unit.layout(CodeAddr(0x1000));
        assert_eq!(layout.cold_code, Some(CodeAddr(0x1006)));
        assert_eq!(layout.total_hot_code_size, 6);
    }

    #[test]
    fn test_unplaced_location_is_unresolved() {
        let mut codegen = UnitCodegen::new().unwrap();
        let never = codegen.new_location();
        codegen.encoder_mut().ret().unwrap();

        let unit = codegen.finish().unwrap();
        assert_eq!(unit.locations.code_offset(never), None);
        assert_eq!(unit.layout(CodeAddr(0)).cold_code, None);
    }

    #[test]
    fn test_unencodable_register_rejected_before_prolog() {
        let mut codegen = UnitCodegen::new().unwrap();
        let mut recorder = PrologTracker::new(X64UnwindRecorder::new());
        let mut frame = FrameLayout::new();
        frame.add_saved_register(AsmReg::RBX);
        frame.add_saved_register(AsmReg::gp(16));

        assert_eq!(
            codegen.emit_prologue(&mut recorder, &mut frame),
            Err(FunctionCodegenError::FrameLayoutError)
        );
        assert!(!recorder.generating_prolog());
        assert!(recorder.inner().ops().is_empty());

        let mut xmm_frame = FrameLayout::new();
        xmm_frame.saved_xmm.push(AsmReg::RSI);
        assert_eq!(
            codegen.emit_prologue(&mut recorder, &mut xmm_frame),
            Err(FunctionCodegenError::FrameLayoutError)
        );

        // the recorder is still usable for a valid frame
        let mut valid = FrameLayout::new();
        codegen.emit_prologue(&mut recorder, &mut valid).unwrap();
        assert_eq!(recorder.inner().ops().len(), 2);
    }

    #[test]
    fn test_invalid_frame_pointer_offset() {
        let mut codegen = UnitCodegen::new().unwrap();
        let mut recorder = X64UnwindRecorder::new();
        let mut frame = FrameLayout::new();
        frame.allocate_locals(0x10);
        frame.set_frame_pointer_offset(0x18);

        assert_eq!(
            codegen.emit_prologue(&mut recorder, &mut frame),
            Err(FunctionCodegenError::FrameLayoutError)
        );
        assert!(recorder.ops().is_empty());
    }
}
