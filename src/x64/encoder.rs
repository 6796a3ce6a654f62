// This module provides x86-64 instruction encoding for function prologs and epilogs using the
// iced-x86 code assembler. X64Encoder converts AsmReg register references into machine code
// for the instructions frame setup needs: PUSH/POP of callee-saved registers, stack pointer
// adjustment, frame pointer establishment (MOV/LEA), register saves and restores to stack
// slots (MOV for GP, MOVAPS for XMM), RET and NOP filler. Labels stand in for code locations:
// a label is created when a marker is handed out and bound when the marker is placed, and
// assembling with instruction offsets enabled yields each label's final offset. Those
// offsets feed the location oracle used by unwind emission.

//! x86-64 instruction encoding using iced-x86.

use crate::core::reg::AsmReg;
use iced_x86::code_asm::*;
use iced_x86::{BlockEncoderOptions, IcedError};

/// Error types for instruction encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Invalid register for the requested operation.
    InvalidRegister,
    /// Assembly error from iced-x86.
    AssemblyError(String),
    /// Immediate or displacement out of range.
    InvalidImmediate(u32),
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::InvalidRegister => write!(f, "Invalid register for operation"),
            EncodingError::AssemblyError(msg) => write!(f, "Assembly error: {msg}"),
            EncodingError::InvalidImmediate(value) => write!(f, "Immediate out of range: {value}"),
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<IcedError> for EncodingError {
    fn from(err: IcedError) -> Self {
        EncodingError::AssemblyError(err.to_string())
    }
}

/// 64-bit GP register for `reg`, if it is one.
pub(crate) fn gp64_register(reg: AsmReg) -> Option<AsmRegister64> {
    const GP64_REGS: [AsmRegister64; 16] = [
        rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi,
        r8, r9, r10, r11, r12, r13, r14, r15,
    ];

    if !reg.is_gp() {
        return None;
    }
    GP64_REGS.get(reg.id as usize).copied()
}

/// XMM register for `reg`, if it is one.
pub(crate) fn xmm_register(reg: AsmReg) -> Option<AsmRegisterXmm> {
    const XMM_REGS: [AsmRegisterXmm; 16] = [
        xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7,
        xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15,
    ];

    if !reg.is_xmm() {
        return None;
    }
    XMM_REGS.get(reg.id as usize).copied()
}

/// Assembled code plus the final offset of every label, in creation order.
///
/// Labels that were never placed have no offset.
#[derive(Debug, Clone)]
pub struct AssembledCode {
    pub code: Vec<u8>,
    pub label_offsets: Vec<Option<u32>>,
}

/// x86-64 instruction encoder using iced-x86.
pub struct X64Encoder {
    /// Code assembler for generating instructions.
    assembler: CodeAssembler,
    /// Labels handed out so far; index is the label number.
    labels: Vec<CodeLabel>,
    /// Whether each label has been bound.
    placed: Vec<bool>,
}

impl X64Encoder {
    /// Create a new x86-64 encoder.
    pub fn new() -> Result<Self, EncodingError> {
        Ok(Self {
            assembler: CodeAssembler::new(64)?,
            labels: Vec::new(),
            placed: Vec::new(),
        })
    }

    fn gp(&self, reg: AsmReg) -> Result<AsmRegister64, EncodingError> {
        gp64_register(reg).ok_or(EncodingError::InvalidRegister)
    }

    fn xmm(&self, reg: AsmReg) -> Result<AsmRegisterXmm, EncodingError> {
        xmm_register(reg).ok_or(EncodingError::InvalidRegister)
    }

    fn imm(value: u32) -> Result<i32, EncodingError> {
        i32::try_from(value).map_err(|_| EncodingError::InvalidImmediate(value))
    }

    /// Create an unbound label, returning its number.
    pub fn create_label(&mut self) -> usize {
        self.labels.push(self.assembler.create_label());
        self.placed.push(false);
        self.labels.len() - 1
    }

    /// Bind label `idx` to the current position.
    ///
    /// The label is attached to a zero-sized instruction so several labels
    /// may share one position.
    pub fn place_label(&mut self, idx: usize) -> Result<(), EncodingError> {
        let label = self
            .labels
            .get_mut(idx)
            .ok_or_else(|| EncodingError::AssemblyError(format!("unknown label {idx}")))?;
        self.assembler.set_label(label)?;
        self.assembler.zero_bytes()?;
        self.placed[idx] = true;
        Ok(())
    }

    /// Emit PUSH instruction.
    pub fn push_reg(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        let src = self.gp(reg)?;
        self.assembler.push(src)?;
        Ok(())
    }

    /// Emit POP instruction.
    pub fn pop_reg(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        let dst = self.gp(reg)?;
        self.assembler.pop(dst)?;
        Ok(())
    }

    /// Emit MOV instruction - register to register.
    pub fn mov_reg_reg(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        let dst_reg = self.gp(dst)?;
        let src_reg = self.gp(src)?;
        self.assembler.mov(dst_reg, src_reg)?;
        Ok(())
    }

    /// Emit SUB instruction - immediate from register.
    pub fn sub_reg_imm(&mut self, dst: AsmReg, imm: u32) -> Result<(), EncodingError> {
        let dst_reg = self.gp(dst)?;
        self.assembler.sub(dst_reg, Self::imm(imm)?)?;
        Ok(())
    }

    /// Emit ADD instruction - immediate to register.
    pub fn add_reg_imm(&mut self, dst: AsmReg, imm: u32) -> Result<(), EncodingError> {
        let dst_reg = self.gp(dst)?;
        self.assembler.add(dst_reg, Self::imm(imm)?)?;
        Ok(())
    }

    /// Emit LEA dst, [base + offset].
    pub fn lea(&mut self, dst: AsmReg, base: AsmReg, offset: u32) -> Result<(), EncodingError> {
        let dst_reg = self.gp(dst)?;
        let base_reg = self.gp(base)?;
        self.assembler.lea(dst_reg, base_reg + Self::imm(offset)?)?;
        Ok(())
    }

    /// Emit MOV [base + offset], src for a GP register or MOVAPS for an XMM register.
    pub fn store_reg(&mut self, base: AsmReg, offset: u32, src: AsmReg) -> Result<(), EncodingError> {
        let base_reg = self.gp(base)?;
        let disp = Self::imm(offset)?;
        if src.is_xmm() {
            let src_reg = self.xmm(src)?;
            self.assembler.movaps(xmmword_ptr(base_reg + disp), src_reg)?;
        } else {
            let src_reg = self.gp(src)?;
            self.assembler.mov(qword_ptr(base_reg + disp), src_reg)?;
        }
        Ok(())
    }

    /// Emit MOV dst, [base + offset] for a GP register or MOVAPS for an XMM register.
    pub fn load_reg(&mut self, dst: AsmReg, base: AsmReg, offset: u32) -> Result<(), EncodingError> {
        let base_reg = self.gp(base)?;
        let disp = Self::imm(offset)?;
        if dst.is_xmm() {
            let dst_reg = self.xmm(dst)?;
            self.assembler.movaps(dst_reg, xmmword_ptr(base_reg + disp))?;
        } else {
            let dst_reg = self.gp(dst)?;
            self.assembler.mov(dst_reg, qword_ptr(base_reg + disp))?;
        }
        Ok(())
    }

    /// Emit RET instruction.
    pub fn ret(&mut self) -> Result<(), EncodingError> {
        self.assembler.ret()?;
        Ok(())
    }

    /// Emit a NOP instruction.
    pub fn nop(&mut self) -> Result<(), EncodingError> {
        self.assembler.nop()?;
        Ok(())
    }

    /// Emit INT3, used as filler for code that is never executed.
    pub fn int3(&mut self) -> Result<(), EncodingError> {
        self.assembler.int3()?;
        Ok(())
    }

    /// Assemble everything emitted so far at address 0.
    pub fn finalize(&mut self) -> Result<AssembledCode, EncodingError> {
        let result = self
            .assembler
            .assemble_options(0, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)?;

        let mut label_offsets = Vec::with_capacity(self.labels.len());
        for (label, &placed) in self.labels.iter().zip(&self.placed) {
            if !placed {
                label_offsets.push(None);
                continue;
            }
            let ip = result.label_ip(label)?;
            let offset = u32::try_from(ip).map_err(|_| {
                EncodingError::AssemblyError(format!("label offset {ip:#x} out of range"))
            })?;
            label_offsets.push(Some(offset));
        }

        Ok(AssembledCode {
            code: result.inner.code_buffer,
            label_offsets,
        })
    }
}
