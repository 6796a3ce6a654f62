// This module encodes a recorded x64 prolog as a Windows x64 UNWIND_INFO record. Each recorded
// operation is turned into one unwind code (one to three 16-bit slots) tagged with the prolog
// offset just past its instruction. Offsets are derived by encoding the canonical instruction
// for each operation with iced-x86, so they are exact as long as the prolog consists of those
// instructions in the recorded order. Codes are stored last-operation-first, as the unwinder
// replays them backwards, and the slot array is padded to an even length. Cold code gets a
// header-only record flagged as chained; the host links it to the hot record.

//! Windows x64 `UNWIND_INFO` encoding.

use iced_x86::code_asm::*;
use iced_x86::IcedError;

use super::encoder::{gp64_register, xmm_register};
use crate::core::error::{UnwindError, UnwindResult};
use crate::core::reg::AsmReg;

/// `UNWIND_INFO` version emitted.
pub const UNWIND_INFO_VERSION: u8 = 1;

/// Size of the fixed `UNWIND_INFO` header.
pub const UNWIND_INFO_HEADER_SIZE: usize = 4;

/// Record is chained to another function entry.
pub const UNW_FLAG_CHAININFO: u8 = 0x4;

/// Largest frame register offset expressible in the header.
pub const MAX_FRAME_OFFSET: u32 = 240;

const UWOP_PUSH_NONVOL: u8 = 0;
const UWOP_ALLOC_LARGE: u8 = 1;
const UWOP_ALLOC_SMALL: u8 = 2;
const UWOP_SET_FPREG: u8 = 3;
const UWOP_SAVE_NONVOL: u8 = 4;
const UWOP_SAVE_NONVOL_FAR: u8 = 5;
const UWOP_SAVE_XMM128: u8 = 8;
const UWOP_SAVE_XMM128_FAR: u8 = 9;

/// One recorded prolog operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindOp {
    PushNonvol { reg: AsmReg },
    AllocStack { size: u32 },
    SetFrameReg { reg: AsmReg, offset: u32 },
    SaveReg { reg: AsmReg, offset: u32 },
}

impl UnwindOp {
    /// Number of 16-bit slots the operation's unwind code occupies.
    pub fn slot_count(&self) -> usize {
        match *self {
            UnwindOp::PushNonvol { .. } | UnwindOp::SetFrameReg { .. } => 1,
            UnwindOp::AllocStack { size } => {
                if size <= 128 {
                    1
                } else if size <= 0x7FFF8 {
                    2
                } else {
                    3
                }
            }
            UnwindOp::SaveReg { reg, offset } => {
                let scale = if reg.is_xmm() { 16 } else { 8 };
                if offset % scale == 0 && offset / scale <= 0xFFFF {
                    2
                } else {
                    3
                }
            }
        }
    }

    /// Length of the canonical instruction performing the operation.
    pub fn instruction_len(&self) -> UnwindResult<u32> {
        let mut asm = CodeAssembler::new(64).map_err(encoding_error)?;
        let emitted = match *self {
            UnwindOp::PushNonvol { reg } => asm.push(gp(reg)?),
            UnwindOp::AllocStack { size } => asm.sub(rsp, imm32(size)?),
            UnwindOp::SetFrameReg { reg, offset: 0 } => asm.mov(gp(reg)?, rsp),
            UnwindOp::SetFrameReg { reg, offset } => asm.lea(gp(reg)?, rsp + imm32(offset)?),
            UnwindOp::SaveReg { reg, offset } if reg.is_xmm() => {
                asm.movaps(xmmword_ptr(rsp + imm32(offset)?), xmm(reg)?)
            }
            UnwindOp::SaveReg { reg, offset } => asm.mov(qword_ptr(rsp + imm32(offset)?), gp(reg)?),
        };
        emitted.map_err(encoding_error)?;

        let bytes = asm.assemble(0).map_err(encoding_error)?;
        Ok(bytes.len() as u32)
    }
}

/// Slot count of the whole code array, before padding.
pub fn code_slot_count(ops: &[UnwindOp]) -> usize {
    ops.iter().map(UnwindOp::slot_count).sum()
}

/// Byte size of the hot-region record for `ops`.
pub fn unwind_info_size(ops: &[UnwindOp]) -> usize {
    let slots = code_slot_count(ops);
    UNWIND_INFO_HEADER_SIZE + 2 * (slots + slots % 2)
}

/// Encode the prolog described by `ops`.
pub fn encode_unwind_info(ops: &[UnwindOp]) -> UnwindResult<Vec<u8>> {
    let mut groups: Vec<Vec<u16>> = Vec::with_capacity(ops.len());
    let mut prolog_offset: u32 = 0;
    let mut frame: Option<(AsmReg, u32)> = None;

    for op in ops {
        prolog_offset += op.instruction_len()?;
        let code_offset = u8::try_from(prolog_offset).map_err(|_| UnwindError::Encoding {
            reason: format!("prolog is longer than 255 bytes ({prolog_offset})"),
        })?;

        let group = match *op {
            UnwindOp::PushNonvol { reg } => vec![slot(code_offset, UWOP_PUSH_NONVOL, reg.id)],
            UnwindOp::AllocStack { size } => alloc_codes(code_offset, size)?,
            UnwindOp::SetFrameReg { reg, offset } => {
                if frame.is_some() {
                    return Err(UnwindError::Encoding {
                        reason: "frame register established twice".to_string(),
                    });
                }
                if offset % 16 != 0 || offset > MAX_FRAME_OFFSET {
                    return Err(UnwindError::Encoding {
                        reason: format!("frame offset {offset} is not a multiple of 16 up to 240"),
                    });
                }
                frame = Some((reg, offset));
                vec![slot(code_offset, UWOP_SET_FPREG, 0)]
            }
            UnwindOp::SaveReg { reg, offset } if reg.is_xmm() => {
                save_codes(code_offset, UWOP_SAVE_XMM128, UWOP_SAVE_XMM128_FAR, reg, offset, 16)
            }
            UnwindOp::SaveReg { reg, offset } => {
                save_codes(code_offset, UWOP_SAVE_NONVOL, UWOP_SAVE_NONVOL_FAR, reg, offset, 8)
            }
        };
        debug_assert_eq!(group.len(), op.slot_count());
        groups.push(group);
    }

    let slots: Vec<u16> = groups.into_iter().rev().flatten().collect();
    let count = u8::try_from(slots.len()).map_err(|_| UnwindError::Encoding {
        reason: format!("{} unwind code slots exceed the limit of 255", slots.len()),
    })?;
    let (frame_reg, frame_offset) = frame.map_or((0, 0), |(reg, offset)| (reg.id, (offset / 16) as u8));

    let mut bytes = Vec::with_capacity(unwind_info_size(ops));
    bytes.push(UNWIND_INFO_VERSION);
    bytes.push(prolog_offset as u8);
    bytes.push(count);
    bytes.push(frame_reg | (frame_offset << 4));
    for value in &slots {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    if slots.len() % 2 == 1 {
        bytes.extend_from_slice(&[0, 0]);
    }
    Ok(bytes)
}

/// Header-only record for the cold part of a split function.
pub fn encode_chained_unwind_info() -> Vec<u8> {
    vec![UNWIND_INFO_VERSION | (UNW_FLAG_CHAININFO << 3), 0, 0, 0]
}

fn slot(code_offset: u8, op: u8, info: u8) -> u16 {
    u16::from_le_bytes([code_offset, op | (info << 4)])
}

fn alloc_codes(code_offset: u8, size: u32) -> UnwindResult<Vec<u16>> {
    if size == 0 || size % 8 != 0 {
        return Err(UnwindError::Encoding {
            reason: format!("stack allocation of {size} bytes is not a positive multiple of 8"),
        });
    }
    Ok(if size <= 128 {
        vec![slot(code_offset, UWOP_ALLOC_SMALL, (size / 8 - 1) as u8)]
    } else if size <= 0x7FFF8 {
        vec![slot(code_offset, UWOP_ALLOC_LARGE, 0), (size / 8) as u16]
    } else {
        vec![slot(code_offset, UWOP_ALLOC_LARGE, 1), size as u16, (size >> 16) as u16]
    })
}

fn save_codes(code_offset: u8, near: u8, far: u8, reg: AsmReg, offset: u32, scale: u32) -> Vec<u16> {
    if offset % scale == 0 && offset / scale <= 0xFFFF {
        vec![slot(code_offset, near, reg.id), (offset / scale) as u16]
    } else {
        vec![slot(code_offset, far, reg.id), offset as u16, (offset >> 16) as u16]
    }
}

fn gp(reg: AsmReg) -> UnwindResult<AsmRegister64> {
    gp64_register(reg).ok_or_else(|| UnwindError::Encoding {
        reason: format!("{} is not a general purpose register", reg.name()),
    })
}

fn xmm(reg: AsmReg) -> UnwindResult<AsmRegisterXmm> {
    xmm_register(reg).ok_or_else(|| UnwindError::Encoding {
        reason: format!("{} is not an XMM register", reg.name()),
    })
}

fn imm32(value: u32) -> UnwindResult<i32> {
    i32::try_from(value).map_err(|_| UnwindError::Encoding {
        reason: format!("immediate {value} does not fit in 32 bits"),
    })
}

fn encoding_error(err: IcedError) -> UnwindError {
    UnwindError::Encoding { reason: err.to_string() }
}
