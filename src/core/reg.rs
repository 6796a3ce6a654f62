//! Register handles shared by the unwind recorders and the x64 encoder.

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// General purpose register bank.
pub const GP_BANK: RegBank = 0;

/// Vector (XMM) register bank.
pub const XMM_BANK: RegBank = 1;

/// Combined register identifier.
///
/// GP ids follow the hardware encoding order (`rax`, `rcx`, `rdx`, `rbx`,
/// `rsp`, `rbp`, `rsi`, `rdi`, `r8`..`r15`), which is also the register
/// number unwind codes use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const RAX: AsmReg = AsmReg::new(GP_BANK, 0);
    pub const RCX: AsmReg = AsmReg::new(GP_BANK, 1);
    pub const RDX: AsmReg = AsmReg::new(GP_BANK, 2);
    pub const RBX: AsmReg = AsmReg::new(GP_BANK, 3);
    pub const RSP: AsmReg = AsmReg::new(GP_BANK, 4);
    pub const RBP: AsmReg = AsmReg::new(GP_BANK, 5);
    pub const RSI: AsmReg = AsmReg::new(GP_BANK, 6);
    pub const RDI: AsmReg = AsmReg::new(GP_BANK, 7);
    pub const R12: AsmReg = AsmReg::new(GP_BANK, 12);
    pub const R13: AsmReg = AsmReg::new(GP_BANK, 13);
    pub const R14: AsmReg = AsmReg::new(GP_BANK, 14);
    pub const R15: AsmReg = AsmReg::new(GP_BANK, 15);

    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    /// Create a general purpose register handle.
    pub const fn gp(id: RegId) -> Self {
        Self::new(GP_BANK, id)
    }

    /// Create an XMM register handle.
    pub const fn xmm(id: RegId) -> Self {
        Self::new(XMM_BANK, id)
    }

    pub fn is_gp(&self) -> bool {
        self.bank == GP_BANK
    }

    pub fn is_xmm(&self) -> bool {
        self.bank == XMM_BANK
    }

    /// Conventional assembly name, used in logs and the trace tool.
    pub fn name(&self) -> &'static str {
        const GP_NAMES: [&str; 16] = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi",
            "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
        ];
        const XMM_NAMES: [&str; 16] = [
            "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
            "xmm8", "xmm9", "xmm10", "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
        ];
        let table = match self.bank {
            GP_BANK => &GP_NAMES,
            XMM_BANK => &XMM_NAMES,
            _ => return "?",
        };
        table.get(self.id as usize).copied().unwrap_or("?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_names() {
        assert_eq!(AsmReg::RBP.name(), "rbp");
        assert_eq!(AsmReg::gp(13).name(), "r13");
        assert_eq!(AsmReg::xmm(6).name(), "xmm6");
        assert_eq!(AsmReg::new(3, 0).name(), "?");
        assert_eq!(AsmReg::gp(16).name(), "?");
    }

    #[test]
    fn test_bank_predicates() {
        assert!(AsmReg::RBX.is_gp());
        assert!(!AsmReg::RBX.is_xmm());
        assert!(AsmReg::xmm(15).is_xmm());
    }
}
