// This module implements the System V AMD64 calling convention for the values a
// translated signature can carry. Integer scalars, masks, booleans and pointers pass in
// RDI, RSI, RDX, RCX, R8, R9; float, double and vectors pass in XMM0-XMM7 (the YMM/ZMM
// views when the vector is wider than 16 bytes). Which vector widths travel in registers
// depends on the machine options: without AVX only 16-byte vectors do, with AVX 32-byte
// vectors do, and with AVX-512 64-byte vectors do. Wider vectors are passed by value on
// the stack at their natural alignment and returned through a hidden result pointer in
// RDI, which is assigned before any argument. Arguments that run out of registers go to
// 8-byte aligned stack slots in declaration order.

//! System V x86-64 calling convention implementation.

use crate::core::abi::{align_up, ArgAttribute, CCAssigner, CCAssignment};
use crate::core::catalog::{RegClass, VectorTypeSpec};
use crate::core::register_file::{AsmReg, BANK_GP, BANK_VEC};

/// System V x86-64 calling convention assigner.
///
/// Implements the standard Unix/Linux x86-64 ABI:
/// - First 6 integer args in RDI, RSI, RDX, RCX, R8, R9
/// - First 8 floating-point and vector args in XMM0-XMM7
/// - Remaining args on stack
/// - Return values in RAX (int) or XMM0 (float, vector)
pub struct SysVAssigner {
    /// Widest vector passed in a register, in bytes.
    native_width: u32,
    /// Current GP argument register index.
    gp_cnt: usize,
    /// Current XMM argument register index.
    xmm_cnt: usize,
    /// Current stack offset for arguments.
    stack: u32,
}

impl SysVAssigner {
    /// System V x86-64 GP argument registers.
    pub const GP_ARG_REGS: [AsmReg; 6] = [
        AsmReg::gp(7), // RDI
        AsmReg::gp(6), // RSI
        AsmReg::gp(2), // RDX
        AsmReg::gp(1), // RCX
        AsmReg::gp(8), // R8
        AsmReg::gp(9), // R9
    ];

    /// System V x86-64 XMM argument registers.
    pub const XMM_ARG_REGS: [AsmReg; 8] = [
        AsmReg::vec(0),
        AsmReg::vec(1),
        AsmReg::vec(2),
        AsmReg::vec(3),
        AsmReg::vec(4),
        AsmReg::vec(5),
        AsmReg::vec(6),
        AsmReg::vec(7),
    ];

    const RET_GP_REG: AsmReg = AsmReg::gp(0); // RAX
    const RET_XMM_REG: AsmReg = AsmReg::vec(0); // XMM0

    /// Create an assigner for the given native vector width (16, 32 or 64).
    pub fn new(native_width: u32) -> Self {
        Self {
            native_width,
            gp_cnt: 0,
            xmm_cnt: 0,
            stack: 0,
        }
    }

    fn assign_stack(&mut self, arg: &mut CCAssignment) {
        let align = arg.align.max(8);
        self.stack = align_up(self.stack, align);
        arg.stack_off = Some(self.stack);
        self.stack += align_up(arg.size, 8);
    }
}

impl CCAssigner for SysVAssigner {
    fn classify(&self, ty: &VectorTypeSpec) -> Result<CCAssignment, String> {
        match ty.class {
            RegClass::General => Ok(CCAssignment::new(BANK_GP, ty.size, ty.align)),
            RegClass::Vector if ty.is_scalar() || ty.size <= self.native_width => {
                Ok(CCAssignment::new(BANK_VEC, ty.size, ty.align))
            }
            RegClass::Vector => {
                let mut cca = CCAssignment::new(BANK_VEC, ty.size, ty.align);
                cca.attribute = ArgAttribute::ByVal;
                Ok(cca)
            }
            RegClass::Predicate | RegClass::Tile => {
                Err(format!("`{}` has no x86-64 register class", ty.name))
            }
        }
    }

    fn assign_arg(&mut self, arg: &mut CCAssignment) -> Result<(), String> {
        if arg.attribute == ArgAttribute::ByVal {
            // Wider than the vector registers: a copy on the stack.
            self.assign_stack(arg);
            return Ok(());
        }

        match arg.bank {
            BANK_GP if self.gp_cnt < Self::GP_ARG_REGS.len() => {
                arg.reg = Some(Self::GP_ARG_REGS[self.gp_cnt]);
                self.gp_cnt += 1;
            }
            BANK_VEC if self.xmm_cnt < Self::XMM_ARG_REGS.len() => {
                arg.reg = Some(Self::XMM_ARG_REGS[self.xmm_cnt]);
                self.xmm_cnt += 1;
            }
            _ => self.assign_stack(arg),
        }
        Ok(())
    }

    fn assign_ret(&mut self, arg: &mut CCAssignment) -> Result<(), String> {
        if arg.attribute == ArgAttribute::ByVal {
            // sret is always the first argument and goes in RDI
            arg.attribute = ArgAttribute::StructRet;
            arg.reg = Some(Self::GP_ARG_REGS[0]);
            self.gp_cnt = 1;
            return Ok(());
        }
        arg.reg = Some(match arg.bank {
            BANK_GP => Self::RET_GP_REG,
            _ => Self::RET_XMM_REG,
        });
        Ok(())
    }

    fn reset(&mut self) {
        self.gp_cnt = 0;
        self.xmm_cnt = 0;
        self.stack = 0;
    }

    fn get_stack_size(&self) -> u32 {
        // Align stack to 16-byte boundary as required by System V ABI
        align_up(self.stack, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::Arch;
    use crate::core::catalog::{self, lookup};

    fn assign(assigner: &mut SysVAssigner, name: &str) -> CCAssignment {
        let ty = if name == catalog::POINTER_TYPE {
            catalog::pointer(Arch::X86_64)
        } else {
            lookup(Arch::X86_64, name).unwrap()
        };
        let mut cca = assigner.classify(ty).unwrap();
        assigner.assign_arg(&mut cca).unwrap();
        cca
    }

    #[test]
    fn test_gp_register_order() {
        let mut cc = SysVAssigner::new(16);
        let regs: Vec<_> = (0..6)
            .map(|_| assign(&mut cc, "int64_t").reg.unwrap().id)
            .collect();
        assert_eq!(regs, vec![7, 6, 2, 1, 8, 9]);

        let spilled = assign(&mut cc, "int32_t");
        assert_eq!(spilled.reg, None);
        assert_eq!(spilled.stack_off, Some(0));
        let spilled = assign(&mut cc, catalog::POINTER_TYPE);
        assert_eq!(spilled.stack_off, Some(8));
        assert_eq!(cc.get_stack_size(), 16);
    }

    #[test]
    fn test_vector_registers_and_overflow() {
        let mut cc = SysVAssigner::new(32);
        for i in 0..8 {
            let cca = assign(&mut cc, "__m256");
            assert_eq!(cca.reg, Some(AsmReg::vec(i)));
        }
        let spilled = assign(&mut cc, "__m256");
        assert_eq!(spilled.reg, None);
        assert_eq!(spilled.stack_off, Some(0));
        let float = assign(&mut cc, "float");
        assert_eq!(float.stack_off, Some(32));
        assert_eq!(cc.get_stack_size(), 48);
    }

    #[test]
    fn test_avx512_by_value_without_evex() {
        let mut cc = SysVAssigner::new(32);
        cc.stack = 8;
        let cca = assign(&mut cc, "__m512");
        assert_eq!(cca.attribute, ArgAttribute::ByVal);
        assert_eq!(cca.stack_off, Some(64));
        let next = assign(&mut cc, "__m128");
        assert_eq!(next.reg, Some(AsmReg::vec(0)));
    }

    #[test]
    fn test_return_registers() {
        let mut cc = SysVAssigner::new(64);
        let mut ret = cc.classify(lookup(Arch::X86_64, "__m512i").unwrap()).unwrap();
        cc.assign_ret(&mut ret).unwrap();
        assert_eq!(ret.reg, Some(AsmReg::vec(0)));

        let mut ret = cc.classify(lookup(Arch::X86_64, "__mmask64").unwrap()).unwrap();
        cc.assign_ret(&mut ret).unwrap();
        assert_eq!(ret.reg, Some(AsmReg::gp(0)));
    }
}
