// This module implements the AAPCS64 calling convention with the SVE extension for the
// values a translated signature can carry. Integer scalars and pointers use X0-X7
// (NGRN). Floating-point scalars, short vectors and homogeneous vector tuples share
// V0-V7 (NSRN); a tuple needs all of its members in consecutive registers, otherwise
// NSRN is exhausted and the whole tuple goes to the stack. Scalable vectors use Z0-Z7
// and share NSRN with the V registers, while predicates use P0-P3. Scalable values that
// do not fit are never placed in memory by value; they are passed by reference, with
// the pointer taking the next X register or a stack slot. Results use X0, V0-V3, Z0-Z3
// or P0.

//! AArch64 procedure call standard implementation.

use crate::core::abi::{align_up, ArgAttribute, CCAssigner, CCAssignment};
use crate::core::catalog::{RegClass, VectorTypeSpec};
use crate::core::register_file::{AsmReg, BANK_GP, BANK_PRED, BANK_VEC};

/// AAPCS64 calling convention assigner.
pub struct Aapcs64Assigner {
    /// Next general-purpose register number.
    ngrn: u8,
    /// Next SIMD and floating-point register number.
    nsrn: u8,
    /// Next scalable predicate register number.
    nprn: u8,
    /// Next stacked argument address.
    nsaa: u32,
}

impl Aapcs64Assigner {
    const GP_ARG_COUNT: u8 = 8;
    const VEC_ARG_COUNT: u8 = 8;
    const PRED_ARG_COUNT: u8 = 4;

    pub fn new() -> Self {
        Self {
            ngrn: 0,
            nsrn: 0,
            nprn: 0,
            nsaa: 0,
        }
    }

    fn assign_gp(&mut self, arg: &mut CCAssignment) {
        if self.ngrn < Self::GP_ARG_COUNT {
            arg.reg = Some(AsmReg::gp(self.ngrn));
            self.ngrn += 1;
        } else {
            self.assign_stack(arg);
        }
    }

    /// Pass a scalable value that missed its registers as a pointer.
    fn assign_by_ref(&mut self, arg: &mut CCAssignment) {
        *arg = CCAssignment::new(BANK_GP, 8, 8);
        arg.attribute = ArgAttribute::ByRef;
        self.assign_gp(arg);
    }

    fn assign_stack(&mut self, arg: &mut CCAssignment) {
        let align = arg.align.clamp(8, 16);
        self.nsaa = align_up(self.nsaa, align);
        arg.stack_off = Some(self.nsaa);
        self.nsaa += align_up(arg.size, 8);
    }
}

impl Default for Aapcs64Assigner {
    fn default() -> Self {
        Self::new()
    }
}

impl CCAssigner for Aapcs64Assigner {
    fn classify(&self, ty: &VectorTypeSpec) -> Result<CCAssignment, String> {
        let consecutive = ty.tuple as u32;
        match ty.class {
            RegClass::General => Ok(CCAssignment::new(BANK_GP, ty.size, ty.align)),
            RegClass::Vector => {
                let mut cca =
                    CCAssignment::new(BANK_VEC, ty.size, ty.align).with_consecutive(consecutive);
                if ty.scalable {
                    cca.attribute = ArgAttribute::Scalable;
                }
                Ok(cca)
            }
            RegClass::Predicate => {
                let mut cca =
                    CCAssignment::new(BANK_PRED, ty.size, ty.align).with_consecutive(consecutive);
                cca.attribute = ArgAttribute::Scalable;
                Ok(cca)
            }
            RegClass::Tile => Err(format!("tile type `{}` cannot be passed", ty.name)),
        }
    }

    fn assign_arg(&mut self, arg: &mut CCAssignment) -> Result<(), String> {
        let n = arg.consecutive as u8;
        match arg.bank {
            BANK_GP => self.assign_gp(arg),
            BANK_VEC => {
                if self.nsrn + n <= Self::VEC_ARG_COUNT {
                    arg.reg = Some(AsmReg::vec(self.nsrn));
                    self.nsrn += n;
                } else if arg.attribute == ArgAttribute::Scalable {
                    self.assign_by_ref(arg);
                } else {
                    // Never split: the whole aggregate goes to memory.
                    self.nsrn = Self::VEC_ARG_COUNT;
                    self.assign_stack(arg);
                }
            }
            BANK_PRED => {
                if self.nprn + n <= Self::PRED_ARG_COUNT {
                    arg.reg = Some(AsmReg::pred(self.nprn));
                    self.nprn += n;
                } else {
                    self.assign_by_ref(arg);
                }
            }
            bank => return Err(format!("register bank {bank} is not an argument bank")),
        }
        Ok(())
    }

    fn assign_ret(&mut self, arg: &mut CCAssignment) -> Result<(), String> {
        arg.reg = Some(match arg.bank {
            BANK_GP => AsmReg::gp(0),
            BANK_VEC => AsmReg::vec(0),
            BANK_PRED => AsmReg::pred(0),
            bank => return Err(format!("register bank {bank} cannot hold a result")),
        });
        Ok(())
    }

    fn reset(&mut self) {
        self.ngrn = 0;
        self.nsrn = 0;
        self.nprn = 0;
        self.nsaa = 0;
    }

    fn get_stack_size(&self) -> u32 {
        align_up(self.nsaa, 16)
    }
}
