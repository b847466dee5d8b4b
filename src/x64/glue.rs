// This module renders the amd64 call glue between Go ABI0 and the System V placement of
// a signature. Go passes every argument and result on its stack, so the prologue loads
// each register-placed argument from its Go frame slot, copies stack-placed arguments
// into an outgoing area, points RDI at the result slot for indirect returns, and then
// switches SP to a 32-byte aligned C stack inside the frame. The original SP lives in
// R12, which the body preserves as a callee-saved register.
//
// The body is entered through a raw trampoline: a CALL to the body, then a JMP over the
// body and its constants to the epilogue. PCALIGN and 22 bytes of padding make the body
// start 32-byte aligned, which is what the constant pool placement assumes.

//! amd64 Go ABI0 glue.

use crate::core::arch::Arch;
use crate::core::catalog::{ElementType, VectorTypeSpec};
use crate::core::emitter::{constant_segments, write_data, FunctionUnit, GlueWriter, GoSlot};
use crate::core::error::{TranslateError, TranslateResult};
use crate::core::abi::{align_up, PassingConvention};
use crate::core::register_file::{AsmReg, BANK_GP, BANK_VEC};
use crate::x64::body;
use std::fmt::Write as _;

/// Go names of the general-purpose registers, by encoding.
const GP_NAMES: [&str; 16] = [
    "AX", "CX", "DX", "BX", "SP", "BP", "SI", "DI", "R8", "R9", "R10", "R11", "R12", "R13",
    "R14", "R15",
];

/// Bytes from the aligned trampoline start to the body.
const BODY_OFFSET: usize = 32;
/// CALL rel32 plus JMP rel32.
const TRAMPOLINE_LEN: usize = 10;

/// Glue writer for amd64.
pub struct Amd64Glue;

fn gp(reg: AsmReg) -> &'static str {
    GP_NAMES[reg.id as usize & 15]
}

fn vector(reg: AsmReg, bytes: u32) -> String {
    match bytes {
        64 => format!("Z{}", reg.id),
        32 => format!("Y{}", reg.id),
        _ => format!("X{}", reg.id),
    }
}

fn gp_load(ty: &VectorTypeSpec) -> &'static str {
    let signed = matches!(ty.element, ElementType::I8 | ElementType::I16 | ElementType::I32);
    match (ty.size, signed) {
        (1, true) => "MOVBQSX",
        (1, false) => "MOVBQZX",
        (2, true) => "MOVWQSX",
        (2, false) => "MOVWQZX",
        (4, true) => "MOVLQSX",
        (4, false) => "MOVL",
        _ => "MOVQ",
    }
}

fn gp_store(size: u32) -> &'static str {
    match size {
        1 => "MOVB",
        2 => "MOVW",
        4 => "MOVL",
        _ => "MOVQ",
    }
}

/// Move between memory and a vector register, for either direction.
fn vector_move(ty: &VectorTypeSpec) -> &'static str {
    if ty.is_scalar() {
        return match ty.element {
            ElementType::F64 => "MOVSD",
            _ => "MOVSS",
        };
    }
    match ty.size {
        64 => "VMOVDQU64",
        32 => "VMOVDQU",
        8 => "MOVQ",
        _ => "MOVOU",
    }
}

fn unplaceable(unit: &FunctionUnit, what: String, reg: AsmReg) -> TranslateError {
    TranslateError::UnsupportedPlacement {
        function: unit.sig.name.clone(),
        what,
        reason: format!("register bank {} has no amd64 glue", reg.bank),
    }
}

/// Copy `slot` to `dest_offset(R13)` through AX.
fn copy_to_stack(out: &mut String, slot: &GoSlot, dest_offset: u32) {
    let mut delta = 0;
    while delta < slot.size {
        let chunk = match slot.size - delta {
            8.. => 8,
            4..=7 => 4,
            2..=3 => 2,
            _ => 1,
        };
        let op = gp_store(chunk);
        let _ = writeln!(out, "\t{op} {}, AX", slot.operand(delta));
        let _ = writeln!(out, "\t{op} AX, {}(R13)", dest_offset + delta);
        delta += chunk;
    }
}

/// Whether a YMM or ZMM register carries a value across the call.
fn uses_wide_registers(unit: &FunctionUnit) -> bool {
    unit.placement
        .params
        .iter()
        .chain(&unit.placement.ret)
        .any(|p| p.convention == PassingConvention::Register && !p.ty.is_scalar() && p.ty.size >= 32)
}

impl GlueWriter for Amd64Glue {
    fn arch(&self) -> Arch {
        Arch::X86_64
    }

    fn body_stack_depth(&self, body: &[u8]) -> u32 {
        body::stack_depth(body)
    }

    fn frame_size(&self, unit: &FunctionUnit) -> u32 {
        // Return address, alignment slack and the body's own stack.
        align_up(unit.placement.stack_size + unit.stack_depth + 8 + 32, 8)
    }

    fn gen_prologue(&self, unit: &FunctionUnit, _frame_size: u32, out: &mut String) -> TranslateResult<()> {
        let _ = writeln!(out, "\tMOVQ SP, R12");
        let _ = writeln!(out, "\tLEAQ {}(SP), R13", unit.stack_depth + 8 + 31);
        let _ = writeln!(out, "\tANDQ $-32, R13");

        for (placement, slot) in unit.placement.params.iter().zip(&unit.frame.params) {
            if placement.convention == PassingConvention::Memory {
                copy_to_stack(out, slot, placement.stack_offset.unwrap_or(0));
            }
        }

        for (index, (placement, slot)) in unit.placement.params.iter().zip(&unit.frame.params).enumerate() {
            let Some(&reg) = placement.regs.first() else {
                continue;
            };
            let ty = placement.ty;
            match reg.bank {
                BANK_GP => {
                    let _ = writeln!(out, "\t{} {}, {}", gp_load(ty), slot.operand(0), gp(reg));
                }
                BANK_VEC => {
                    let _ = writeln!(
                        out,
                        "\t{} {}, {}",
                        vector_move(ty),
                        slot.operand(0),
                        vector(reg, ty.size)
                    );
                }
                _ => return Err(unplaceable(unit, format!("parameter {index}"), reg)),
            }
        }

        if let (Some(reg), Some(result)) = (unit.placement.hidden_return, &unit.frame.result) {
            let _ = writeln!(out, "\tLEAQ {}, {}", result.operand(0), gp(reg));
        }
        let _ = writeln!(out, "\tMOVQ R13, SP");
        Ok(())
    }

    fn gen_image(&self, unit: &FunctionUnit, out: &mut String) -> TranslateResult<()> {
        let len = unit.image.bytes.len();
        let skip = i32::try_from(BODY_OFFSET - TRAMPOLINE_LEN + len).map_err(|_| {
            TranslateError::UnsupportedPlacement {
                function: unit.sig.name.clone(),
                what: "body".to_string(),
                reason: format!("{len} bytes do not fit a rel32 jump"),
            }
        })?;
        let _ = writeln!(out, "\tPCALIGN ${}", BODY_OFFSET);
        let _ = writeln!(
            out,
            "\tBYTE $0xe8; LONG ${} // call body",
            BODY_OFFSET - 5
        );
        let _ = writeln!(out, "\tBYTE $0xe9; LONG ${skip} // jmp past constants");
        write_data(out, &[0xcc; BODY_OFFSET - TRAMPOLINE_LEN], None);
        body::write_body(out, &unit.image.bytes[..unit.image.body_len]);
        for (bytes, label) in constant_segments(unit.image) {
            for (i, row) in bytes.chunks(8).enumerate() {
                write_data(out, row, label.filter(|_| i == 0));
            }
        }
        Ok(())
    }

    fn gen_epilogue(&self, unit: &FunctionUnit, _frame_size: u32, out: &mut String) -> TranslateResult<()> {
        let _ = writeln!(out, "\tMOVQ R12, SP");
        if let (Some(ret), Some(result)) = (&unit.placement.ret, &unit.frame.result) {
            if ret.convention == PassingConvention::Register {
                let reg = ret.regs.first().copied().unwrap_or(AsmReg::gp(0));
                match reg.bank {
                    BANK_GP => {
                        let _ = writeln!(
                            out,
                            "\t{} {}, {}",
                            gp_store(ret.ty.size),
                            gp(reg),
                            result.operand(0)
                        );
                    }
                    BANK_VEC => {
                        let _ = writeln!(
                            out,
                            "\t{} {}, {}",
                            vector_move(ret.ty),
                            vector(reg, ret.ty.size),
                            result.operand(0)
                        );
                    }
                    _ => return Err(unplaceable(unit, "return value".to_string(), reg)),
                }
            }
        }
        if uses_wide_registers(unit) {
            let _ = writeln!(out, "\tVZEROUPPER");
        }
        let _ = writeln!(out, "\tRET");
        Ok(())
    }
}
