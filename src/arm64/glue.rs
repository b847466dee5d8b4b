// This module renders the arm64 call glue between Go ABI0 and the AAPCS64 placement of a
// signature. The prologue keeps Go's RSP in R19 and the link register in R21, both
// callee-saved in the body, copies stack-placed arguments into an outgoing area at the
// top of the frame, and loads register arguments from their Go slots. Scalable vectors
// and predicates arrive as pointers and are loaded with SVE `ldr z`/`ldr p`; when they
// are passed by reference the Go pointer itself is forwarded, and the callee may write
// through it. A scalable result is stored through the trailing `out` pointer. The body is entered with a raw BL
// and left with a B over the body and its constants; PCALIGN and two NOPs make the body
// start 16-byte aligned.
//
// For tile-output functions the glue also protects the caller's ZA state. It reads SVCR
// into the frame; if ZA is live it stores every ZA row into a 64 KiB frame buffer and
// turns ZA off before the call. After the result stores it reloads ZA and re-enters
// streaming mode as SVCR recorded.

//! arm64 Go ABI0 glue.

use crate::arm64::insn::{self, BranchKind};
use crate::core::abi::{align_up, PassingConvention};
use crate::core::arch::Arch;
use crate::core::catalog::{ElementType, RegClass, VectorTypeSpec};
use crate::core::emitter::{write_constants, FunctionUnit, GlueWriter, GoSlot};
use crate::core::error::{TranslateError, TranslateResult};
use crate::core::register_file::{AsmReg, BANK_GP, BANK_PRED, BANK_VEC};
use std::fmt::Write as _;

/// Glue writer for arm64.
pub struct Arm64Glue;

/// First frame byte the glue may use; 0(RSP) holds the saved link register.
const FRAME_BASE: u32 = 16;
/// SVCR slot plus one row per byte of the largest streaming vector length.
const ZA_SAVE_AREA: u32 = 16 + 256 * 256;
/// BL, B and two NOPs.
const BODY_OFFSET: i64 = 16;

const MRS_X9_SVCR: u32 = 0xd53b_4249;
const RDSVL_X9_1: u32 = 0x04bf_5829;
/// `str za[w12, 0], [x10]`
const STR_ZA_ROW: u32 = 0xe120_0140;
/// `ldr za[w12, 0], [x10]`
const LDR_ZA_ROW: u32 = 0xe100_0140;

const LDR_Z: u32 = 0x8580_4000;
const LDR_P: u32 = 0x8580_0000;
const STR_Z: u32 = 0xe580_4000;
const STR_P: u32 = 0xe580_0000;

/// SVE fill/spill of register `t` at `[x9, #index, mul vl]`.
fn sve_transfer(base: u32, t: u32, index: u32) -> u32 {
    base | ((index >> 3) & 0x3f) << 16 | (index & 7) << 10 | 9 << 5 | (t & 0x1f)
}

fn sve_comment(base: u32, t: u32, index: u32) -> String {
    let (op, reg) = match base {
        LDR_Z => ("ldr", "z"),
        LDR_P => ("ldr", "p"),
        STR_Z => ("str", "z"),
        _ => ("str", "p"),
    };
    if index == 0 {
        format!("{op} {reg}{t}, [x9]")
    } else {
        format!("{op} {reg}{t}, [x9, #{index}, mul vl]")
    }
}

fn signed(ty: &VectorTypeSpec) -> bool {
    matches!(ty.element, ElementType::I8 | ElementType::I16 | ElementType::I32)
}

fn gp_load(size: u32, signed: bool) -> &'static str {
    match (size, signed) {
        (1, true) => "MOVB",
        (1, false) => "MOVBU",
        (2, true) => "MOVH",
        (2, false) => "MOVHU",
        (4, true) => "MOVW",
        (4, false) => "MOVWU",
        _ => "MOVD",
    }
}

fn gp_store(size: u32) -> &'static str {
    match size {
        1 => "MOVB",
        2 => "MOVH",
        4 => "MOVW",
        _ => "MOVD",
    }
}

fn fp_move(bytes: u32) -> &'static str {
    match bytes {
        4 => "FMOVS",
        8 => "FMOVD",
        _ => "FMOVQ",
    }
}

fn is_scalable(ty: &VectorTypeSpec) -> bool {
    ty.scalable || ty.class == RegClass::Predicate
}

fn unplaceable(unit: &FunctionUnit, what: String, reason: String) -> TranslateError {
    TranslateError::UnsupportedPlacement {
        function: unit.sig.name.clone(),
        what,
        reason,
    }
}

/// Copy `slot` to `dest_offset(R20)` through R9.
fn copy_to_stack(out: &mut String, slot: &GoSlot, dest_offset: u32) {
    let mut delta = 0;
    while delta < slot.size {
        let chunk = match slot.size - delta {
            8.. => 8,
            4..=7 => 4,
            2..=3 => 2,
            _ => 1,
        };
        let _ = writeln!(out, "\t{} {}, R9", gp_load(chunk, false), slot.operand(delta));
        let _ = writeln!(out, "\t{} R9, {}(R20)", gp_store(chunk), dest_offset + delta);
        delta += chunk;
    }
}

/// Load the value of `slot` into the registers `regs`.
fn load_value(out: &mut String, ty: &VectorTypeSpec, slot: &GoSlot, regs: &[AsmReg]) -> Result<(), String> {
    let Some(&first) = regs.first() else {
        return Ok(());
    };
    if is_scalable(ty) {
        let base = if first.bank == BANK_PRED { LDR_P } else { LDR_Z };
        let _ = writeln!(out, "\tMOVD {}, R9", slot.operand(0));
        for (i, reg) in regs.iter().enumerate() {
            let word = sve_transfer(base, reg.id as u32, i as u32);
            let _ = writeln!(out, "\tWORD $0x{word:08x} // {}", sve_comment(base, reg.id as u32, i as u32));
        }
        return Ok(());
    }
    match first.bank {
        BANK_GP => {
            let _ = writeln!(out, "\t{} {}, R{}", gp_load(ty.size, signed(ty)), slot.operand(0), first.id);
        }
        BANK_VEC if ty.is_scalar() && ty.size == 2 => {
            let _ = writeln!(out, "\tMOVHU {}, R9", slot.operand(0));
            let _ = writeln!(out, "\tFMOVS R9, F{}", first.id);
        }
        BANK_VEC => {
            let member = if ty.is_scalar() { ty.size } else { ty.member_bytes() };
            for (i, reg) in regs.iter().enumerate() {
                let delta = i as u32 * member;
                let _ = writeln!(out, "\t{} {}, F{}", fp_move(member), slot.operand(delta), reg.id);
            }
        }
        bank => return Err(format!("register bank {bank} has no arm64 glue")),
    }
    Ok(())
}

/// Store registers `regs` into the result `slot`.
fn store_value(out: &mut String, ty: &VectorTypeSpec, slot: &GoSlot, regs: &[AsmReg]) -> Result<(), String> {
    let Some(&first) = regs.first() else {
        return Ok(());
    };
    match first.bank {
        BANK_GP => {
            let _ = writeln!(out, "\t{} R{}, {}", gp_store(ty.size), first.id, slot.operand(0));
        }
        BANK_VEC if ty.is_scalar() && ty.size == 2 => {
            let _ = writeln!(out, "\tFMOVS F{}, R9", first.id);
            let _ = writeln!(out, "\tMOVH R9, {}", slot.operand(0));
        }
        BANK_VEC => {
            let member = if ty.is_scalar() { ty.size } else { ty.member_bytes() };
            for (i, reg) in regs.iter().enumerate() {
                let delta = i as u32 * member;
                let _ = writeln!(out, "\t{} F{}, {}", fp_move(member), reg.id, slot.operand(delta));
            }
        }
        bank => return Err(format!("register bank {bank} has no arm64 glue")),
    }
    Ok(())
}

fn store_scalable(out: &mut String, out_slot: &GoSlot, regs: &[AsmReg]) {
    let _ = writeln!(out, "\tMOVD {}, R9", out_slot.operand(0));
    for (i, reg) in regs.iter().enumerate() {
        let base = if reg.bank == BANK_PRED { STR_P } else { STR_Z };
        let word = sve_transfer(base, reg.id as u32, i as u32);
        let _ = writeln!(out, "\tWORD $0x{word:08x} // {}", sve_comment(base, reg.id as u32, i as u32));
    }
}

fn save_za(out: &mut String) {
    let _ = writeln!(out, "\tWORD $0x{MRS_X9_SVCR:08x} // mrs x9, svcr");
    let _ = writeln!(out, "\tMOVD R9, {FRAME_BASE}(RSP)");
    let _ = writeln!(out, "\tTBZ $1, R9, za_saved");
    let _ = writeln!(out, "\tWORD $0x{RDSVL_X9_1:08x} // rdsvl x9, #1");
    let _ = writeln!(out, "\tADD ${}, RSP, R10", FRAME_BASE + 16);
    let _ = writeln!(out, "\tMOVD ZR, R12");
    let _ = writeln!(out, "za_save_row:");
    let _ = writeln!(out, "\tWORD $0x{STR_ZA_ROW:08x} // str za[w12, 0], [x10]");
    let _ = writeln!(out, "\tADD R9, R10, R10");
    let _ = writeln!(out, "\tADD $1, R12, R12");
    let _ = writeln!(out, "\tCMP R9, R12");
    let _ = writeln!(out, "\tBLT za_save_row");
    let _ = writeln!(out, "\tWORD $0x{:08x} // smstop za", insn::SMSTOP_ZA);
    let _ = writeln!(out, "za_saved:");
}

fn restore_za(out: &mut String) {
    let _ = writeln!(out, "\tMOVD {FRAME_BASE}(RSP), R11");
    let _ = writeln!(out, "\tTBZ $1, R11, za_restored");
    let _ = writeln!(out, "\tWORD $0x{:08x} // smstart za", insn::SMSTART_ZA);
    let _ = writeln!(out, "\tWORD $0x{RDSVL_X9_1:08x} // rdsvl x9, #1");
    let _ = writeln!(out, "\tADD ${}, RSP, R10", FRAME_BASE + 16);
    let _ = writeln!(out, "\tMOVD ZR, R12");
    let _ = writeln!(out, "za_restore_row:");
    let _ = writeln!(out, "\tWORD $0x{LDR_ZA_ROW:08x} // ldr za[w12, 0], [x10]");
    let _ = writeln!(out, "\tADD R9, R10, R10");
    let _ = writeln!(out, "\tADD $1, R12, R12");
    let _ = writeln!(out, "\tCMP R9, R12");
    let _ = writeln!(out, "\tBLT za_restore_row");
    let _ = writeln!(out, "za_restored:");
    let _ = writeln!(out, "\tTBZ $0, R11, sm_restored");
    let _ = writeln!(out, "\tWORD $0x{:08x} // smstart sm", insn::SMSTART_SM);
    let _ = writeln!(out, "sm_restored:");
}

/// Short disassembly of the words the translator itself understands.
fn describe(word: u32) -> Option<String> {
    if let Some(change) = insn::mode_change(word) {
        let op = if change.enable { "smstart" } else { "smstop" };
        return Some(match (change.sm, change.za) {
            (true, true) => op.to_string(),
            (true, false) => format!("{op} sm"),
            _ => format!("{op} za"),
        });
    }
    if word == insn::NOP {
        return Some("nop".to_string());
    }
    if let Some(branch) = insn::decode_branch(word) {
        let op = match branch.kind {
            BranchKind::Jump => "b",
            BranchKind::Call => "bl",
            BranchKind::Conditional => "b.cond",
            BranchKind::Return => return Some("ret".to_string()),
            BranchKind::Indirect => return Some(format!("br x{}", insn::rn(word))),
            BranchKind::IndirectCall => return Some(format!("blr x{}", insn::rn(word))),
        };
        return branch.offset.map(|off| format!("{op} {off:+}"));
    }
    if insn::is_adr(word) {
        return Some(format!("adr x{}", insn::rd(word)));
    }
    None
}

impl GlueWriter for Arm64Glue {
    fn arch(&self) -> Arch {
        Arch::Arm64
    }

    fn body_stack_depth(&self, body: &[u8]) -> u32 {
        let depth: u64 = insn::words(body).into_iter().map(insn::stack_allocation).sum();
        u32::try_from(depth).unwrap_or(u32::MAX)
    }

    fn frame_size(&self, unit: &FunctionUnit) -> u32 {
        let za = if unit.sig.tile_output { ZA_SAVE_AREA } else { 0 };
        align_up(FRAME_BASE + za + unit.stack_depth + unit.placement.stack_size, 16)
    }

    fn gen_prologue(&self, unit: &FunctionUnit, frame_size: u32, out: &mut String) -> TranslateResult<()> {
        let _ = writeln!(out, "\tMOVD RSP, R19");
        let _ = writeln!(out, "\tMOVD R30, R21");
        if unit.sig.tile_output {
            save_za(out);
        }
        let _ = writeln!(out, "\tADD ${}, RSP, R20", frame_size - unit.placement.stack_size);

        for (placement, slot) in unit.placement.params.iter().zip(&unit.frame.params) {
            if placement.regs.is_empty() {
                if let Some(offset) = placement.stack_offset {
                    copy_to_stack(out, slot, offset);
                }
            }
        }
        for (index, (placement, slot)) in unit.placement.params.iter().zip(&unit.frame.params).enumerate() {
            match (placement.convention, placement.regs.first()) {
                // The Go slot already holds the pointer the callee expects.
                (PassingConvention::Indirect, Some(reg)) => {
                    let _ = writeln!(out, "\tMOVD {}, R{}", slot.operand(0), reg.id);
                }
                (PassingConvention::Indirect, None) => {}
                _ => load_value(out, placement.ty, slot, &placement.regs)
                    .map_err(|reason| unplaceable(unit, format!("parameter {index}"), reason))?,
            }
        }
        let _ = writeln!(out, "\tMOVD R20, RSP");
        Ok(())
    }

    fn gen_image(&self, unit: &FunctionUnit, out: &mut String) -> TranslateResult<()> {
        let padded = align_up(unit.image.bytes.len() as u32, 4) as i64;
        let skip = insn::b(BODY_OFFSET - 4 + padded)
            .map_err(|reason| unplaceable(unit, "body".to_string(), reason))?;
        let _ = writeln!(out, "\tPCALIGN ${BODY_OFFSET}");
        let _ = writeln!(out, "\tWORD $0x{:08x} // bl body", insn::bl(BODY_OFFSET).unwrap_or(0));
        let _ = writeln!(out, "\tWORD $0x{skip:08x} // b past constants");
        let _ = writeln!(out, "\tWORD $0x{:08x}", insn::NOP);
        let _ = writeln!(out, "\tWORD $0x{:08x}", insn::NOP);

        let body = &unit.image.bytes[..unit.image.body_len];
        for (i, word) in insn::words(body).into_iter().enumerate() {
            let offset = i as u64 * 4;
            let mut comment = describe(word);
            if let Some(region) = unit.region {
                let mark = if region.entry_offset == offset {
                    Some("streaming entry")
                } else if region.exit_offsets.contains(&offset) {
                    Some("streaming exit")
                } else {
                    None
                };
                if let Some(mark) = mark {
                    comment = Some(match comment {
                        Some(text) => format!("{text} ({mark})"),
                        None => mark.to_string(),
                    });
                }
            }
            match comment {
                Some(text) => {
                    let _ = writeln!(out, "\tWORD $0x{word:08x} // {text}");
                }
                None => {
                    let _ = writeln!(out, "\tWORD $0x{word:08x}");
                }
            }
        }

        write_constants(out, unit.image, 4, |out, bytes, label| {
            let mut buf = [0u8; 4];
            buf[..bytes.len()].copy_from_slice(bytes);
            let word = u32::from_le_bytes(buf);
            match label {
                Some(label) => {
                    let _ = writeln!(out, "\tWORD $0x{word:08x} // {label}");
                }
                None => {
                    let _ = writeln!(out, "\tWORD $0x{word:08x}");
                }
            }
        });
        Ok(())
    }

    fn gen_epilogue(&self, unit: &FunctionUnit, _frame_size: u32, out: &mut String) -> TranslateResult<()> {
        let _ = writeln!(out, "\tMOVD R19, RSP");
        let _ = writeln!(out, "\tMOVD R21, R30");
        if let Some(ret) = &unit.placement.ret {
            if ret.convention == PassingConvention::Register {
                match (&unit.frame.out, &unit.frame.result) {
                    (Some(out_slot), _) => store_scalable(out, out_slot, &ret.regs),
                    (None, Some(result)) => store_value(out, ret.ty, result, &ret.regs)
                        .map_err(|reason| unplaceable(unit, "return value".to_string(), reason))?,
                    (None, None) => {}
                }
            }
        }
        if unit.sig.tile_output {
            restore_za(out);
        }
        let _ = writeln!(out, "\tRET");
        Ok(())
    }
}
