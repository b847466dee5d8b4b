// This module renders an x86-64 function body as Go data directives. Each instruction is
// decoded with iced-x86 and emitted as one line of QUAD/LONG/WORD/BYTE directives with
// its GAS disassembly as a trailing comment, so the generated file stays reviewable
// while the assembler copies the bytes verbatim. The same decoding pass estimates how
// much stack the body allocates below its entry stack pointer: pushes, immediate
// `sub rsp` adjustments, and `and rsp` realignments all count toward the glue frame.

//! x86-64 body rendering and stack depth.

use crate::core::emitter::write_data;
use iced_x86::{
    Decoder, DecoderOptions, Formatter, GasFormatter, Instruction, Mnemonic, OpKind, Register,
};

/// Slack added for a body that realigns its stack pointer.
const REALIGN_SLACK: u32 = 64;

/// Upper bound of the bytes `body` allocates below its entry stack pointer.
pub fn stack_depth(body: &[u8]) -> u32 {
    let mut decoder = Decoder::with_ip(64, body, 0, DecoderOptions::NONE);
    let mut instr = Instruction::default();
    let mut depth: u64 = 0;
    while decoder.can_decode() {
        decoder.decode_out(&mut instr);
        depth += match instr.mnemonic() {
            Mnemonic::Push => 8,
            Mnemonic::Pushfq => 8,
            Mnemonic::Sub if writes_rsp(&instr) => immediate(&instr),
            Mnemonic::And if writes_rsp(&instr) => REALIGN_SLACK as u64,
            _ => 0,
        };
    }
    u32::try_from(depth).unwrap_or(u32::MAX)
}

fn writes_rsp(instr: &Instruction) -> bool {
    instr.op_count() == 2
        && instr.op0_kind() == OpKind::Register
        && instr.op0_register() == Register::RSP
}

fn immediate(instr: &Instruction) -> u64 {
    match instr.op1_kind() {
        OpKind::Immediate8to64 | OpKind::Immediate32to64 => (instr.immediate(1) as i64).max(0) as u64,
        _ => 0,
    }
}

/// Append `body` as one directive line per instruction.
pub fn write_body(out: &mut String, body: &[u8]) {
    let mut decoder = Decoder::with_ip(64, body, 0, DecoderOptions::NONE);
    let mut formatter = GasFormatter::new();
    formatter.options_mut().set_first_operand_char_index(8);
    let mut instr = Instruction::default();
    let mut text = String::new();
    while decoder.can_decode() {
        let start = decoder.position();
        decoder.decode_out(&mut instr);
        let end = start + instr.len();
        text.clear();
        if instr.is_invalid() {
            text.push_str("(bad)");
        } else {
            formatter.format(&instr, &mut text);
        }
        write_data(out, &body[start..end], Some(text.trim_end()));
    }
}
