// This module holds the A64 instruction word helpers shared by the AArch64 relocator,
// the streaming instrumenter and the emitter. A64 instructions are fixed 32-bit
// little-endian words, so decoding here is mask and match on the few encoding groups the
// translator has to understand: PC-relative branches (to build the control-flow graph
// and relink it after insertions), address generation and loads that carry constant
// references, stack adjustments for frame sizing, and the SVE and SME encoding spaces
// that trigger streaming-mode entry.

//! A64 instruction word encoding helpers.

pub const NOP: u32 = 0xd503_201f;
pub const RET: u32 = 0xd65f_03c0;

/// `smstart sm`
pub const SMSTART_SM: u32 = 0xd503_437f;
/// `smstop sm`
pub const SMSTOP_SM: u32 = 0xd503_427f;
/// `smstart` (SM and ZA)
pub const SMSTART: u32 = 0xd503_477f;
/// `smstop` (SM and ZA)
pub const SMSTOP: u32 = 0xd503_467f;
/// `smstart za`
pub const SMSTART_ZA: u32 = 0xd503_457f;
/// `smstop za`
pub const SMSTOP_ZA: u32 = 0xd503_447f;

/// Change of PSTATE.SM and PSTATE.ZA performed by an SMSTART/SMSTOP word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub enable: bool,
    pub sm: bool,
    pub za: bool,
}

/// Decode `msr svcr*, #imm` (SMSTART/SMSTOP and their SM/ZA forms).
pub fn mode_change(word: u32) -> Option<ModeChange> {
    // MSR (immediate), op1=011, CRn=0100, CRm=0xx(imm), op2=011
    if word & 0xffff_f0ff != 0xd503_407f {
        return None;
    }
    let crm = (word >> 8) & 0xf;
    let (sm, za) = match crm >> 1 {
        0b001 => (true, false),
        0b010 => (false, true),
        0b011 => (true, true),
        _ => return None,
    };
    Some(ModeChange {
        enable: crm & 1 == 1,
        sm,
        za,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// `b`
    Jump,
    /// `bl`
    Call,
    /// `b.cond`, `cbz`, `cbnz`, `tbz`, `tbnz`
    Conditional,
    /// `ret`
    Return,
    /// `br`
    Indirect,
    /// `blr`
    IndirectCall,
}

impl BranchKind {
    /// Whether execution can continue at the next instruction.
    pub fn falls_through(self) -> bool {
        matches!(self, BranchKind::Call | BranchKind::Conditional | BranchKind::IndirectCall)
    }
}

/// A decoded branch. `offset` is the byte displacement of a direct branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub kind: BranchKind,
    pub offset: Option<i64>,
}

fn sign_extend(value: u32, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value as i64) << shift) >> shift
}

/// Decode a branch instruction.
pub fn decode_branch(word: u32) -> Option<Branch> {
    let direct = |kind, imm: u32, bits| Branch {
        kind,
        offset: Some(sign_extend(imm, bits) * 4),
    };
    let register = |kind| Branch { kind, offset: None };
    match word {
        w if w & 0xfc00_0000 == 0x1400_0000 => Some(direct(BranchKind::Jump, w & 0x03ff_ffff, 26)),
        w if w & 0xfc00_0000 == 0x9400_0000 => Some(direct(BranchKind::Call, w & 0x03ff_ffff, 26)),
        w if w & 0xff00_0010 == 0x5400_0000 => {
            Some(direct(BranchKind::Conditional, (w >> 5) & 0x7_ffff, 19))
        }
        w if w & 0x7e00_0000 == 0x3400_0000 => {
            Some(direct(BranchKind::Conditional, (w >> 5) & 0x7_ffff, 19))
        }
        w if w & 0x7e00_0000 == 0x3600_0000 => {
            Some(direct(BranchKind::Conditional, (w >> 5) & 0x3fff, 14))
        }
        w if w & 0xffff_fc1f == 0xd65f_0000 => Some(register(BranchKind::Return)),
        w if w & 0xffff_fc1f == 0xd61f_0000 => Some(register(BranchKind::Indirect)),
        w if w & 0xffff_fc1f == 0xd63f_0000 => Some(register(BranchKind::IndirectCall)),
        _ => None,
    }
}

fn encode_field(word: u32, offset: i64, lsb: u32, bits: u32) -> Result<u32, String> {
    if offset % 4 != 0 {
        return Err(format!("branch offset {offset} is not word aligned"));
    }
    let imm = offset / 4;
    let limit = 1i64 << (bits - 1);
    if imm < -limit || imm >= limit {
        return Err(format!("branch offset {offset} exceeds {bits}-bit range"));
    }
    let mask = ((1u32 << bits) - 1) << lsb;
    Ok((word & !mask) | (((imm as u32) << lsb) & mask))
}

/// Re-encode the displacement of a direct branch.
pub fn with_branch_offset(word: u32, offset: i64) -> Result<u32, String> {
    match word {
        w if w & 0x7c00_0000 == 0x1400_0000 => encode_field(w, offset, 0, 26),
        w if w & 0xff00_0010 == 0x5400_0000 || w & 0x7e00_0000 == 0x3400_0000 => {
            encode_field(w, offset, 5, 19)
        }
        w if w & 0x7e00_0000 == 0x3600_0000 => encode_field(w, offset, 5, 14),
        w => Err(format!("{w:#010x} is not a direct branch")),
    }
}

/// `b <offset>`
pub fn b(offset: i64) -> Result<u32, String> {
    encode_field(0x1400_0000, offset, 0, 26)
}

/// `bl <offset>`
pub fn bl(offset: i64) -> Result<u32, String> {
    encode_field(0x9400_0000, offset, 0, 26)
}

/// Instruction in the SVE encoding space (op0 = 0010).
pub fn is_sve(word: u32) -> bool {
    (word >> 25) & 0xf == 0b0010
}

/// Instruction in the SME encoding space (op0 = 0000 with bit 31 set).
pub fn is_sme(word: u32) -> bool {
    word >> 31 == 1 && (word >> 25) & 0xf == 0
}

pub fn rd(word: u32) -> u32 {
    word & 0x1f
}

pub fn rn(word: u32) -> u32 {
    (word >> 5) & 0x1f
}

pub fn is_adrp(word: u32) -> bool {
    word & 0x9f00_0000 == 0x9000_0000
}

pub fn is_adr(word: u32) -> bool {
    word & 0x9f00_0000 == 0x1000_0000
}

/// `adr xd, <offset>`
pub fn adr(rd: u32, offset: i64) -> Result<u32, String> {
    if !(-(1 << 20)..(1 << 20)).contains(&offset) {
        return Err(format!("ADR offset {offset} exceeds 1 MiB"));
    }
    let imm = offset as u32 & 0x1f_ffff;
    Ok(0x1000_0000 | ((imm & 3) << 29) | ((imm >> 2) << 5) | (rd & 0x1f))
}

/// Replace the unsigned 12-bit immediate of an ADD or LDR/STR (unsigned offset).
pub fn with_imm12(word: u32, value: i64, shift: u8) -> Result<u32, String> {
    let scale = 1i64 << shift;
    if value < 0 || value % scale != 0 || value / scale > 0xfff {
        return Err(format!(
            "offset {value} cannot be encoded as a {scale}-byte scaled 12-bit immediate"
        ));
    }
    Ok((word & !(0xfff << 10)) | (((value / scale) as u32) << 10))
}

pub fn is_ldr_literal(word: u32) -> bool {
    word & 0x3b00_0000 == 0x1800_0000
}

/// Replace the imm19 of an LDR (literal).
pub fn with_literal_offset(word: u32, offset: i64) -> Result<u32, String> {
    encode_field(word, offset, 5, 19)
}

/// `movi dN, #0`
pub fn is_movi_d_zero(word: u32) -> bool {
    word & 0xffff_ffe0 == 0x2f00_e400
}

/// `fmov sN, wzr`
pub fn fmov_s_wzr(n: u32) -> u32 {
    0x1e27_03e0 | (n & 0x1f)
}

/// Bytes of stack a prologue instruction allocates below the incoming SP.
pub fn stack_allocation(word: u32) -> u64 {
    const SP: u32 = 31;
    // sub sp, sp, #imm{, lsl #12}
    if word & 0xff80_0000 == 0xd100_0000 && rd(word) == SP && rn(word) == SP {
        let imm = ((word >> 10) & 0xfff) as u64;
        return if word & (1 << 22) != 0 { imm << 12 } else { imm };
    }
    // stp pre-index on sp: stp x29, x30, [sp, #-16]!
    if word & 0x3bc0_0000 == 0x2980_0000 && rn(word) == SP {
        let imm7 = sign_extend((word >> 15) & 0x7f, 7);
        let opc = word >> 30;
        let scale = if word & (1 << 26) != 0 {
            4 << opc
        } else if opc == 2 {
            8
        } else {
            4
        };
        return if imm7 < 0 { (-imm7 * scale) as u64 } else { 0 };
    }
    // str pre-index on sp: str x19, [sp, #-16]!
    if word & 0x3b60_0c00 == 0x3800_0c00 && rn(word) == SP {
        let imm9 = sign_extend((word >> 12) & 0x1ff, 9);
        return if imm9 < 0 { (-imm9) as u64 } else { 0 };
    }
    // addvl sp, sp, #-imm: counted at the largest vector length
    if word & 0xffe0_f800 == 0x0420_5000 && rd(word) == SP && (word >> 16) & 0x1f == SP {
        let imm6 = sign_extend((word >> 5) & 0x3f, 6);
        return if imm6 < 0 { (-imm6 * 256) as u64 } else { 0 };
    }
    0
}

/// Split a body into instruction words.
pub fn words(code: &[u8]) -> Vec<u32> {
    code.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}
