// This module provides the register identifiers shared by the calling conventions,
// the streaming instrumenter and the emitter. AsmReg names a single architectural
// register as (bank, id); RegBitSet is a compact per-bank bit set used for clobber sets
// and for tracking which argument registers a placement has consumed. Banks are
// general purpose, vector (XMM/YMM/ZMM, V/Z), predicate (P) and tile (ZA) registers.

//! Register identifiers and register sets.

/// Maximum number of register banks supported (GP, vector, predicate, tile).
pub const MAX_REGISTER_BANKS: usize = 4;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// General purpose registers.
pub const BANK_GP: RegBank = 0;
/// Vector registers (XMM/YMM/ZMM on x86-64, V/Z on AArch64).
pub const BANK_VEC: RegBank = 1;
/// SVE predicate registers.
pub const BANK_PRED: RegBank = 2;
/// SME tile storage (ZA).
pub const BANK_TILE: RegBank = 3;

/// Combined register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    pub const fn gp(id: RegId) -> Self {
        Self::new(BANK_GP, id)
    }

    pub const fn vec(id: RegId) -> Self {
        Self::new(BANK_VEC, id)
    }

    pub const fn pred(id: RegId) -> Self {
        Self::new(BANK_PRED, id)
    }

    /// The register `n` places after this one in the same bank.
    pub const fn offset(self, n: u8) -> Self {
        Self::new(self.bank, self.id + n)
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegBitSet {
    /// Bit mask for each register bank.
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    /// Create empty register set.
    pub fn new() -> Self {
        Self {
            banks: [0; MAX_REGISTER_BANKS],
        }
    }

    /// Create register set with all registers in bank marked.
    pub fn all_in_bank(bank: RegBank, count: u8) -> Self {
        let mut set = Self::new();
        if count >= 64 {
            set.banks[bank as usize] = u64::MAX;
        } else {
            set.banks[bank as usize] = (1u64 << count) - 1;
        }
        set
    }

    /// Check if register is set.
    pub fn contains(&self, reg: AsmReg) -> bool {
        if reg.bank as usize >= MAX_REGISTER_BANKS || reg.id >= 64 {
            return false;
        }
        (self.banks[reg.bank as usize] & (1u64 << reg.id)) != 0
    }

    /// Set a register.
    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    /// Set union with another set.
    pub fn union(&mut self, other: &RegBitSet) {
        for i in 0..MAX_REGISTER_BANKS {
            self.banks[i] |= other.banks[i];
        }
    }

    /// Check if any registers are set in the given bank.
    pub fn any_in_bank(&self, bank: RegBank) -> bool {
        if bank as usize >= MAX_REGISTER_BANKS {
            return false;
        }
        self.banks[bank as usize] != 0
    }

    /// Count number of set registers in bank.
    pub fn count_in_bank(&self, bank: RegBank) -> u32 {
        if bank as usize >= MAX_REGISTER_BANKS {
            return 0;
        }
        self.banks[bank as usize].count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.iter().all(|b| *b == 0)
    }
}
