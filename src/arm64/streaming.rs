// This module implements the streaming-mode instrumenter. A function declared streaming
// expects its caller to have switched the processor into streaming SVE mode (and, for
// tile-output functions, to have enabled the ZA array), but a Go caller never does. The
// instrumenter therefore edits the compiled body:
//
// - The body is split into instructions with decoded branch targets and grouped into
//   basic blocks. The mode entry goes at the nearest common dominator of every SVE and
//   SME instruction, hoisted out of loops, immediately before the first such
//   instruction in that block.
// - A mode exit is inserted before every return that can be reached in streaming mode,
//   including early returns.
// - Branch displacements are relinked after insertion, and constant reference offsets
//   are remapped through the same table.
// - A dataflow pass over {off, on, exited} verifies the result. A return, indirect
//   branch or branch out of the body reachable in the on state is an UnreachableExit.
//
// Bodies that already switch modes themselves (locally streaming functions) are only
// completed with missing exits and verified. Inside the region `movi dN, #0`, which is
// illegal in streaming mode, is rewritten to `fmov sN, wzr`.

//! Streaming-mode entry and exit instrumentation.

use crate::arm64::insn::{self, BranchKind};
use crate::core::analyzer::{Analyzer, CfgAdaptor};
use crate::core::constant_pool::{RawRef, RefTarget, RelocatableBody};
use crate::core::error::{TranslateError, TranslateResult};
use crate::core::register_file::{AsmReg, RegBitSet, BANK_PRED, BANK_TILE, BANK_VEC};
use crate::core::signature::FunctionSignature;
use std::collections::BTreeSet;

/// Where a body was switched into and out of streaming mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingRegion {
    pub function: String,
    /// Byte offset of the mode entry within the instrumented body.
    pub entry_offset: u64,
    pub exit_offsets: Vec<u64>,
    /// Registers and state the mode switch discards.
    pub clobbered: RegBitSet,
    /// The region also owns the ZA array.
    pub tile_state: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// Instruction index inside the body.
    Local(usize),
    /// Byte offset from the body start, outside the body.
    Outside(i64),
}

#[derive(Debug, Clone, Copy)]
struct Insn {
    word: u32,
    kind: Option<BranchKind>,
    target: Option<Target>,
    /// Index in the compiled body, `None` for inserted instructions.
    origin: Option<usize>,
}

/// Instruction list with resolved branch targets.
#[derive(Debug, Clone)]
struct InsnList {
    insns: Vec<Insn>,
}

impl InsnList {
    fn decode(code: &[u8]) -> Self {
        let words = insn::words(code);
        let len = words.len() as i64;
        let insns = words
            .iter()
            .enumerate()
            .map(|(i, &word)| {
                let branch = insn::decode_branch(word);
                let target = branch.and_then(|b| b.offset).map(|off| {
                    let abs = i as i64 * 4 + off;
                    if abs >= 0 && abs < len * 4 {
                        Target::Local((abs / 4) as usize)
                    } else {
                        Target::Outside(abs)
                    }
                });
                Insn {
                    word,
                    kind: branch.map(|b| b.kind),
                    target,
                    origin: Some(i),
                }
            })
            .collect();
        Self { insns }
    }

    /// Successor instruction indices of `i`, excluding edges that leave the body.
    fn succs(&self, i: usize) -> Vec<usize> {
        let insn = &self.insns[i];
        let mut out = Vec::with_capacity(2);
        let falls_through = insn.kind.map_or(true, |k| k.falls_through());
        if falls_through && i + 1 < self.insns.len() {
            out.push(i + 1);
        }
        if let (Some(BranchKind::Jump | BranchKind::Conditional), Some(Target::Local(t))) =
            (insn.kind, insn.target)
        {
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    }

    /// Insert `words` before instruction `at`. Branches to `at` whose source satisfies
    /// `lands_before` now reach the inserted sequence; others still reach `at`.
    fn insert(&mut self, at: usize, words: &[u32], lands_before: impl Fn(usize) -> bool) {
        let n = words.len();
        let shift = |idx: usize| if idx >= at { idx + n } else { idx };
        for (src, insn) in self.insns.iter_mut().enumerate() {
            if let Some(Target::Local(t)) = insn.target {
                let new = if t == at && lands_before(src) { at } else { shift(t) };
                insn.target = Some(Target::Local(new));
            }
        }
        let inserted = words.iter().map(|&word| Insn {
            word,
            kind: None,
            target: None,
            origin: None,
        });
        self.insns.splice(at..at, inserted);
    }

    /// Encode words with relinked branch displacements.
    fn encode(&self) -> Result<Vec<u32>, String> {
        self.insns
            .iter()
            .enumerate()
            .map(|(i, insn)| match insn.target {
                Some(Target::Local(t)) => insn::with_branch_offset(insn.word, (t as i64 - i as i64) * 4),
                Some(Target::Outside(abs)) => insn::with_branch_offset(insn.word, abs - i as i64 * 4),
                _ => Ok(insn.word),
            })
            .collect()
    }

    /// New byte offset of every original instruction.
    fn origin_offsets(&self, original_len: usize) -> Vec<u64> {
        let mut map = vec![0u64; original_len];
        for (i, insn) in self.insns.iter().enumerate() {
            if let Some(o) = insn.origin {
                map[o] = i as u64 * 4;
            }
        }
        map
    }
}

/// Basic blocks over an instruction list.
struct BlockGraph {
    /// First instruction of each block.
    starts: Vec<usize>,
    block_of: Vec<usize>,
    succs: Vec<Vec<usize>>,
}

impl BlockGraph {
    fn build(list: &InsnList) -> Self {
        let n = list.insns.len();
        let mut leaders = BTreeSet::from([0usize]);
        for (i, insn) in list.insns.iter().enumerate() {
            if insn.kind.is_some() && insn.kind != Some(BranchKind::Call) {
                if i + 1 < n {
                    leaders.insert(i + 1);
                }
                if let Some(Target::Local(t)) = insn.target {
                    leaders.insert(t);
                }
            }
        }
        let starts: Vec<usize> = leaders.into_iter().filter(|&s| s < n).collect();
        let mut block_of = vec![0; n];
        for (b, &s) in starts.iter().enumerate() {
            let end = starts.get(b + 1).copied().unwrap_or(n);
            block_of[s..end].iter_mut().for_each(|x| *x = b);
        }
        let succs = starts
            .iter()
            .enumerate()
            .map(|(b, _)| {
                let last = starts.get(b + 1).copied().unwrap_or(n) - 1;
                let mut out: Vec<usize> = list.succs(last).into_iter().map(|i| block_of[i]).collect();
                out.dedup();
                out
            })
            .collect();
        Self {
            starts,
            block_of,
            succs,
        }
    }

    fn end(&self, block: usize, n: usize) -> usize {
        self.starts.get(block + 1).copied().unwrap_or(n)
    }
}

impl CfgAdaptor for BlockGraph {
    fn block_count(&self) -> usize {
        self.starts.len()
    }

    fn block_succs(&self, block: usize) -> Vec<usize> {
        self.succs[block].clone()
    }
}

const OFF: u8 = 1;
const ON: u8 = 2;
const EXITED: u8 = 4;

fn transfer(state: u8, word: u32) -> u8 {
    match insn::mode_change(word) {
        Some(change) if change.sm && change.enable => ON,
        Some(change) if change.sm => {
            let mut out = state & !ON;
            if state & ON != 0 {
                out |= EXITED;
            }
            out
        }
        _ => state,
    }
}

/// Mode states possible on entry to each instruction.
fn mode_states(list: &InsnList) -> Vec<u8> {
    let n = list.insns.len();
    let mut state = vec![0u8; n];
    if n == 0 {
        return state;
    }
    state[0] = OFF;
    let mut work = vec![0usize];
    while let Some(i) = work.pop() {
        let out = transfer(state[i], list.insns[i].word);
        for s in list.succs(i) {
            if state[s] | out != state[s] {
                state[s] |= out;
                work.push(s);
            }
        }
    }
    state
}

/// Check that no path leaves the body in streaming mode.
fn verify(function: &str, list: &InsnList, states: &[u8]) -> TranslateResult<()> {
    let unreachable = |i: usize| TranslateError::UnreachableExit {
        function: function.to_string(),
        offset: i as u64 * 4,
    };
    for (i, insn) in list.insns.iter().enumerate() {
        let out = transfer(states[i], insn.word);
        if states[i] & ON == 0 && out & ON == 0 {
            continue;
        }
        let leaves = match (insn.kind, insn.target) {
            (Some(BranchKind::Return | BranchKind::Indirect), _) => true,
            (Some(BranchKind::Jump | BranchKind::Conditional), Some(Target::Outside(_))) => true,
            _ => false,
        };
        if leaves && states[i] & ON != 0 {
            return Err(unreachable(i));
        }
        let falls_off = i + 1 == list.insns.len() && insn.kind.map_or(true, |k| k.falls_through());
        if falls_off && out & ON != 0 {
            return Err(unreachable(i));
        }
    }
    Ok(())
}

/// Reject direct calls from a streaming function into another streaming function.
pub fn check_nested_calls(
    sig: &FunctionSignature,
    raw_refs: &[RawRef],
    streaming_functions: &BTreeSet<String>,
) -> TranslateResult<()> {
    if !sig.streaming {
        return Ok(());
    }
    for raw in raw_refs {
        if let RefTarget::Call { name } = &raw.target {
            if streaming_functions.contains(name) {
                return Err(TranslateError::InconsistentAttributes {
                    function: sig.name.clone(),
                    reason: format!("streaming mode is entered again by a call to `{name}`"),
                });
            }
        }
    }
    Ok(())
}

fn clobbered(tile_state: bool) -> RegBitSet {
    let mut set = RegBitSet::all_in_bank(BANK_VEC, 32);
    set.union(&RegBitSet::all_in_bank(BANK_PRED, 16));
    if tile_state {
        set.set(AsmReg::new(BANK_TILE, 0));
    }
    set
}

/// Instrument a streaming function; other functions are left untouched.
pub fn instrument(
    sig: &FunctionSignature,
    body: &mut RelocatableBody,
) -> TranslateResult<Option<StreamingRegion>> {
    if !sig.streaming {
        return Ok(None);
    }
    let function = sig.name.as_str();
    let original_len = body.code.len() / 4;
    let mut list = InsnList::decode(&body.code);
    let (enter, exit) = if sig.tile_output {
        (insn::SMSTART, insn::SMSTOP)
    } else {
        (insn::SMSTART_SM, insn::SMSTOP_SM)
    };

    let self_managed = list
        .insns
        .iter()
        .any(|i| insn::mode_change(i.word).is_some_and(|c| c.sm));
    if !self_managed && !list.insns.is_empty() {
        let (at, lands_before) = entry_point(&list);
        list.insert(at, &[enter], lands_before);
    }

    // Exits before every return reachable in streaming mode.
    let states = mode_states(&list);
    let returns: Vec<usize> = list
        .insns
        .iter()
        .enumerate()
        .filter(|(i, insn)| insn.kind == Some(BranchKind::Return) && states[*i] & ON != 0)
        .map(|(i, _)| i)
        .collect();
    for &at in returns.iter().rev() {
        list.insert(at, &[exit], |_| true);
    }

    let states = mode_states(&list);
    verify(function, &list, &states)?;

    let mut words = list.encode().map_err(|reason| {
        log::warn!("{function}: cannot relink instrumented body: {reason}");
        TranslateError::UnreachableExit {
            function: function.to_string(),
            offset: 0,
        }
    })?;
    let mut legalized = 0;
    for (i, word) in words.iter_mut().enumerate() {
        if states[i] & ON != 0 && insn::is_movi_d_zero(*word) {
            *word = insn::fmov_s_wzr(insn::rd(*word));
            legalized += 1;
        }
    }

    let mut entry_offset = None;
    let mut exit_offsets = Vec::new();
    for (i, word) in words.iter().enumerate() {
        match insn::mode_change(*word) {
            Some(c) if c.sm && c.enable && entry_offset.is_none() => entry_offset = Some(i as u64 * 4),
            Some(c) if c.sm && !c.enable => exit_offsets.push(i as u64 * 4),
            _ => {}
        }
    }

    let offsets = list.origin_offsets(original_len);
    body.remap(insn::to_bytes(&words), |old| {
        offsets.get((old / 4) as usize).copied().unwrap_or(old)
    });

    log::debug!(
        "{function}: streaming entry at {:#x}, {} exits, {legalized} instructions legalized",
        entry_offset.unwrap_or(0),
        exit_offsets.len()
    );
    Ok(Some(StreamingRegion {
        function: function.to_string(),
        entry_offset: entry_offset.unwrap_or(0),
        exit_offsets,
        clobbered: clobbered(sig.tile_output),
        tile_state: sig.tile_output,
    }))
}

/// Position of the mode entry and which branches to it should run it.
fn entry_point(list: &InsnList) -> (usize, impl Fn(usize) -> bool) {
    let graph = BlockGraph::build(list);
    let mut analyzer = Analyzer::new();
    analyzer.switch_func(&graph);

    let needs: Vec<usize> = list
        .insns
        .iter()
        .enumerate()
        .filter(|(_, i)| insn::is_sve(i.word) || insn::is_sme(i.word))
        .map(|(i, _)| i)
        .collect();
    let mut block = analyzer
        .nearest_common_dominator(needs.iter().map(|&i| graph.block_of[i]))
        .unwrap_or(0);
    while block != 0 && analyzer.in_cycle(&graph, block) {
        block = analyzer.idom(block).unwrap_or(0);
    }

    let n = list.insns.len();
    let start = graph.starts[block];
    let end = graph.end(block, n);
    let last = end - 1;
    let at = match needs.iter().find(|&&i| (start..end).contains(&i)) {
        Some(&first) => first,
        None if needs.is_empty() => 0,
        None if list.insns[last].kind.is_some_and(|k| k != BranchKind::Call) => last,
        None => end,
    };

    // Branches from inside the region continue after the entry, others run it.
    let entry_at_leader = at == start;
    let block_of = graph.block_of;
    let lands_before = move |src: usize| {
        let in_region = if block_of[src] == block {
            src >= at
        } else {
            analyzer.dominates(block, block_of[src])
        };
        entry_at_leader && !in_region
    };
    (at, lands_before)
}
