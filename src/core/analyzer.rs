// This module implements the Analyzer component that computes block order and dominance
// for the control-flow graph of a compiled body. Two analyses are provided: 1) Reverse
// Post-Order (RPO) traversal with an explicit (block, processed) stack, and 2) immediate
// dominators by the iterative intersection algorithm over that order. The analyzer works
// with any graph through the CfgAdaptor trait. The streaming instrumenter uses it to
// place the mode entry at the nearest common dominator of all instructions that need
// streaming mode and to keep that entry out of loops.

//! Block order and dominance analysis.

use std::collections::HashSet;

/// Read-only view of a control-flow graph whose blocks are numbered `0..block_count()`.
pub trait CfgAdaptor {
    fn block_count(&self) -> usize;

    fn entry_block(&self) -> usize {
        0
    }

    /// Successors of `block`, in branch order.
    fn block_succs(&self, block: usize) -> Vec<usize>;
}

/// Computes block layout and dominance for a graph.
#[derive(Debug, Default)]
pub struct Analyzer {
    order: Vec<usize>,
    /// RPO index per block, `None` when unreachable.
    rpo_index: Vec<Option<usize>>,
    idom: Vec<Option<usize>>,
    preds: Vec<Vec<usize>>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence of reachable blocks in reverse post order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn is_reachable(&self, block: usize) -> bool {
        self.rpo_index.get(block).is_some_and(|i| i.is_some())
    }

    /// Immediate dominator of `block`; the entry block is its own dominator.
    pub fn idom(&self, block: usize) -> Option<usize> {
        self.idom.get(block).copied().flatten()
    }

    pub fn predecessors(&self, block: usize) -> &[usize] {
        self.preds.get(block).map_or(&[], |p| p.as_slice())
    }

    /// Build block layout and dominators for the graph.
    pub fn switch_func(&mut self, cfg: &impl CfgAdaptor) {
        let count = cfg.block_count();
        self.order.clear();
        self.rpo_index = vec![None; count];
        self.idom = vec![None; count];
        self.preds = vec![Vec::new(); count];
        if count == 0 {
            return;
        }

        // -------- build RPO order ---------
        let entry = cfg.entry_block();
        let mut post = Vec::new();
        let mut stack = vec![(entry, false)];
        let mut visited = HashSet::new();
        while let Some((block, processed)) = stack.pop() {
            if processed {
                post.push(block);
                continue;
            }
            if !visited.insert(block) {
                continue;
            }
            stack.push((block, true));
            for succ in cfg.block_succs(block).into_iter().rev() {
                stack.push((succ, false));
            }
        }
        post.reverse();
        self.order = post;
        for (idx, b) in self.order.iter().enumerate() {
            self.rpo_index[*b] = Some(idx);
        }
        for &b in &self.order {
            for succ in cfg.block_succs(b) {
                if !self.preds[succ].contains(&b) {
                    self.preds[succ].push(b);
                }
            }
        }

        // -------- compute dominators ---------
        self.idom[entry] = Some(entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &b in self.order.iter().skip(1) {
                let mut new_idom = None;
                for &p in &self.preds[b] {
                    if self.idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => self.intersect(p, cur),
                    });
                }
                if new_idom.is_some() && self.idom[b] != new_idom {
                    self.idom[b] = new_idom;
                    changed = true;
                }
            }
        }
    }

    fn intersect(&self, mut a: usize, mut b: usize) -> usize {
        let rpo = |x: usize| self.rpo_index[x].unwrap_or(usize::MAX);
        while a != b {
            while rpo(a) > rpo(b) {
                a = self.idom[a].unwrap_or(a);
            }
            while rpo(b) > rpo(a) {
                b = self.idom[b].unwrap_or(b);
            }
        }
        a
    }

    /// Whether `a` dominates `b`.
    pub fn dominates(&self, a: usize, mut b: usize) -> bool {
        loop {
            if a == b {
                return true;
            }
            match self.idom(b) {
                Some(up) if up != b => b = up,
                _ => return false,
            }
        }
    }

    /// Nearest block dominating every block in `blocks`.
    pub fn nearest_common_dominator(&self, blocks: impl IntoIterator<Item = usize>) -> Option<usize> {
        blocks
            .into_iter()
            .filter(|b| self.is_reachable(*b))
            .reduce(|a, b| self.intersect(a, b))
    }

    /// Whether `block` lies on a cycle.
    pub fn in_cycle(&self, cfg: &impl CfgAdaptor, block: usize) -> bool {
        let mut stack = cfg.block_succs(block);
        let mut seen = HashSet::new();
        while let Some(b) = stack.pop() {
            if b == block {
                return true;
            }
            if seen.insert(b) {
                stack.extend(cfg.block_succs(b));
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Graph(Vec<Vec<usize>>);

    impl CfgAdaptor for Graph {
        fn block_count(&self) -> usize {
            self.0.len()
        }

        fn block_succs(&self, block: usize) -> Vec<usize> {
            self.0[block].clone()
        }
    }

    // 0 -> 1, 2; 1 -> 3; 2 -> 3; 3 -> 4, 1; 5 unreachable
    fn diamond_with_loop() -> Graph {
        Graph(vec![vec![1, 2], vec![3], vec![3], vec![4, 1], vec![], vec![4]])
    }

    #[test]
    fn test_rpo_order() {
        let mut a = Analyzer::new();
        a.switch_func(&diamond_with_loop());
        assert_eq!(a.order()[0], 0);
        assert_eq!(a.order().len(), 5);
        assert!(!a.is_reachable(5));
        let pos = |b| a.order().iter().position(|x| *x == b).unwrap();
        assert!(pos(3) < pos(4));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn test_dominators() {
        let g = diamond_with_loop();
        let mut a = Analyzer::new();
        a.switch_func(&g);
        assert_eq!(a.idom(1), Some(0));
        assert_eq!(a.idom(3), Some(0));
        assert_eq!(a.idom(4), Some(3));
        assert!(a.dominates(3, 4));
        assert!(!a.dominates(1, 3));
        assert_eq!(a.nearest_common_dominator([1, 2]), Some(0));
        assert_eq!(a.nearest_common_dominator([4]), Some(4));
        assert_eq!(a.nearest_common_dominator([3, 4]), Some(3));
        assert_eq!(a.predecessors(1), &[0, 3]);
    }

    #[test]
    fn test_cycles() {
        let g = diamond_with_loop();
        let mut a = Analyzer::new();
        a.switch_func(&g);
        assert!(a.in_cycle(&g, 1));
        assert!(a.in_cycle(&g, 3));
        assert!(!a.in_cycle(&g, 0));
        assert!(!a.in_cycle(&g, 4));
    }
}
