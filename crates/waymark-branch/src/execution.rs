use std::collections::BTreeSet;

use waymark_iter::{BooleanEnumerator, Enumerator};

/// One execution (firing) of a branch instruction along a concrete control
/// path.
///
/// The decision is itself a small enumerator: two-valued for conditional
/// branches (enumeration starts at not-taken), fixed to taken for
/// unconditional ones. The block/slot segments record which basic blocks and
/// delay slots execute between this firing and the next one of the same
/// branch; they are recomputed from scratch for every candidate trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchExecution {
    decision: BooleanEnumerator,
    block_segment: BTreeSet<usize>,
    slot_segment: BTreeSet<usize>,
    block_coverage_count: usize,
    slot_coverage_count: usize,
}

impl BranchExecution {
    pub fn new(conditional: bool) -> Self {
        let decision = if conditional {
            BooleanEnumerator::two_valued()
        } else {
            BooleanEnumerator::fixed(true)
        };
        Self {
            decision,
            block_segment: BTreeSet::new(),
            slot_segment: BTreeSet::new(),
            block_coverage_count: 0,
            slot_coverage_count: 0,
        }
    }

    /// The current taken/not-taken decision.
    pub fn condition(&self) -> bool {
        self.decision.value()
    }

    /// Whether another decision value remains to be tried.
    pub fn has_value(&self) -> bool {
        self.decision.has_value()
    }

    /// Advances the decision, exhausting it if no value remains.
    pub fn next(&mut self) {
        self.decision.next();
    }

    /// Drops the segments; decisions and counts are left untouched.
    pub fn clear(&mut self) {
        self.block_segment.clear();
        self.slot_segment.clear();
    }

    pub fn block_segment(&self) -> &BTreeSet<usize> {
        &self.block_segment
    }

    pub fn slot_segment(&self) -> &BTreeSet<usize> {
        &self.slot_segment
    }

    pub fn set_block_segment(&mut self, segment: BTreeSet<usize>) {
        self.block_segment = segment;
    }

    pub fn set_slot_segment(&mut self, segment: BTreeSet<usize>) {
        self.slot_segment = segment;
    }

    pub fn block_coverage_count(&self) -> usize {
        self.block_coverage_count
    }

    pub fn set_block_coverage_count(&mut self, count: usize) {
        self.block_coverage_count = count;
    }

    pub fn slot_coverage_count(&self) -> usize {
        self.slot_coverage_count
    }

    pub fn set_slot_coverage_count(&mut self, count: usize) {
        self.slot_coverage_count = count;
    }
}
