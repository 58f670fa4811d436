use std::collections::BTreeSet;

use crate::trace::BranchTrace;

/// Kind of a branch-structure node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchEntryKind {
    /// Branch instruction.
    Branch,
    /// Delay slot of the preceding branch.
    Slot,
    /// Basic block.
    Block,
}

/// One node of a linear branch structure.
///
/// Coverage fields are `None` until the trace constructor has run for the
/// current trace. `Some(empty set)` on a block coverage means the branch is
/// fictitious and needs no setup code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEntry {
    kind: BranchEntryKind,
    conditional_branch: bool,
    equivalence_class: usize,
    branch_label: usize,
    trace: BranchTrace,
    block_coverage: Option<BTreeSet<usize>>,
    slot_coverage: Option<BTreeSet<usize>>,
}

impl BranchEntry {
    pub fn new(
        kind: BranchEntryKind,
        conditional_branch: bool,
        equivalence_class: usize,
        branch_label: usize,
    ) -> Self {
        Self {
            kind,
            conditional_branch,
            equivalence_class,
            branch_label,
            trace: BranchTrace::new(),
            block_coverage: None,
            slot_coverage: None,
        }
    }

    pub fn block() -> Self {
        Self::new(BranchEntryKind::Block, false, 0, 0)
    }

    pub fn kind(&self) -> BranchEntryKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: BranchEntryKind) {
        self.kind = kind;
    }

    pub fn is_branch(&self) -> bool {
        self.kind == BranchEntryKind::Branch
    }

    pub fn is_slot(&self) -> bool {
        self.kind == BranchEntryKind::Slot
    }

    pub fn is_block(&self) -> bool {
        self.kind == BranchEntryKind::Block
    }

    pub fn is_conditional_branch(&self) -> bool {
        self.conditional_branch
    }

    pub fn set_conditional_branch(&mut self, conditional: bool) {
        self.conditional_branch = conditional;
    }

    pub fn equivalence_class(&self) -> usize {
        self.equivalence_class
    }

    pub fn set_equivalence_class(&mut self, class: usize) {
        self.equivalence_class = class;
    }

    /// Index of the jump target within the structure.
    pub fn branch_label(&self) -> usize {
        self.branch_label
    }

    pub fn set_branch_label(&mut self, label: usize) {
        self.branch_label = label;
    }

    pub fn trace(&self) -> &BranchTrace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut BranchTrace {
        &mut self.trace
    }

    pub fn block_coverage(&self) -> Option<&BTreeSet<usize>> {
        self.block_coverage.as_ref()
    }

    pub fn set_block_coverage(&mut self, coverage: Option<BTreeSet<usize>>) {
        self.block_coverage = coverage;
    }

    pub fn slot_coverage(&self) -> Option<&BTreeSet<usize>> {
        self.slot_coverage.as_ref()
    }

    pub fn set_slot_coverage(&mut self, coverage: Option<BTreeSet<usize>>) {
        self.slot_coverage = coverage;
    }

    pub fn can_insert_step_into_block(&self) -> bool {
        self.block_coverage.is_some()
    }

    pub fn can_insert_step_into_slot(&self) -> bool {
        self.slot_coverage.is_some()
    }
}
