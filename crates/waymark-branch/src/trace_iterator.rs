use rand_chacha::ChaCha8Rng;
use tracing::debug;

use waymark_iter::Enumerator;

use crate::constructor::{BranchTraceConstructor, ConstructorFlags};
use crate::structure::BranchStructure;

/// Depth-first enumerator of all feasible trace assignments of a structure.
///
/// The iterator owns the structure and mutates its traces in place. A stack
/// of branch positions records the backtracking points; each stack frame's
/// decision enumerator is advanced on backtrack and the execution is popped
/// when it is spent. Trace candidates whose coverage cannot be constructed
/// are skipped transparently, so every yielded value carries a valid
/// coverage assignment.
#[derive(Debug, Clone)]
pub struct BranchTraceIterator {
    structure: BranchStructure,
    max_branch_execution: usize,
    constructor: BranchTraceConstructor,
    /// Position of the branch to execute next; `None` once the walk fell off
    /// the end (trace complete).
    current_branch: Option<usize>,
    branch_stack: Vec<usize>,
    has_value: bool,
    rng: ChaCha8Rng,
}

impl BranchTraceIterator {
    pub fn new(structure: BranchStructure, max_branch_execution: usize, rng: ChaCha8Rng) -> Self {
        Self::with_flags(
            structure,
            max_branch_execution,
            ConstructorFlags::default(),
            rng,
        )
    }

    pub fn with_flags(
        structure: BranchStructure,
        max_branch_execution: usize,
        flags: ConstructorFlags,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            structure,
            max_branch_execution,
            constructor: BranchTraceConstructor::with_flags(flags),
            current_branch: None,
            branch_stack: Vec::new(),
            has_value: false,
            rng,
        }
    }

    pub fn structure(&self) -> &BranchStructure {
        &self.structure
    }

    pub fn init(&mut self) {
        self.branch_stack.clear();
        for index in 0..self.structure.len() {
            self.structure.get_mut(index).trace_mut().clear();
        }

        self.has_value = !self.structure.is_empty();
        self.current_branch = self.structure.next_branch(0);

        if self.current_branch.is_some() {
            self.next();
        } else if self.has_value {
            // No branches: the structure itself is the single trace; the
            // constructor marks every entry fictitious.
            self.constructor.construct(&mut self.structure, &mut self.rng);
        }
    }

    pub fn has_value(&self) -> bool {
        self.has_value
    }

    pub fn next(&mut self) {
        if self.current_branch.is_none() && self.branch_stack.is_empty() {
            // Branch-free structure: its only value was produced by init().
            self.stop();
            return;
        }

        while self.has_value {
            self.advance_trace();

            if self.has_value && self.constructor.construct(&mut self.structure, &mut self.rng) {
                break;
            }
        }
    }

    pub fn stop(&mut self) {
        self.has_value = false;
    }

    /// Finds the next structurally complete trace assignment (coverage not
    /// yet validated).
    fn advance_trace(&mut self) {
        while self.has_value {
            let trace_completed = self.current_branch.is_none();

            if trace_completed {
                match self.branch_stack.last() {
                    Some(&top) => self.current_branch = Some(top),
                    None => {
                        self.stop();
                        return;
                    }
                }
            }

            let current = match self.current_branch {
                Some(current) => current,
                None => return,
            };

            let trace_len = self.structure.get(current).trace().len();

            if !trace_completed && trace_len < self.max_branch_execution {
                // Prolong the trace with a fresh execution.
                let conditional = self.structure.get(current).is_conditional_branch();
                self.structure
                    .get_mut(current)
                    .trace_mut()
                    .add_execution(conditional);
                self.branch_stack.push(current);

                self.follow_branch(current);

                if self.current_branch.is_none() {
                    return;
                }
                continue;
            }

            if trace_completed && self.try_advance_last(current) {
                self.follow_branch(current);

                if self.current_branch.is_none() {
                    return;
                }
                continue;
            }

            // Backtracking: unwind the stack until some decision advances.
            let mut advanced = false;
            while let Some(&top) = self.branch_stack.last() {
                self.current_branch = Some(top);

                if self.try_advance_last(top) {
                    self.follow_branch(top);

                    if self.current_branch.is_none() {
                        return;
                    }
                    advanced = true;
                    break;
                }

                self.structure.get_mut(top).trace_mut().remove_last_execution();
                self.branch_stack.pop();
            }

            if !advanced && self.branch_stack.is_empty() {
                debug!("trace enumeration exhausted");
                self.stop();
                return;
            }
        }
    }

    /// Advances the last execution of the branch at `index`; true when a new
    /// decision value is available.
    fn try_advance_last(&mut self, index: usize) -> bool {
        let trace = self.structure.get_mut(index).trace_mut();
        match trace.last_mut() {
            Some(execution) if execution.has_value() => {
                execution.next();
                execution.has_value()
            }
            _ => false,
        }
    }

    /// Follows the last decision of the branch at `index` and positions
    /// `current_branch` at the next branch entry (or completion).
    fn follow_branch(&mut self, index: usize) {
        let entry = self.structure.get(index);
        let taken = match entry.trace().last() {
            Some(execution) => execution.condition(),
            None => false,
        };
        let resume = if taken { entry.branch_label() } else { index + 1 };
        self.current_branch = self.structure.next_branch(resume);
    }
}

impl Enumerator for BranchTraceIterator {
    type Item = BranchStructure;

    fn init(&mut self) {
        BranchTraceIterator::init(self);
    }

    fn has_value(&self) -> bool {
        BranchTraceIterator::has_value(self)
    }

    fn value(&self) -> BranchStructure {
        self.structure.clone()
    }

    fn next(&mut self) {
        BranchTraceIterator::next(self);
    }

    fn stop(&mut self) {
        BranchTraceIterator::stop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::BranchEntryKind;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    fn branch_at(structure: &mut BranchStructure, index: usize, label: usize, conditional: bool) {
        let entry = structure.get_mut(index);
        entry.set_kind(BranchEntryKind::Branch);
        entry.set_conditional_branch(conditional);
        entry.set_branch_label(label);
    }

    fn collect_decisions(iterator: &mut BranchTraceIterator, branch: usize) -> Vec<Vec<bool>> {
        let mut all = Vec::new();
        iterator.init();
        while iterator.has_value() {
            all.push(iterator.structure().get(branch).trace().decisions());
            iterator.next();
        }
        all
    }

    #[test]
    fn test_unconditional_forward_branch_has_single_trace() {
        // [BRANCH(label=1), BLOCK]
        let mut structure = BranchStructure::new(2);
        branch_at(&mut structure, 0, 1, false);

        let mut iterator = BranchTraceIterator::new(structure, 2, rng());
        let traces = collect_decisions(&mut iterator, 0);

        assert_eq!(traces, vec![vec![true]]);
    }

    #[test]
    fn test_unconditional_trace_is_fictitious() {
        let mut structure = BranchStructure::new(2);
        branch_at(&mut structure, 0, 1, false);

        let mut iterator = BranchTraceIterator::new(structure, 2, rng());
        iterator.init();
        assert!(iterator.has_value());
        assert_eq!(
            iterator.structure().get(0).block_coverage(),
            Some(&BTreeSet::new())
        );
        iterator.next();
        assert!(!iterator.has_value());
    }

    #[test]
    fn test_conditional_backward_loop_traces() {
        // [BLOCK, BRANCH(label=0)] with at most 2 executions. A trace is only
        // complete when control falls off the end, so [true, true] (which
        // would need a third firing) is not feasible.
        let mut structure = BranchStructure::new(2);
        branch_at(&mut structure, 1, 0, true);

        let mut iterator = BranchTraceIterator::new(structure, 2, rng());
        let traces = collect_decisions(&mut iterator, 1);

        let unique: BTreeSet<Vec<bool>> = traces.iter().cloned().collect();
        assert_eq!(unique.len(), traces.len(), "duplicate trace yielded");
        assert_eq!(
            unique,
            [vec![false], vec![true, false]].into_iter().collect()
        );
    }

    #[test]
    fn test_no_duplicates_on_two_branch_structure() {
        // [BRANCH(label=1), BRANCH(label=0)], maxBranchExecution = 3.
        let mut structure = BranchStructure::new(2);
        branch_at(&mut structure, 0, 1, true);
        branch_at(&mut structure, 1, 0, true);

        let mut iterator = BranchTraceIterator::new(structure, 3, rng());
        let mut seen = BTreeSet::new();
        let mut count = 0usize;

        iterator.init();
        while iterator.has_value() {
            let key = (
                iterator.structure().get(0).trace().decisions(),
                iterator.structure().get(1).trace().decisions(),
            );
            assert!(seen.insert(key), "duplicate trace assignment");
            count += 1;
            iterator.next();
            assert!(count < 1000, "runaway enumeration");
        }

        assert!(count > 0);
    }

    #[test]
    fn test_branch_free_structure_yields_once() {
        let structure = BranchStructure::new(3);
        let mut iterator = BranchTraceIterator::new(structure, 2, rng());

        iterator.init();
        assert!(iterator.has_value());
        iterator.next();
        assert!(!iterator.has_value());
    }

    #[test]
    fn test_empty_structure_yields_nothing() {
        let mut iterator = BranchTraceIterator::new(BranchStructure::new(0), 2, rng());
        iterator.init();
        assert!(!iterator.has_value());
    }

    #[test]
    fn test_every_yield_has_coverage() {
        let mut structure = BranchStructure::new(3);
        branch_at(&mut structure, 1, 0, true);

        let mut iterator = BranchTraceIterator::new(structure, 2, rng());
        iterator.init();
        while iterator.has_value() {
            for entry in iterator.structure().entries() {
                if entry.is_branch() {
                    assert!(
                        entry.can_insert_step_into_block() || entry.can_insert_step_into_slot()
                    );
                }
            }
            iterator.next();
        }
    }
}
