use std::collections::BTreeMap;

use crate::entry::BranchEntry;
use crate::execution::BranchExecution;
use crate::structure::BranchStructure;

/// Visitor verdict: keep walking or stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    Stop,
}

/// Typed callbacks dispatched by [`BranchStructureWalker`].
///
/// `on_branch` receives the execution driving the current firing together
/// with its ordinal (how many times this branch has fired before, starting
/// at 0). Visitors that need to mutate the structure collect what they learn
/// and write it back after the walk.
pub trait BranchEntryVisitor {
    fn on_branch(
        &mut self,
        index: usize,
        entry: &BranchEntry,
        execution: &BranchExecution,
        ordinal: usize,
    ) -> Walk;

    fn on_slot(&mut self, index: usize, entry: &BranchEntry) -> Walk;

    fn on_block(&mut self, index: usize, entry: &BranchEntry) -> Walk;
}

/// Single-pass interpreter of a branch structure under its stored traces.
///
/// The walk replays execution: the k-th time a branch entry is reached, its
/// k-th stored execution decides taken/not-taken. The delay slot directly
/// following a branch executes as part of that branch's step (it still runs
/// when the branch is taken); a slot reached as a jump target is visited like
/// any other entry. The walk ends when it falls off the structure, when the
/// visitor stops it, or when a branch is reached with its trace exhausted.
pub struct BranchStructureWalker<'a> {
    structure: &'a BranchStructure,
}

impl<'a> BranchStructureWalker<'a> {
    pub fn new(structure: &'a BranchStructure) -> Self {
        Self { structure }
    }

    pub fn start<V: BranchEntryVisitor>(&self, visitor: &mut V) {
        self.start_at(0, visitor);
    }

    pub fn start_at<V: BranchEntryVisitor>(&self, start: usize, visitor: &mut V) {
        let len = self.structure.len();
        let mut fired: BTreeMap<usize, usize> = BTreeMap::new();
        let mut current = start;

        while current < len {
            let entry = self.structure.get(current);

            if entry.is_branch() {
                let ordinal = *fired.get(&current).unwrap_or(&0);
                if ordinal >= entry.trace().len() {
                    return;
                }
                fired.insert(current, ordinal + 1);

                let execution = entry.trace().get(ordinal);
                if visitor.on_branch(current, entry, execution, ordinal) == Walk::Stop {
                    return;
                }

                // The slot after the branch executes before control transfers.
                let mut fallthrough = current + 1;
                if current + 1 < len && self.structure.get(current + 1).is_slot() {
                    let slot = self.structure.get(current + 1);
                    if visitor.on_slot(current + 1, slot) == Walk::Stop {
                        return;
                    }
                    fallthrough = current + 2;
                }

                current = if execution.condition() {
                    entry.branch_label()
                } else {
                    fallthrough
                };
            } else if entry.is_slot() {
                if visitor.on_slot(current, entry) == Walk::Stop {
                    return;
                }
                current += 1;
            } else {
                if visitor.on_block(current, entry) == Walk::Stop {
                    return;
                }
                current += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::BranchEntryKind;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        stop_after: Option<usize>,
    }

    impl BranchEntryVisitor for Recorder {
        fn on_branch(
            &mut self,
            index: usize,
            _entry: &BranchEntry,
            execution: &BranchExecution,
            ordinal: usize,
        ) -> Walk {
            self.events
                .push(format!("B{index}/{ordinal}={}", execution.condition()));
            self.verdict()
        }

        fn on_slot(&mut self, index: usize, _entry: &BranchEntry) -> Walk {
            self.events.push(format!("S{index}"));
            self.verdict()
        }

        fn on_block(&mut self, index: usize, _entry: &BranchEntry) -> Walk {
            self.events.push(format!("K{index}"));
            self.verdict()
        }
    }

    impl Recorder {
        fn verdict(&self) -> Walk {
            match self.stop_after {
                Some(n) if self.events.len() >= n => Walk::Stop,
                _ => Walk::Continue,
            }
        }
    }

    /// [BRANCH(label), BLOCK, BLOCK] with the given decisions.
    fn loop_structure(label: usize, decisions: &[bool]) -> BranchStructure {
        let mut structure = BranchStructure::new(3);
        let entry = structure.get_mut(0);
        entry.set_kind(BranchEntryKind::Branch);
        entry.set_conditional_branch(true);
        entry.set_branch_label(label);
        for &decision in decisions {
            entry.trace_mut().add_execution(true);
            if decision {
                entry.trace_mut().last_mut().unwrap().next();
            }
        }
        structure
    }

    #[test]
    fn test_fallthrough_walk() {
        let structure = loop_structure(0, &[false]);
        let mut recorder = Recorder::default();
        BranchStructureWalker::new(&structure).start(&mut recorder);
        assert_eq!(recorder.events, vec!["B0/0=false", "K1", "K2"]);
    }

    #[test]
    fn test_taken_branch_loops_until_trace_ends() {
        // Branch jumps to itself: taken, taken, then not taken.
        let structure = loop_structure(0, &[true, true, false]);
        let mut recorder = Recorder::default();
        BranchStructureWalker::new(&structure).start(&mut recorder);
        assert_eq!(
            recorder.events,
            vec!["B0/0=true", "B0/1=true", "B0/2=false", "K1", "K2"]
        );
    }

    #[test]
    fn test_exhausted_trace_stops_walk() {
        // A single taken execution loops back to the branch, whose trace is
        // then spent.
        let structure = loop_structure(0, &[true]);
        let mut recorder = Recorder::default();
        BranchStructureWalker::new(&structure).start(&mut recorder);
        assert_eq!(recorder.events, vec!["B0/0=true"]);
    }

    #[test]
    fn test_delay_slot_runs_with_taken_branch() {
        // [BRANCH(label=3), SLOT, BLOCK, BLOCK]; taken skips the block at 2.
        let mut structure = BranchStructure::new(4);
        structure.get_mut(0).set_kind(BranchEntryKind::Branch);
        structure.get_mut(0).set_branch_label(3);
        structure.get_mut(0).trace_mut().add_execution(false);
        structure.get_mut(1).set_kind(BranchEntryKind::Slot);

        let mut recorder = Recorder::default();
        BranchStructureWalker::new(&structure).start(&mut recorder);
        assert_eq!(recorder.events, vec!["B0/0=true", "S1", "K3"]);
    }

    #[test]
    fn test_early_stop() {
        let structure = loop_structure(0, &[false]);
        let mut recorder = Recorder {
            stop_after: Some(2),
            ..Recorder::default()
        };
        BranchStructureWalker::new(&structure).start(&mut recorder);
        assert_eq!(recorder.events.len(), 2);
    }

    #[test]
    fn test_start_at_offset() {
        let structure = loop_structure(0, &[false]);
        let mut recorder = Recorder::default();
        BranchStructureWalker::new(&structure).start_at(1, &mut recorder);
        assert_eq!(recorder.events, vec!["K1", "K2"]);
    }
}
