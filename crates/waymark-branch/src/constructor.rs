use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::entry::BranchEntry;
use crate::execution::BranchExecution;
use crate::structure::BranchStructure;
use crate::walker::{BranchEntryVisitor, BranchStructureWalker, Walk};

/// Heuristic switches of the coverage constructor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstructorFlags {
    /// Never fall back to delay-slot coverage; traces that would need it are
    /// rejected instead.
    pub do_not_use_delay_slots: bool,
}

/// Collects block/slot segments per branch execution during a walk.
///
/// A segment of execution k of branch b is the set of blocks (slots) visited
/// between firing k and firing k+1 of b. Segments are accumulated here and
/// written back into the executions once the walk is over.
#[derive(Default)]
struct SegmentConstructor {
    /// Branch index -> (execution ordinal, blocks so far, slots so far).
    open: BTreeMap<usize, (usize, BTreeSet<usize>, BTreeSet<usize>)>,
    done: Vec<(usize, usize, BTreeSet<usize>, BTreeSet<usize>)>,
}

impl SegmentConstructor {
    fn close(&mut self, branch: usize) {
        if let Some((ordinal, blocks, slots)) = self.open.remove(&branch) {
            self.done.push((branch, ordinal, blocks, slots));
        }
    }

    fn apply(mut self, structure: &mut BranchStructure) {
        let open: Vec<usize> = self.open.keys().copied().collect();
        for branch in open {
            self.close(branch);
        }
        for (branch, ordinal, blocks, slots) in self.done {
            let execution = structure.get_mut(branch).trace_mut().get_mut(ordinal);
            execution.set_block_segment(blocks);
            execution.set_slot_segment(slots);
        }
    }
}

impl BranchEntryVisitor for SegmentConstructor {
    fn on_branch(
        &mut self,
        index: usize,
        _entry: &BranchEntry,
        _execution: &BranchExecution,
        ordinal: usize,
    ) -> Walk {
        self.close(index);
        self.open
            .insert(index, (ordinal, BTreeSet::new(), BTreeSet::new()));
        Walk::Continue
    }

    fn on_slot(&mut self, index: usize, _entry: &BranchEntry) -> Walk {
        for (_, _, slots) in self.open.values_mut() {
            slots.insert(index);
        }
        Walk::Continue
    }

    fn on_block(&mut self, index: usize, _entry: &BranchEntry) -> Walk {
        for (_, blocks, _) in self.open.values_mut() {
            blocks.insert(index);
        }
        Walk::Continue
    }
}

/// Counts, for one branch entry, how many covered blocks and own-slot visits
/// fall between consecutive firings of that branch.
struct CoverageCounter {
    target: usize,
    coverage: BTreeSet<usize>,
    block_count: usize,
    slot_count: usize,
    /// Execution ordinal -> (block count, slot count).
    counts: BTreeMap<usize, (usize, usize)>,
}

impl CoverageCounter {
    fn new(target: usize, coverage: BTreeSet<usize>) -> Self {
        Self {
            target,
            coverage,
            block_count: 0,
            slot_count: 0,
            counts: BTreeMap::new(),
        }
    }

    fn apply(self, structure: &mut BranchStructure) {
        let trace = structure.get_mut(self.target).trace_mut();
        for (ordinal, (blocks, slots)) in self.counts {
            let execution = trace.get_mut(ordinal);
            execution.set_block_coverage_count(blocks);
            execution.set_slot_coverage_count(slots);
        }
    }
}

impl BranchEntryVisitor for CoverageCounter {
    fn on_branch(
        &mut self,
        index: usize,
        _entry: &BranchEntry,
        _execution: &BranchExecution,
        ordinal: usize,
    ) -> Walk {
        if index == self.target {
            self.counts.insert(ordinal, (self.block_count, self.slot_count));
            self.block_count = 0;
            self.slot_count = 0;
        }
        Walk::Continue
    }

    fn on_slot(&mut self, index: usize, _entry: &BranchEntry) -> Walk {
        // Only the branch's own single-instruction delay slot counts.
        if index == self.target + 1 {
            self.slot_count += 1;
        }
        Walk::Continue
    }

    fn on_block(&mut self, index: usize, _entry: &BranchEntry) -> Walk {
        if self.coverage.contains(&index) {
            self.block_count += 1;
        }
        Walk::Continue
    }
}

/// Computes the coverage assignment for a structure whose traces are fixed.
///
/// For every branch entry the constructor determines which basic blocks (or,
/// as a fallback, which delay slots) must host condition-mutating setup code
/// so the stored decision sequence is realizable. Failure means the current
/// trace combination is infeasible and must be backtracked by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchTraceConstructor {
    flags: ConstructorFlags,
}

impl BranchTraceConstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flags(flags: ConstructorFlags) -> Self {
        Self { flags }
    }

    /// Recomputes segments and coverage for all entries. Returns `false` when
    /// some entry admits no coverage under the current flags.
    pub fn construct(&self, structure: &mut BranchStructure, rng: &mut ChaCha8Rng) -> bool {
        self.construct_segments(structure);

        for index in 0..structure.len() {
            if !self.construct_coverage(structure, index, rng) {
                debug!(index, "no coverage for entry, trace rejected");
                return false;
            }
            self.calculate_coverage_counts(structure, index);
        }

        true
    }

    fn construct_segments(&self, structure: &mut BranchStructure) {
        for index in 0..structure.len() {
            let trace = structure.get_mut(index).trace_mut();
            for i in 0..trace.len() {
                trace.get_mut(i).clear();
            }
        }

        let mut segments = SegmentConstructor::default();
        BranchStructureWalker::new(structure).start(&mut segments);
        segments.apply(structure);
    }

    /// Union of the blocks over all segments of the entry's trace.
    fn block_union(entry: &BranchEntry) -> BTreeSet<usize> {
        let mut union = BTreeSet::new();
        for execution in entry.trace().executions() {
            union.extend(execution.block_segment().iter().copied());
        }
        union
    }

    /// Intersection of the slots over all segments of the entry's trace.
    fn slot_intersection(entry: &BranchEntry) -> BTreeSet<usize> {
        let executions = entry.trace().executions();
        let Some(first) = executions.first() else {
            return BTreeSet::new();
        };

        let mut intersection = first.slot_segment().clone();
        for execution in &executions[1..] {
            intersection = intersection
                .intersection(execution.slot_segment())
                .copied()
                .collect();
        }
        intersection
    }

    /// Block segments of the executions directly preceding a decision change.
    fn change_segments(entry: &BranchEntry) -> Vec<BTreeSet<usize>> {
        let executions = entry.trace().executions();
        let mut segments = Vec::new();
        for pair in executions.windows(2) {
            if pair[0].condition() != pair[1].condition() {
                segments.push(pair[0].block_segment().clone());
            }
        }
        segments
    }

    fn construct_coverage(
        &self,
        structure: &mut BranchStructure,
        index: usize,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let entry = structure.get(index);
        let blocks = Self::block_union(entry);
        let mut segments = Self::change_segments(entry);

        let slot_fallback = segments.iter().any(|segment| segment.is_empty());
        let slot_intersection = Self::slot_intersection(entry);

        let entry = structure.get_mut(index);
        entry.set_block_coverage(None);
        entry.set_slot_coverage(None);

        // Unreachable or fictitious branching needs no setup code.
        if segments.is_empty() {
            entry.set_block_coverage(Some(BTreeSet::new()));
            return true;
        }

        // An empty change-segment has no block to mutate the condition in;
        // fall back to delay slots common to every segment, if allowed.
        if slot_fallback {
            if self.flags.do_not_use_delay_slots {
                return false;
            }
            entry.set_slot_coverage(Some(slot_intersection));
            return true;
        }

        let mut coverage = BTreeSet::new();

        if segments.len() == 1 {
            coverage.insert(choose(&segments[0], rng));
            entry.set_block_coverage(Some(coverage));
            return true;
        }

        // Greedy set cover: repeatedly take the block hitting the most
        // still-uncovered segments, random among ties.
        while !segments.is_empty() {
            let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
            for &block in &blocks {
                for segment in &segments {
                    if segment.contains(&block) {
                        *counts.entry(block).or_insert(0) += 1;
                    }
                }
            }

            let max_count = counts.values().copied().max().unwrap_or(0);
            let best: BTreeSet<usize> = counts
                .iter()
                .filter(|(_, &count)| count == max_count)
                .map(|(&block, _)| block)
                .collect();

            let block = choose(&best, rng);
            coverage.insert(block);
            segments.retain(|segment| !segment.contains(&block));
        }

        structure
            .get_mut(index)
            .set_block_coverage(Some(coverage));
        true
    }

    fn calculate_coverage_counts(&self, structure: &mut BranchStructure, index: usize) {
        let coverage = structure
            .get(index)
            .block_coverage()
            .cloned()
            .unwrap_or_default();

        let mut counter = CoverageCounter::new(index, coverage);
        BranchStructureWalker::new(structure).start(&mut counter);
        counter.apply(structure);
    }
}

fn choose(set: &BTreeSet<usize>, rng: &mut ChaCha8Rng) -> usize {
    let position = rng.gen_range(0..set.len());
    *set.iter().nth(position).unwrap()
}
