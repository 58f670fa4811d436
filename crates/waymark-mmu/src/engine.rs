use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use waymark_iter::Enumerator;

use crate::access::DataType;
use crate::allocator::{AddressAllocator, EntryIdAllocator};
use crate::solution::MemorySolution;
use crate::solver::{MemorySolver, SolveError, SolverContext};
use crate::spec::{AddressId, MemoryRegion, MmuSubsystem};
use crate::structure::MemoryAccessStructure;

/// Allocation partitions per address type: segments for the virtual space,
/// data regions for the physical one, nothing for intermediates.
fn regions_per_address(memory: &MmuSubsystem) -> BTreeMap<AddressId, Vec<MemoryRegion>> {
    let mut map = BTreeMap::new();

    for (id, _) in memory.addresses() {
        let regions = if Some(id) == memory.virtual_address() {
            memory.segments().iter().map(|s| s.as_region()).collect()
        } else if Some(id) == memory.physical_address() {
            memory.regions().to_vec()
        } else {
            Vec::new()
        };
        map.insert(id, regions);
    }

    map
}

/// Drives the solver over a stream of candidate access structures and yields
/// the accepted solutions.
///
/// Allocator state is reset per candidate; the first satisfiable solution of
/// each structure wins, unsatisfiable structures are skipped. Exhaustion of
/// the candidate stream ends the iteration silently.
pub struct MemoryEngine<'a, C, S>
where
    C: SolverContext,
    S: Enumerator<Item = MemoryAccessStructure>,
{
    memory: &'a MmuSubsystem,
    structures: S,
    context: C,
    address_allocator: AddressAllocator,
    entry_allocator: EntryIdAllocator,
    align_type: Option<DataType>,
    rng: ChaCha8Rng,
    solution: Option<MemorySolution>,
}

impl<'a, C, S> MemoryEngine<'a, C, S>
where
    C: SolverContext,
    S: Enumerator<Item = MemoryAccessStructure>,
{
    pub fn new(
        memory: &'a MmuSubsystem,
        structures: S,
        context: C,
        align_type: Option<DataType>,
        seed: u64,
    ) -> Self {
        let partitions = regions_per_address(memory);
        Self {
            memory,
            structures,
            context,
            address_allocator: AddressAllocator::new(memory, &partitions),
            entry_allocator: EntryIdAllocator::new(memory),
            align_type,
            rng: ChaCha8Rng::seed_from_u64(seed),
            solution: None,
        }
    }

    /// Seeds the iteration with the first accepted solution.
    pub fn init(&mut self) -> Result<(), SolveError> {
        self.structures.init();
        self.find_solution()
    }

    pub fn has_value(&self) -> bool {
        self.solution.is_some()
    }

    pub fn value(&self) -> Option<&MemorySolution> {
        self.solution.as_ref()
    }

    /// Hands out the current solution and leaves the engine positioned on
    /// the same candidate.
    pub fn take_value(&mut self) -> Option<MemorySolution> {
        self.solution.take()
    }

    /// Advances to the next accepted solution.
    pub fn next(&mut self) -> Result<(), SolveError> {
        self.structures.next();
        self.find_solution()
    }

    pub fn stop(&mut self) {
        self.structures.stop();
        self.solution = None;
    }

    fn find_solution(&mut self) -> Result<(), SolveError> {
        self.solution = None;

        while self.structures.has_value() {
            let structure = self.structures.value();

            // Allocation state is scoped per candidate.
            self.address_allocator.reset();
            self.entry_allocator.reset();

            let solver = MemorySolver::new(
                self.memory,
                &structure,
                &mut self.context,
                &mut self.address_allocator,
                &mut self.entry_allocator,
                self.align_type,
                &mut self.rng,
            );

            match solver.solve() {
                Ok(solution) => {
                    self.solution = Some(solution);
                    return Ok(());
                }
                Err(error) if error.is_unsat() => {
                    debug!(%error, "structure rejected, advancing");
                    self.structures.next();
                }
                Err(fatal) => return Err(fatal),
            }
        }

        Ok(())
    }
}

/// Solves a batch of independent candidate structures across worker threads.
///
/// Every structure gets its own allocator pools, context and RNG stream, so
/// the per-candidate collision guarantees hold within each shard.
pub fn solve_batch_parallel<C, F>(
    memory: &MmuSubsystem,
    structures: &[MemoryAccessStructure],
    make_context: F,
    align_type: Option<DataType>,
    seed: u64,
) -> Vec<Result<MemorySolution, SolveError>>
where
    C: SolverContext + Send,
    F: Fn() -> C + Sync,
{
    let partitions = regions_per_address(memory);

    structures
        .par_iter()
        .enumerate()
        .map(|(shard, structure)| {
            let mut context = make_context();
            let mut address_allocator = AddressAllocator::new(memory, &partitions);
            let mut entry_allocator = EntryIdAllocator::new(memory);
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(shard as u64));

            MemorySolver::new(
                memory,
                structure,
                &mut context,
                &mut address_allocator,
                &mut entry_allocator,
                align_type,
                &mut rng,
            )
            .solve()
        })
        .collect()
}
