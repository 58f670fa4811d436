use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::debug;

use crate::access::{BufferAccessEvent, DataType, MemoryAccess};
use crate::allocator::{AddressAllocator, AllocatorError, EntryIdAllocator};
use crate::loader::AddressAndEntry;
use crate::solution::{AddressObject, EntryObject, MemorySolution, MmuEntry};
use crate::spec::{AddressId, BufferId, IntegerVariable, MmuSubsystem};
use crate::state::BufferStateTracker;
use crate::structure::MemoryAccessStructure;

/// Outcome classification of the constraint solving.
///
/// `Unsat` is the ordinary "this candidate admits no solution" verdict that
/// drives the engine to the next structure. `Internal` marks an invariant
/// breach in the solver or its inputs and is never retried.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("unsat: {0}")]
    Unsat(String),
    #[error("internal inconsistency: {0}")]
    Internal(String),
}

impl SolveError {
    pub fn is_unsat(&self) -> bool {
        matches!(self, SolveError::Unsat(_))
    }
}

fn unsat(error: AllocatorError) -> SolveError {
    SolveError::Unsat(error.to_string())
}

/// External seams of the solver: address construction and correction,
/// environment-reserved addresses, and entry filling.
pub trait SolverContext {
    /// Builds the initial address object of an access, with every address
    /// type along its path assigned.
    fn construct_address(
        &mut self,
        memory: &MmuSubsystem,
        access: &MemoryAccess,
        allocator: &mut AddressAllocator,
        rng: &mut ChaCha8Rng,
    ) -> Result<AddressObject, SolveError>;

    /// Patches inconsistencies after dependency solving.
    fn correct_address(
        &mut self,
        _memory: &MmuSubsystem,
        _object: &mut AddressObject,
    ) -> Result<(), SolveError> {
        Ok(())
    }

    /// Whether the environment already owns this address (allocating it
    /// would cause an unintended hit).
    fn is_reserved(&self, _address_type: AddressId, _address: u64) -> bool {
        false
    }

    /// Fills a buffer entry from the solved address object.
    fn fill_entry(
        &mut self,
        memory: &MmuSubsystem,
        buffer: BufferId,
        object: &AddressObject,
        entry: &mut MmuEntry,
    );
}

/// Context sufficient for model-only generation: fresh aligned addresses per
/// address type and address-derived entries.
#[derive(Debug, Clone, Default)]
pub struct BasicSolverContext;

impl SolverContext for BasicSolverContext {
    fn construct_address(
        &mut self,
        memory: &MmuSubsystem,
        access: &MemoryAccess,
        allocator: &mut AddressAllocator,
        _rng: &mut ChaCha8Rng,
    ) -> Result<AddressObject, SolveError> {
        let mut object = AddressObject::new(access.clone());

        for address_type in access.path.address_types(memory) {
            let address = allocator
                .allocate_address(address_type, 0, access.region.as_deref())
                .map_err(unsat)?;
            object.set_address(address_type, access.data_type().align(address));
        }

        Ok(object)
    }

    fn fill_entry(
        &mut self,
        memory: &MmuSubsystem,
        buffer: BufferId,
        object: &AddressObject,
        entry: &mut MmuEntry,
    ) {
        let address_type = memory.buffer(buffer).address();
        if let Some(address) = object.address(address_type) {
            entry.set_address(address);
        }
    }
}

/// Solver of the hit/miss/replacement constraints of one access structure.
///
/// Walks the accesses in program order; for each one, aligns and assigns its
/// addresses according to the declared dependencies, then drives every
/// buffer on its path into the demanded state, allocating tags and entries
/// and scheduling preparatory loads. Two follow-up passes correct the
/// addresses and fill the allocated entries.
pub struct MemorySolver<'a, C: SolverContext> {
    memory: &'a MmuSubsystem,
    structure: &'a MemoryAccessStructure,
    context: &'a mut C,
    address_allocator: &'a mut AddressAllocator,
    entry_allocator: &'a mut EntryIdAllocator,
    align_type: Option<DataType>,
    rng: &'a mut ChaCha8Rng,

    /// Per buffer and index, tags already scheduled for a priming hit load.
    buffer_hit_tags: BTreeMap<BufferId, BTreeMap<u64, BTreeSet<u64>>>,
    /// Per buffer, indices whose replacing sequence is already scheduled.
    buffer_replaced_indices: BTreeMap<BufferId, BTreeSet<u64>>,
    /// Per access, buffers already handled (views revisit their parents).
    handled_buffers: BTreeMap<usize, BTreeSet<BufferId>>,

    solution: MemorySolution,
}

impl<'a, C: SolverContext> MemorySolver<'a, C> {
    pub fn new(
        memory: &'a MmuSubsystem,
        structure: &'a MemoryAccessStructure,
        context: &'a mut C,
        address_allocator: &'a mut AddressAllocator,
        entry_allocator: &'a mut EntryIdAllocator,
        align_type: Option<DataType>,
        rng: &'a mut ChaCha8Rng,
    ) -> Self {
        let solution = MemorySolution::new(structure.size());
        Self {
            memory,
            structure,
            context,
            address_allocator,
            entry_allocator,
            align_type,
            rng,
            buffer_hit_tags: BTreeMap::new(),
            buffer_replaced_indices: BTreeMap::new(),
            handled_buffers: BTreeMap::new(),
            solution,
        }
    }

    /// Runs the solve, correct and fill passes over the whole structure.
    pub fn solve(mut self) -> Result<MemorySolution, SolveError> {
        for j in 0..self.structure.size() {
            self.solve_access(j).map_err(|error| {
                debug!(access = j, %error, "solve pass failed");
                error
            })?;
        }

        for j in 0..self.structure.size() {
            self.correct(j)?;
        }

        for j in 0..self.structure.size() {
            self.fill(j)?;
        }

        debug!("structure solved");
        Ok(self.solution)
    }

    fn object_address(&self, j: usize, address_type: AddressId) -> Result<u64, SolveError> {
        self.solution
            .address_object(j)
            .and_then(|object| object.address(address_type))
            .ok_or_else(|| {
                SolveError::Internal(format!(
                    "access {j} has no address of type #{}",
                    address_type.0
                ))
            })
    }

    /// Variable assignment visible to guards of access `j`.
    fn guard_lookup(&self, j: usize) -> impl Fn(&IntegerVariable) -> u64 {
        let mut values: BTreeMap<IntegerVariable, u64> = BTreeMap::new();
        if let Some(object) = self.solution.address_object(j) {
            for (&address_type, &value) in object.addresses() {
                values.insert(self.memory.address(address_type).variable(), value);
            }
            for (variable, &value) in object.attributes() {
                values.insert(variable.clone(), value);
            }
        }
        move |variable| values.get(variable).copied().unwrap_or(0)
    }

    fn choose_region(&mut self) -> Option<String> {
        let regions = self.memory.regions();
        if regions.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..regions.len());
        Some(regions[index].name.clone())
    }

    /// Handles one access: address construction, alignment, dependency
    /// assignment and buffer constraints.
    fn solve_access(&mut self, j: usize) -> Result<(), SolveError> {
        let memory = self.memory;
        let structure = self.structure;
        let access = structure.access(j);

        debug!(access = j, "solving access");

        let object = self
            .context
            .construct_address(memory, access, self.address_allocator, self.rng)?;
        self.solution.set_address_object(j, object);

        // Align every assigned address against its equality partners.
        let address_types: Vec<AddressId> = self
            .solution
            .address_object(j)
            .map(|object| object.addresses().keys().copied().collect())
            .unwrap_or_default();

        for address_type in &address_types {
            self.solve_align_constraint(j, *address_type)?;
        }

        // Assign tag, index and offset according to the dependencies.
        let dependency = structure.united_dependency(j);

        for address_type in dependency.hazardous_addresses().collect::<Vec<_>>() {
            if !dependency.addr_equal_relation(address_type).is_empty() {
                self.solve_addr_equal_constraint(j, address_type)?;

                // An address copied verbatim must still be aligned.
                let address = self.object_address(j, address_type)?;
                if !structure.access(j).data_type().is_aligned(address) {
                    return Err(SolveError::Internal(format!(
                        "unaligned address {address:#x} after ADDR-EQUAL solving"
                    )));
                }
            } else {
                for buffer in dependency.hazardous_buffers_of_address(address_type, memory) {
                    if !dependency.tag_equal_relation(buffer, memory).is_empty() {
                        self.solve_tag_equal_constraint(j, buffer)?;
                    } else if !dependency.index_equal_relation(buffer).is_empty() {
                        self.solve_index_equal_constraint(j, buffer)?;
                    }
                }
            }
        }

        // Drive every buffer on the path into its demanded state.
        let path_buffers: Vec<BufferId> = structure.access(j).path.buffers().collect();
        for buffer in path_buffers {
            self.solve_buffer_constraint(j, buffer)?;
        }

        Ok(())
    }

    /// Aligns the address to the widest data type among this access and its
    /// future ADDR-EQUAL partners.
    fn solve_align_constraint(&mut self, j: usize, address_type: AddressId) -> Result<(), SolveError> {
        let structure = self.structure;
        let mut max_type = structure.access(j).data_type();

        for k in j + 1..structure.size() {
            let next_dependency = structure.united_dependency(k);
            if next_dependency.addr_equal_relation(address_type).contains(&j) {
                let data_type = structure.access(k).data_type();
                if data_type.size() > max_type.size() {
                    max_type = data_type;
                }
            }
        }

        if let Some(align) = self.align_type {
            if align.size() > max_type.size() {
                max_type = align;
            }
        }

        let address = self.object_address(j, address_type)?;
        if !max_type.is_aligned(address) {
            let aligned = max_type.align(address);
            debug!(access = j, from = address, to = aligned, "aligning address");
            if let Some(object) = self.solution.address_object_mut(j) {
                object.set_address(address_type, aligned);
            }
        }

        Ok(())
    }

    /// ADDR-EQUAL: copy the address of the earliest related access verbatim.
    fn solve_addr_equal_constraint(
        &mut self,
        j: usize,
        address_type: AddressId,
    ) -> Result<(), SolveError> {
        let dependency = self.structure.united_dependency(j);

        if let Some(&i) = dependency.addr_equal_relation(address_type).iter().next() {
            let address = self.object_address(i, address_type)?;
            if let Some(object) = self.solution.address_object_mut(j) {
                object.set_address(address_type, address);
            }
        }

        Ok(())
    }

    /// TAG-EQUAL: copy tag and index of the related access, keep the own
    /// offset.
    fn solve_tag_equal_constraint(&mut self, j: usize, buffer_id: BufferId) -> Result<(), SolveError> {
        let memory = self.memory;
        let buffer = memory.buffer(buffer_id);
        let address_type = buffer.address();
        let dependency = self.structure.united_dependency(j);

        if let Some(&i) = dependency
            .tag_equal_relation(buffer_id, memory)
            .iter()
            .next()
        {
            let previous = self.object_address(i, address_type)?;
            let own = self.object_address(j, address_type)?;

            let new_tag = buffer.tag_of(previous);
            let new_index = buffer.index_of(previous);
            let old_offset = buffer.offset_of(own);

            if let Some(object) = self.solution.address_object_mut(j) {
                object.set_address(address_type, buffer.address_of(new_tag, new_index, old_offset));
            }
        }

        Ok(())
    }

    /// INDEX-EQUAL: copy the index; a changed index invalidates the tag, so
    /// a fresh one is allocated.
    fn solve_index_equal_constraint(
        &mut self,
        j: usize,
        buffer_id: BufferId,
    ) -> Result<(), SolveError> {
        let memory = self.memory;
        let buffer = memory.buffer(buffer_id);
        let address_type = buffer.address();
        let dependency = self.structure.united_dependency(j);

        let Some(&i) = dependency.index_equal_relation(buffer_id).iter().next() else {
            return Ok(());
        };

        let previous = self.object_address(i, address_type)?;
        let own = self.object_address(j, address_type)?;

        let old_tag = buffer.tag_of(own);
        let old_index = buffer.index_of(own);
        let new_index = buffer.index_of(previous);
        let old_offset = buffer.offset_of(own);

        let new_tag = if new_index != old_index {
            let partial = buffer.address_of(old_tag, new_index, old_offset);
            let region = self.choose_region();
            let allocated = self
                .allocate_addr_miss_tag_and_parent_entry(j, buffer_id, partial, region.as_deref())?;
            buffer.tag_of(allocated.address)
        } else {
            old_tag
        };

        if let Some(object) = self.solution.address_object_mut(j) {
            object.set_address(address_type, buffer.address_of(new_tag, new_index, old_offset));
        }

        Ok(())
    }

    /// Dispatches the buffer to its hit/miss/entry constraint solving,
    /// honoring view/parent relations and guards.
    fn solve_buffer_constraint(&mut self, j: usize, buffer_id: BufferId) -> Result<(), SolveError> {
        let memory = self.memory;

        // A buffer may appear once as a path step and once as a view parent.
        let handled = self.handled_buffers.entry(j).or_default();
        if !handled.insert(buffer_id) {
            return Ok(());
        }

        let buffer = memory.buffer(buffer_id);
        let access = self.structure.access(j);
        let path = &access.path;

        // A parent reached only through its view counts as a hit.
        let real_event = path.event(buffer_id);
        let used_event = real_event.unwrap_or(BufferAccessEvent::Hit);

        debug!(
            access = j,
            buffer = buffer.name(),
            ?real_event,
            "solving buffer constraint"
        );

        if let Some(parent) = buffer.parent() {
            self.solve_buffer_constraint(j, parent)?;
        }

        // A missed parent makes the view inaccessible.
        let parent_missed = memory
            .buffer(buffer_id)
            .parent()
            .map(|parent| path.event(parent) == Some(BufferAccessEvent::Miss))
            .unwrap_or(false);

        let lookup = self.guard_lookup(j);
        let guard_passed = memory
            .buffer(buffer_id)
            .check_guard(self.structure.access(j), &lookup);
        drop(lookup);

        if !parent_missed && guard_passed {
            let replaceable = memory.buffer(buffer_id).is_replaceable();
            if replaceable {
                match used_event {
                    BufferAccessEvent::Hit => self.solve_hit_constraint(j, buffer_id)?,
                    BufferAccessEvent::Miss => self.solve_miss_constraint(j, buffer_id)?,
                }
                self.solve_tag_replaced_constraints(j, buffer_id)?;
            } else if used_event == BufferAccessEvent::Hit {
                self.solve_entry_constraint(j, buffer_id)?;
            }
            // A MISS on a software-managed buffer is granted by the tag
            // allocators: fresh tags are never resident.
        } else if real_event == Some(BufferAccessEvent::Hit) {
            return Err(SolveError::Unsat(format!(
                "hit demanded on inaccessible buffer {}",
                memory.buffer(buffer_id).name()
            )));
        }

        Ok(())
    }

    /// HIT on a replaceable buffer: schedule a priming load unless the hit
    /// is already guaranteed.
    fn solve_hit_constraint(&mut self, j: usize, buffer_id: BufferId) -> Result<(), SolveError> {
        let memory = self.memory;
        let structure = self.structure;
        let buffer = memory.buffer(buffer_id);
        let address_type = buffer.address();

        let address = self.object_address(j, address_type)?;
        let tag = buffer.tag_of(address);
        let index = buffer.index_of(address);

        let dependency = structure.united_dependency(j);

        let hit_tags = self
            .buffer_hit_tags
            .entry(buffer_id)
            .or_default()
            .entry(index)
            .or_default();

        // Scheduling the same priming load twice is redundant.
        if hit_tags.contains(&tag) {
            return Ok(());
        }
        // A TAG-EQUAL predecessor already loads the datum.
        if !dependency.tag_equal_relation(buffer_id, memory).is_empty() {
            return Ok(());
        }
        // A TAG-REPLACED dependency overrides the hit preparation.
        if !dependency.tag_replaced_relation(buffer_id).is_empty() {
            return Ok(());
        }
        // One more priming load would evict data other hits rely on.
        if hit_tags.len() as u64 >= buffer.ways() {
            return Err(SolveError::Unsat(format!(
                "hit constraint violation for buffer {}",
                buffer.name()
            )));
        }

        hit_tags.insert(tag);

        // Keep the offset untouched: offset bits can carry meaning (an
        // odd/even page select, for instance).
        self.solution.loader_mut().add_addresses(
            address_type,
            buffer_id,
            BufferAccessEvent::Hit,
            address,
            [address],
        );

        // The priming load walks earlier buffers too; the ones demanded to
        // MISS must get their replacing sequences now.
        let path_buffers: Vec<BufferId> = structure.access(j).path.buffers().collect();
        if let Some(position) = path_buffers.iter().position(|&b| b == buffer_id) {
            for &previous in path_buffers[..position].iter().rev() {
                if memory.buffer(previous).address() != address_type {
                    continue;
                }
                if structure.access(j).path.event(previous) == Some(BufferAccessEvent::Miss) {
                    self.solve_miss_constraint(j, previous)?;
                }
            }
        }

        Ok(())
    }

    /// MISS on a replaceable buffer: evict the whole set unless the miss
    /// already holds.
    fn solve_miss_constraint(&mut self, j: usize, buffer_id: BufferId) -> Result<(), SolveError> {
        let memory = self.memory;
        let structure = self.structure;
        let buffer = memory.buffer(buffer_id);
        let address_type = buffer.address();
        let dependency = structure.united_dependency(j);

        // A TAG-EQUAL predecessor guarantees residence: a miss is absurd.
        if !dependency.tag_equal_relation(buffer_id, memory).is_empty() {
            return Err(SolveError::Unsat(format!(
                "miss constraint violation for buffer {}",
                buffer.name()
            )));
        }

        let address = self.object_address(j, address_type)?;
        let tag = buffer.tag_of(address);
        let index = buffer.index_of(address);

        let scheduled_hit = self
            .buffer_hit_tags
            .get(&buffer_id)
            .and_then(|indices| indices.get(&index))
            .map(|tags| tags.contains(&tag))
            .unwrap_or(false);
        if scheduled_hit {
            // The datum will be loaded regardless; eviction is pointless.
            return Ok(());
        }

        let already_replaced = self
            .buffer_replaced_indices
            .get(&buffer_id)
            .map(|indices| indices.contains(&index))
            .unwrap_or(false);

        // One replacing sequence per index serves every access of the
        // structure.
        if !already_replaced
            && (self.may_be_hit(j, buffer_id)
                || !dependency.tag_replaced_relation(buffer_id).is_empty())
        {
            let region = self.choose_region();
            let ways = buffer.ways();
            let offset_mask = buffer.offset_mask();

            let mut sequence = Vec::with_capacity(ways as usize);
            for _ in 0..ways {
                // Evicting accesses roam the set at randomized offsets.
                let randomized = (address & !offset_mask) | (self.rng.gen::<u64>() & offset_mask);
                let evicting = self.allocate_addr_miss_tag_and_parent_entry(
                    j,
                    buffer_id,
                    randomized,
                    region.as_deref(),
                )?;
                sequence.push(evicting);
            }

            self.solution.loader_mut().add_addresses_and_entries(
                address_type,
                buffer_id,
                BufferAccessEvent::Miss,
                address,
                sequence,
            );
            self.buffer_replaced_indices
                .entry(buffer_id)
                .or_default()
                .insert(index);
        }

        Ok(())
    }

    /// Whether a hit in the buffer is still possible for access `j` given
    /// the scheduled loads.
    fn may_be_hit(&self, j: usize, buffer_id: BufferId) -> bool {
        let memory = self.memory;
        let buffer = memory.buffer(buffer_id);
        let address_type = buffer.address();

        // Loads of other address types may pull the datum in transitively.
        for other in self.structure.access(j).path.address_types(memory) {
            if other != address_type && !self.solution.loader().prepare_loads(other).is_empty() {
                return true;
            }
        }

        let Ok(address) = self.object_address(j, address_type) else {
            return false;
        };
        let tag = buffer.tag_of(address);
        let index = buffer.index_of(address);

        for load in self.solution.loader().prepare_loads(address_type) {
            if buffer.index_of(load.address) == index && buffer.tag_of(load.address) == tag {
                return true;
            }
        }

        false
    }

    /// Replays the scheduled loads and the accesses up to `j` against the
    /// buffer to satisfy TAG-REPLACED constraints.
    fn solve_tag_replaced_constraints(
        &mut self,
        j: usize,
        buffer_id: BufferId,
    ) -> Result<(), SolveError> {
        let memory = self.memory;
        let structure = self.structure;
        let buffer = memory.buffer(buffer_id);
        let address_type = buffer.address();

        let mut tracker = BufferStateTracker::new(buffer.ways());

        // Preparatory loads prime the predicted state.
        for load in self.solution.loader().prepare_loads(address_type) {
            tracker.track(buffer.index_of(load.address), buffer.tag_of(load.address));
        }

        // Replay the main sequence, mapping access indices to their
        // eviction victims.
        let mut replaced_tags: BTreeMap<usize, u64> = BTreeMap::new();

        for i in 0..=j {
            let access = structure.access(i);

            if access.path.contains(buffer_id) {
                let lookup = self.guard_lookup(i);
                let guarded = buffer.check_guard(access, &lookup);
                drop(lookup);

                if guarded {
                    if let Some(address) = self
                        .solution
                        .address_object(i)
                        .and_then(|object| object.address(address_type))
                    {
                        if let Some(replaced) =
                            tracker.track(buffer.index_of(address), buffer.tag_of(address))
                        {
                            replaced_tags.insert(i, replaced);
                        }
                    }
                }
            }

            let dependency = structure.united_dependency(i);
            let relation = dependency.tag_replaced_relation(buffer_id);
            if relation.is_empty() {
                continue;
            }

            let depends_on = *relation.iter().next().unwrap();
            let Some(&replaced_tag) = replaced_tags.get(&depends_on) else {
                return Err(SolveError::Unsat(format!(
                    "replace constraint violation for buffer {}",
                    buffer.name()
                )));
            };

            let address = self.object_address(i, address_type)?;
            let index = buffer.index_of(address);
            let offset = buffer.offset_of(address);

            if let Some(object) = self.solution.address_object_mut(i) {
                object.set_address(address_type, buffer.address_of(replaced_tag, index, offset));
            }

            if buffer.is_view() {
                self.adopt_parent_entry(i, buffer_id, replaced_tag, index)?;
            }

            // TAG-NOT-REPLACED holds automatically: fresh tags never match
            // an eviction victim.
        }

        Ok(())
    }

    /// Points access `i` at the parent entry that backs the replaced tag.
    fn adopt_parent_entry(
        &mut self,
        i: usize,
        buffer_id: BufferId,
        replaced_tag: u64,
        index: u64,
    ) -> Result<(), SolveError> {
        let memory = self.memory;
        let buffer = memory.buffer(buffer_id);
        let parent_id = buffer.parent().ok_or_else(|| {
            SolveError::Internal(format!("buffer {} is not a view", buffer.name()))
        })?;

        if memory.buffer(parent_id).is_replaceable() {
            return Err(SolveError::Internal(format!(
                "parent of view {} must be software-managed",
                buffer.name()
            )));
        }

        let address_type = buffer.address();
        let mut found = None;

        if let Some(entries) = self.solution.entries(parent_id) {
            for (&id, entry_object) in entries {
                let other_address = if entry_object.is_auxiliary() {
                    entry_object.load_addresses().first().copied()
                } else {
                    entry_object.accesses().iter().next().and_then(|&a| {
                        self.solution
                            .address_object(a)
                            .and_then(|object| object.address(address_type))
                    })
                };

                let Some(other) = other_address else { continue };

                if buffer.index_of(other) == index && buffer.tag_of(other) == replaced_tag {
                    found = Some(id);
                    break;
                }
            }
        }

        let id = found.ok_or_else(|| {
            SolveError::Internal(format!(
                "no parent entry backs replaced tag {replaced_tag:#x} of {}",
                buffer.name()
            ))
        })?;

        if let Some(object) = self.solution.address_object_mut(i) {
            object.add_entry(parent_id, id);
        }
        if let Some(entry) = self.solution.entry_mut(parent_id, id) {
            entry.register_access(i);
        }

        Ok(())
    }

    /// HIT on a software-managed buffer: reuse the TAG-EQUAL partner's entry
    /// or allocate a fresh one.
    fn solve_entry_constraint(&mut self, j: usize, buffer_id: BufferId) -> Result<(), SolveError> {
        let memory = self.memory;
        let dependency = self.structure.united_dependency(j);

        let relation = dependency.tag_equal_relation(buffer_id, memory);

        if let Some(&i) = relation.iter().next() {
            // Same tag, same entry; filling happens once all dependencies
            // are resolved.
            let ids = self
                .solution
                .address_object(i)
                .and_then(|object| object.entries(buffer_id).cloned())
                .unwrap_or_default();

            for &id in &ids {
                if let Some(entry) = self.solution.entry_mut(buffer_id, id) {
                    entry.register_access(j);
                }
            }
            if let Some(object) = self.solution.address_object_mut(j) {
                object.set_entries(buffer_id, ids);
            }
            return Ok(());
        }

        // A replaced-tag constraint on a view claims the entry instead.
        for &child in memory.buffer(buffer_id).children() {
            if !dependency.tag_replaced_relation(child).is_empty() {
                return Ok(());
            }
        }

        let has_entries = self
            .solution
            .address_object(j)
            .and_then(|object| object.entries(buffer_id))
            .map(|ids| !ids.is_empty())
            .unwrap_or(false);
        if has_entries {
            return Ok(());
        }

        let id = self.entry_allocator.allocate(buffer_id).map_err(|error| {
            SolveError::Unsat(format!(
                "cannot allocate an entry for buffer {}: {error}",
                memory.buffer(buffer_id).name()
            ))
        })?;

        debug!(access = j, buffer = memory.buffer(buffer_id).name(), id, "allocated entry");

        let mut entry_object = EntryObject::new(id, MmuEntry::new(memory.buffer(buffer_id).fields()));
        entry_object.register_access(j);

        if let Some(object) = self.solution.address_object_mut(j) {
            object.add_entry(buffer_id, id);
        }
        self.solution.add_entry(buffer_id, entry_object);

        Ok(())
    }

    /// Allocates an evicting address; for views, also allocates and fills
    /// the parent entry that makes the evicting access translatable.
    fn allocate_addr_miss_tag_and_parent_entry(
        &mut self,
        j: usize,
        buffer_id: BufferId,
        partial_address: u64,
        region: Option<&str>,
    ) -> Result<AddressAndEntry, SolveError> {
        let memory = self.memory;
        let buffer = memory.buffer(buffer_id);

        if !buffer.is_view() {
            let address = self.allocate_addr_miss_tag(buffer_id, partial_address, region)?;
            return Ok(AddressAndEntry::address_only(address));
        }

        let parent_id = buffer.parent().ok_or_else(|| {
            SolveError::Internal(format!("buffer {} is not a view", buffer.name()))
        })?;
        let parent = memory.buffer(parent_id);

        if parent.is_replaceable() {
            return Err(SolveError::Internal(format!(
                "parent of view {} must be software-managed",
                buffer.name()
            )));
        }

        let entry_id = self.entry_allocator.allocate(parent_id).map_err(unsat)?;
        let address = self.allocate_addr_miss_tag(buffer_id, partial_address, region)?;

        // The evicting access needs a translatable address: build and fill
        // the backing parent entry.
        let mut entry = MmuEntry::new(parent.fields());
        entry.set_address(address);
        entry.set_valid(true);

        let mut aux_object = AddressObject::new(self.structure.access(j).clone());
        aux_object.set_address(buffer.address(), address);
        self.context
            .fill_entry(memory, parent_id, &aux_object, &mut entry);

        let mut entry_object = EntryObject::new(entry_id, entry);
        entry_object.add_load_address(address);
        self.solution.add_entry(parent_id, entry_object);

        Ok(AddressAndEntry {
            address,
            entry_id: Some(entry_id),
        })
    }

    /// Draws evicting tags until one the environment does not own comes up.
    fn allocate_addr_miss_tag(
        &mut self,
        buffer_id: BufferId,
        partial_address: u64,
        region: Option<&str>,
    ) -> Result<u64, SolveError> {
        let memory = self.memory;
        let address_type = memory.buffer(buffer_id).address();

        loop {
            let address = self
                .address_allocator
                .allocate_tag(memory, buffer_id, partial_address, region, None)
                .map_err(unsat)?;

            if !self.context.is_reserved(address_type, address) {
                return Ok(address);
            }
        }
    }

    fn correct(&mut self, j: usize) -> Result<(), SolveError> {
        if let Some(object) = self.solution.address_object_mut(j) {
            self.context.correct_address(self.memory, object)?;
        }
        Ok(())
    }

    fn fill(&mut self, j: usize) -> Result<(), SolveError> {
        let Some(object) = self.solution.address_object(j) else {
            return Ok(());
        };
        let object = object.clone();

        for (&buffer, ids) in object.all_entries() {
            for &id in ids {
                if let Some(entry_object) = self.solution.entry_mut(buffer, id) {
                    self.context
                        .fill_entry(self.memory, buffer, &object, &mut entry_object.entry);
                    entry_object.entry.set_valid(true);
                }
            }
        }

        Ok(())
    }
}
