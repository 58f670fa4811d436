use std::collections::BTreeMap;

use crate::access::{BufferAccessEvent, DataType, MemoryOperation};
use crate::solution::{MemorySolution, MmuEntry};
use crate::spec::{AddressId, BufferId, MmuSubsystem};
use crate::structure::MemoryAccessStructure;

/// One step of the preparation prologue.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparationStep {
    /// Write an entry into a software-managed buffer before anything runs.
    WriteEntry {
        buffer: BufferId,
        entry_id: u64,
        entry: MmuEntry,
    },
    /// Touch an address to prime or evict a replaceable buffer.
    TouchAddress {
        buffer: BufferId,
        event: BufferAccessEvent,
        address_type: AddressId,
        address: u64,
    },
}

/// One main-sequence access with its solved addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptedAccess {
    pub operation: MemoryOperation,
    pub data_type: DataType,
    pub addresses: BTreeMap<AddressId, u64>,
}

/// A solution rendered as an abstract program: the preparation prologue
/// followed by the main access sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptedProgram {
    pub preparation: Vec<PreparationStep>,
    pub accesses: Vec<AdaptedAccess>,
}

/// Boundary translator from an abstract [`MemorySolution`] to the sequences
/// an instruction-level backend emits.
///
/// Entry writes come first (they make preparatory loads translatable), then
/// the scheduled loads in order, then the main accesses.
pub struct MemoryAdapter<'a> {
    memory: &'a MmuSubsystem,
}

impl<'a> MemoryAdapter<'a> {
    pub fn new(memory: &'a MmuSubsystem) -> Self {
        Self { memory }
    }

    pub fn adapt(
        &self,
        structure: &MemoryAccessStructure,
        solution: &MemorySolution,
    ) -> AdaptedProgram {
        let mut preparation = Vec::new();

        for (&buffer, entries) in solution.all_entries() {
            for (&entry_id, entry_object) in entries {
                preparation.push(PreparationStep::WriteEntry {
                    buffer,
                    entry_id,
                    entry: entry_object.entry.clone(),
                });
            }
        }

        for (address_type, load) in solution.loader().all_loads() {
            preparation.push(PreparationStep::TouchAddress {
                buffer: load.buffer,
                event: load.event,
                address_type,
                address: load.address,
            });
        }

        let accesses = (0..structure.size())
            .map(|j| {
                let access = structure.access(j);
                let addresses = solution
                    .address_object(j)
                    .map(|object| object.addresses().clone())
                    .unwrap_or_default();

                AdaptedAccess {
                    operation: access.access_type.operation,
                    data_type: access.data_type(),
                    addresses,
                }
            })
            .collect();

        AdaptedProgram {
            preparation,
            accesses,
        }
    }

    pub fn memory(&self) -> &MmuSubsystem {
        self.memory
    }
}
