use serde::{Deserialize, Serialize};

use crate::spec::{AddressId, BufferId, MmuSubsystem};

/// Load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryOperation {
    Load,
    Store,
}

/// Size of the datum moved by an access; a power of two number of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataType {
    size: u32,
}

impl DataType {
    pub const BYTE: DataType = DataType { size: 1 };
    pub const HWORD: DataType = DataType { size: 2 };
    pub const WORD: DataType = DataType { size: 4 };
    pub const DWORD: DataType = DataType { size: 8 };

    /// `size` must be a power of two.
    pub fn new(size: u32) -> Option<DataType> {
        if size.is_power_of_two() {
            Some(DataType { size })
        } else {
            None
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_aligned(&self, address: u64) -> bool {
        address % self.size as u64 == 0
    }

    /// Rounds the address down to this type's alignment.
    pub fn align(&self, address: u64) -> u64 {
        address & !((self.size - 1) as u64)
    }
}

/// Operation plus datum size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccessType {
    pub operation: MemoryOperation,
    pub data_type: DataType,
}

impl MemoryAccessType {
    pub fn load(data_type: DataType) -> Self {
        Self {
            operation: MemoryOperation::Load,
            data_type,
        }
    }

    pub fn store(data_type: DataType) -> Self {
        Self {
            operation: MemoryOperation::Store,
            data_type,
        }
    }
}

/// Whether an access finds its datum resident in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccessEvent {
    Hit,
    Miss,
}

/// One step of an access path: the buffer touched and the demanded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferEvent {
    pub buffer: BufferId,
    pub event: BufferAccessEvent,
}

/// The ordered sequence of buffers an access walks through, with the
/// hit/miss event demanded at each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPath {
    steps: Vec<BufferEvent>,
}

impl AccessPath {
    pub fn new(steps: Vec<BufferEvent>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[BufferEvent] {
        &self.steps
    }

    pub fn buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.steps.iter().map(|step| step.buffer)
    }

    pub fn contains(&self, buffer: BufferId) -> bool {
        self.steps.iter().any(|step| step.buffer == buffer)
    }

    /// Demanded event for the buffer; `None` when the buffer is not on the
    /// path (e.g. a parent only reached through its view).
    pub fn event(&self, buffer: BufferId) -> Option<BufferAccessEvent> {
        self.steps
            .iter()
            .find(|step| step.buffer == buffer)
            .map(|step| step.event)
    }

    /// Address types of the buffers along the path, deduplicated in path
    /// order.
    pub fn address_types(&self, memory: &MmuSubsystem) -> Vec<AddressId> {
        let mut types = Vec::new();
        for step in &self.steps {
            let address = memory.buffer(step.buffer).address();
            if !types.contains(&address) {
                types.push(address);
            }
        }
        types
    }
}

/// One abstract access of the sequence under generation.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryAccess {
    pub access_type: MemoryAccessType,
    pub path: AccessPath,
    /// Virtual segment the access must fall into, if constrained.
    pub segment: Option<String>,
    /// Physical region the access must fall into, if constrained.
    pub region: Option<String>,
}

impl MemoryAccess {
    pub fn new(access_type: MemoryAccessType, path: AccessPath) -> Self {
        Self {
            access_type,
            path,
            segment: None,
            region: None,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.access_type.data_type
    }
}
