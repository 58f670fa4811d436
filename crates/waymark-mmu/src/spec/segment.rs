use serde::{Deserialize, Serialize};

/// A named window of virtual addresses.
///
/// Mapped segments go through translation; unmapped segments derive the
/// virtual address directly from the physical one by ORing it into the
/// window base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmuSegment {
    pub name: String,
    pub min_va: u64,
    pub max_va: u64,
    pub mapped: bool,
}

impl MmuSegment {
    pub fn new(name: impl Into<String>, min_va: u64, max_va: u64, mapped: bool) -> Self {
        Self {
            name: name.into(),
            min_va,
            max_va,
            mapped,
        }
    }

    pub fn check_va(&self, va: u64) -> bool {
        self.min_va <= va && va <= self.max_va
    }

    /// Virtual address of a physical one for an unmapped segment.
    pub fn va_from_pa(&self, pa: u64) -> u64 {
        self.min_va | pa
    }

    /// The segment's window as an allocation partition.
    pub fn as_region(&self) -> MemoryRegion {
        MemoryRegion::new(self.name.clone(), self.min_va, self.max_va)
    }
}

/// A named physical memory range usable as an allocation partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub name: String,
    pub min: u64,
    pub max: u64,
}

impl MemoryRegion {
    pub fn new(name: impl Into<String>, min: u64, max: u64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn check_address(&self, address: u64) -> bool {
        self.min <= address && address <= self.max
    }
}
