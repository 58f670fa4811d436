//! Constraint-correct test generation for MMU address translation and cache
//! behavior.
//!
//! Given a static description of an MMU (address spaces, TLB/cache-like
//! buffers with tag/index/offset decompositions, views, guards) and a
//! sequence of abstract accesses with a declared dependency structure, the
//! solver assigns concrete addresses, tags and entries and synthesizes the
//! preparatory accesses that drive the simulated hardware into the exact
//! hit/miss/replacement states the dependencies demand.

pub mod access;
pub mod adapter;
pub mod allocator;
pub mod engine;
pub mod hazard;
pub mod loader;
pub mod solution;
pub mod solver;
pub mod spec;
pub mod state;
pub mod structure;

pub use access::{
    AccessPath, BufferAccessEvent, BufferEvent, DataType, MemoryAccess, MemoryAccessType,
    MemoryOperation,
};
pub use adapter::{AdaptedAccess, AdaptedProgram, MemoryAdapter, PreparationStep};
pub use allocator::{
    AddressAllocationTable, AddressAllocator, AllocationPool, AllocatorError, EntryIdAllocator,
    SingleAddressTypeAllocator, ALLOC_POOL_CAP,
};
pub use engine::MemoryEngine;
pub use hazard::{HazardKind, HazardTarget, MemoryDependency, MemoryHazard, UnitedDependency};
pub use loader::{AddressAndEntry, Load, MemoryLoader};
pub use solution::{AddressObject, EntryObject, MemorySolution, MmuEntry};
pub use solver::{MemorySolver, SolveError, SolverContext};
pub use solver::BasicSolverContext;
pub use spec::{
    AddressId, AddressView, BufferId, BufferParams, IntegerField, IntegerRange, IntegerVariable,
    MemoryRegion, MmuAddressType, MmuAddressViewBuilder, MmuBuffer, MmuCalculator, MmuCondition,
    MmuConditionAtom, MmuExpression, MmuGuard, MmuModelError, MmuSegment, MmuSubsystem,
    MmuSubsystemBuilder, SubsystemSpec,
};
pub use state::BufferStateTracker;
pub use structure::MemoryAccessStructure;
