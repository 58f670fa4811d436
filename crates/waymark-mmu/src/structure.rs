use crate::access::MemoryAccess;
use crate::hazard::{MemoryDependency, UnitedDependency};

/// A candidate test situation: the access sequence plus the dependencies
/// declared between its accesses.
///
/// Dependencies form an upper-triangular relation (`i < j`); the united
/// per-access view is derived once at construction and consumed read-only by
/// the solver.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessStructure {
    accesses: Vec<MemoryAccess>,
    /// `(i, j, dependency)` with `i < j`.
    dependencies: Vec<(usize, usize, MemoryDependency)>,
    united: Vec<UnitedDependency>,
}

impl MemoryAccessStructure {
    pub fn new(
        accesses: Vec<MemoryAccess>,
        dependencies: Vec<(usize, usize, MemoryDependency)>,
    ) -> Self {
        let united = (0..accesses.len())
            .map(|j| {
                UnitedDependency::new(
                    dependencies
                        .iter()
                        .filter(|(i, to, _)| *to == j && *i < *to)
                        .map(|(i, _, dependency)| (*i, dependency)),
                )
            })
            .collect();

        Self {
            accesses,
            dependencies,
            united,
        }
    }

    pub fn size(&self) -> usize {
        self.accesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }

    pub fn access(&self, j: usize) -> &MemoryAccess {
        &self.accesses[j]
    }

    pub fn accesses(&self) -> &[MemoryAccess] {
        &self.accesses
    }

    pub fn dependencies(&self) -> &[(usize, usize, MemoryDependency)] {
        &self.dependencies
    }

    /// The united dependency of access `j` on all of its predecessors.
    pub fn united_dependency(&self, j: usize) -> &UnitedDependency {
        &self.united[j]
    }
}
