use std::collections::{BTreeMap, BTreeSet};

use crate::spec::{AddressId, BufferId, MmuSubsystem};

/// Kind of a declared relation between two accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HazardKind {
    AddrEqual,
    AddrNotEqual,
    IndexEqual,
    IndexNotEqual,
    TagEqual,
    TagNotEqual,
    TagReplaced,
    TagNotReplaced,
}

/// What the relation constrains: an address space or a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HazardTarget {
    Address(AddressId),
    Buffer(BufferId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHazard {
    pub kind: HazardKind,
    pub target: HazardTarget,
}

impl MemoryHazard {
    pub fn address(kind: HazardKind, address: AddressId) -> Self {
        Self {
            kind,
            target: HazardTarget::Address(address),
        }
    }

    pub fn buffer(kind: HazardKind, buffer: BufferId) -> Self {
        Self {
            kind,
            target: HazardTarget::Buffer(buffer),
        }
    }
}

/// The declared relation set between one access and one earlier access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryDependency {
    hazards: Vec<MemoryHazard>,
}

impl MemoryDependency {
    pub fn new(hazards: Vec<MemoryHazard>) -> Self {
        Self { hazards }
    }

    pub fn hazards(&self) -> &[MemoryHazard] {
        &self.hazards
    }
}

type Relations = BTreeMap<HazardKind, BTreeSet<usize>>;

/// All dependencies of one access on its predecessors, merged per address
/// type and per buffer.
///
/// Relation accessors answer the solver's questions: which earlier accesses
/// must this one share an address, an index, a tag with, or whose eviction
/// victim must it target.
#[derive(Debug, Clone, Default)]
pub struct UnitedDependency {
    address_relations: BTreeMap<AddressId, Relations>,
    buffer_relations: BTreeMap<BufferId, Relations>,
}

impl UnitedDependency {
    /// Unites the dependencies `(depends_on, dependency)` of one access.
    pub fn new<'a>(dependencies: impl IntoIterator<Item = (usize, &'a MemoryDependency)>) -> Self {
        let mut united = UnitedDependency::default();

        for (depends_on, dependency) in dependencies {
            for hazard in dependency.hazards() {
                let relations = match hazard.target {
                    HazardTarget::Address(address) => {
                        united.address_relations.entry(address).or_default()
                    }
                    HazardTarget::Buffer(buffer) => {
                        united.buffer_relations.entry(buffer).or_default()
                    }
                };
                relations.entry(hazard.kind).or_default().insert(depends_on);
            }
        }

        united
    }

    fn address_relation(&self, address: AddressId, kind: HazardKind) -> BTreeSet<usize> {
        self.address_relations
            .get(&address)
            .and_then(|relations| relations.get(&kind))
            .cloned()
            .unwrap_or_default()
    }

    fn buffer_relation(&self, buffer: BufferId, kind: HazardKind) -> BTreeSet<usize> {
        self.buffer_relations
            .get(&buffer)
            .and_then(|relations| relations.get(&kind))
            .cloned()
            .unwrap_or_default()
    }

    /// Address types that carry any declared hazard.
    pub fn hazardous_addresses(&self) -> impl Iterator<Item = AddressId> + '_ {
        self.address_relations.keys().copied()
    }

    /// Buffers that carry any declared hazard.
    pub fn hazardous_buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.buffer_relations.keys().copied()
    }

    /// Buffers with hazards whose address space is `address`.
    pub fn hazardous_buffers_of_address(
        &self,
        address: AddressId,
        memory: &MmuSubsystem,
    ) -> Vec<BufferId> {
        self.buffer_relations
            .keys()
            .copied()
            .filter(|&buffer| memory.buffer(buffer).address() == address)
            .collect()
    }

    /// Earlier accesses whose address of the given type must equal this one.
    pub fn addr_equal_relation(&self, address: AddressId) -> BTreeSet<usize> {
        self.address_relation(address, HazardKind::AddrEqual)
    }

    /// Earlier accesses that must use the same buffer set. Every tag
    /// relation implies index equality.
    pub fn index_equal_relation(&self, buffer: BufferId) -> BTreeSet<usize> {
        let mut relation = self.buffer_relation(buffer, HazardKind::IndexEqual);
        for kind in [
            HazardKind::TagEqual,
            HazardKind::TagNotEqual,
            HazardKind::TagReplaced,
            HazardKind::TagNotReplaced,
        ] {
            relation.extend(self.buffer_relation(buffer, kind));
        }
        relation
    }

    /// Earlier accesses that must use the same tag and index. Relations
    /// declared on a buffer's views count for the buffer as well.
    pub fn tag_equal_relation(&self, buffer: BufferId, memory: &MmuSubsystem) -> BTreeSet<usize> {
        let mut relation = self.buffer_relation(buffer, HazardKind::TagEqual);
        for &child in memory.buffer(buffer).children() {
            relation.extend(self.buffer_relation(child, HazardKind::TagEqual));
        }
        relation
    }

    /// The earlier access whose eviction victim this one must address.
    pub fn tag_replaced_relation(&self, buffer: BufferId) -> BTreeSet<usize> {
        self.buffer_relation(buffer, HazardKind::TagReplaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{BufferParams, IntegerField, MmuAddressType, MmuExpression, MmuSubsystem};

    fn subsystem_with_view() -> (MmuSubsystem, BufferId, BufferId) {
        let mut builder = MmuSubsystem::builder();
        let pa = builder.add_address(MmuAddressType::new("pa", 32)).unwrap();
        let address = MmuAddressType::new("pa", 32);
        let field = |lo, hi| IntegerField::new(address.variable(), lo, hi);

        let parent = builder
            .add_buffer(
                BufferParams::new(
                    "jtlb",
                    64,
                    1,
                    pa,
                    MmuExpression::field(field(12, 31)),
                    MmuExpression::empty(),
                    MmuExpression::field(field(0, 11)),
                )
                .non_replaceable(),
            )
            .unwrap();
        let view = builder
            .add_buffer(
                BufferParams::new(
                    "dtlb",
                    4,
                    1,
                    pa,
                    MmuExpression::field(field(12, 31)),
                    MmuExpression::empty(),
                    MmuExpression::field(field(0, 11)),
                )
                .with_parent(parent),
            )
            .unwrap();

        (builder.build(), parent, view)
    }

    #[test]
    fn test_union_of_relations() {
        let buffer = BufferId(0);
        let first = MemoryDependency::new(vec![MemoryHazard::buffer(HazardKind::TagEqual, buffer)]);
        let second =
            MemoryDependency::new(vec![MemoryHazard::buffer(HazardKind::IndexEqual, buffer)]);

        let united = UnitedDependency::new([(0, &first), (1, &second)]);

        assert_eq!(
            united.index_equal_relation(buffer),
            [0, 1].into_iter().collect()
        );
        assert_eq!(
            united.buffer_relation(buffer, HazardKind::TagEqual),
            [0].into_iter().collect()
        );
    }

    #[test]
    fn test_tag_relation_implies_index_relation() {
        let buffer = BufferId(3);
        let dependency =
            MemoryDependency::new(vec![MemoryHazard::buffer(HazardKind::TagReplaced, buffer)]);
        let united = UnitedDependency::new([(2, &dependency)]);

        assert_eq!(
            united.index_equal_relation(buffer),
            [2].into_iter().collect()
        );
        assert_eq!(
            united.tag_replaced_relation(buffer),
            [2].into_iter().collect()
        );
    }

    #[test]
    fn test_view_relation_counts_for_parent() {
        let (memory, parent, view) = subsystem_with_view();

        let dependency =
            MemoryDependency::new(vec![MemoryHazard::buffer(HazardKind::TagEqual, view)]);
        let united = UnitedDependency::new([(0, &dependency)]);

        assert_eq!(
            united.tag_equal_relation(parent, &memory),
            [0].into_iter().collect()
        );
        assert_eq!(
            united.tag_equal_relation(view, &memory),
            [0].into_iter().collect()
        );
    }

    #[test]
    fn test_addr_relation() {
        let address = AddressId(1);
        let dependency =
            MemoryDependency::new(vec![MemoryHazard::address(HazardKind::AddrEqual, address)]);
        let united = UnitedDependency::new([(4, &dependency)]);

        assert_eq!(
            united.addr_equal_relation(address),
            [4].into_iter().collect()
        );
        assert!(united.addr_equal_relation(AddressId(0)).is_empty());
    }
}
