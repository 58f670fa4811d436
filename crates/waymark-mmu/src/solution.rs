use std::collections::{BTreeMap, BTreeSet};

use crate::access::MemoryAccess;
use crate::loader::MemoryLoader;
use crate::spec::{AddressId, BufferId, IntegerVariable};

/// Contents of one buffer entry: its field values, validity and the address
/// it translates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MmuEntry {
    fields: BTreeMap<IntegerVariable, u64>,
    valid: bool,
    address: u64,
}

impl MmuEntry {
    /// A zero-filled entry over the buffer's declared fields.
    pub fn new(fields: &[IntegerVariable]) -> Self {
        Self {
            fields: fields.iter().cloned().map(|f| (f, 0)).collect(),
            valid: false,
            address: 0,
        }
    }

    pub fn variables(&self) -> impl Iterator<Item = &IntegerVariable> {
        self.fields.keys()
    }

    pub fn value(&self, field: &IntegerVariable) -> Option<u64> {
        self.fields.get(field).copied()
    }

    pub fn set_value(&mut self, field: &IntegerVariable, value: u64) {
        if let Some(slot) = self.fields.get_mut(field) {
            *slot = value;
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }
}

/// An allocated buffer entry plus the bookkeeping of who uses it.
///
/// Auxiliary entries back preparatory loads only and are referenced by no
/// access of the main sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryObject {
    pub id: u64,
    pub entry: MmuEntry,
    accesses: BTreeSet<usize>,
    load_addresses: Vec<u64>,
}

impl EntryObject {
    pub fn new(id: u64, entry: MmuEntry) -> Self {
        Self {
            id,
            entry,
            accesses: BTreeSet::new(),
            load_addresses: Vec::new(),
        }
    }

    pub fn is_auxiliary(&self) -> bool {
        self.accesses.is_empty()
    }

    pub fn register_access(&mut self, j: usize) {
        self.accesses.insert(j);
    }

    pub fn accesses(&self) -> &BTreeSet<usize> {
        &self.accesses
    }

    pub fn add_load_address(&mut self, address: u64) {
        self.load_addresses.push(address);
    }

    pub fn load_addresses(&self) -> &[u64] {
        &self.load_addresses
    }
}

/// Test data of one access: its concrete addresses per address space,
/// auxiliary attributes, and the buffer entries it relies on.
///
/// Entry data lives canonically in the [`MemorySolution`]; the address
/// object only holds the ids.
#[derive(Debug, Clone)]
pub struct AddressObject {
    access: MemoryAccess,
    addresses: BTreeMap<AddressId, u64>,
    attributes: BTreeMap<IntegerVariable, u64>,
    entries: BTreeMap<BufferId, BTreeSet<u64>>,
}

impl AddressObject {
    pub fn new(access: MemoryAccess) -> Self {
        Self {
            access,
            addresses: BTreeMap::new(),
            attributes: BTreeMap::new(),
            entries: BTreeMap::new(),
        }
    }

    pub fn access(&self) -> &MemoryAccess {
        &self.access
    }

    pub fn address(&self, address_type: AddressId) -> Option<u64> {
        self.addresses.get(&address_type).copied()
    }

    pub fn set_address(&mut self, address_type: AddressId, value: u64) {
        self.addresses.insert(address_type, value);
    }

    pub fn addresses(&self) -> &BTreeMap<AddressId, u64> {
        &self.addresses
    }

    pub fn attribute(&self, variable: &IntegerVariable) -> Option<u64> {
        self.attributes.get(variable).copied()
    }

    pub fn set_attribute(&mut self, variable: IntegerVariable, value: u64) {
        self.attributes.insert(variable, value);
    }

    pub fn clear_attributes(&mut self) {
        self.attributes.clear();
    }

    pub fn attributes(&self) -> &BTreeMap<IntegerVariable, u64> {
        &self.attributes
    }

    pub fn entries(&self, buffer: BufferId) -> Option<&BTreeSet<u64>> {
        self.entries.get(&buffer)
    }

    pub fn set_entries(&mut self, buffer: BufferId, ids: BTreeSet<u64>) {
        self.entries.insert(buffer, ids);
    }

    pub fn add_entry(&mut self, buffer: BufferId, id: u64) {
        self.entries.entry(buffer).or_default().insert(id);
    }

    pub fn all_entries(&self) -> &BTreeMap<BufferId, BTreeSet<u64>> {
        &self.entries
    }
}

/// The accumulated solution of one access structure: per-access test data,
/// the preparatory-load ledger, and the canonical store of allocated buffer
/// entries.
#[derive(Debug, Clone, Default)]
pub struct MemorySolution {
    objects: Vec<Option<AddressObject>>,
    loader: MemoryLoader,
    entries: BTreeMap<BufferId, BTreeMap<u64, EntryObject>>,
}

impl MemorySolution {
    pub fn new(size: usize) -> Self {
        Self {
            objects: (0..size).map(|_| None).collect(),
            loader: MemoryLoader::new(),
            entries: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.objects.len()
    }

    pub fn address_object(&self, j: usize) -> Option<&AddressObject> {
        self.objects[j].as_ref()
    }

    pub fn address_object_mut(&mut self, j: usize) -> Option<&mut AddressObject> {
        self.objects[j].as_mut()
    }

    pub fn set_address_object(&mut self, j: usize, object: AddressObject) {
        self.objects[j] = Some(object);
    }

    pub fn loader(&self) -> &MemoryLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut MemoryLoader {
        &mut self.loader
    }

    pub fn add_entry(&mut self, buffer: BufferId, entry: EntryObject) {
        self.entries
            .entry(buffer)
            .or_default()
            .insert(entry.id, entry);
    }

    pub fn entries(&self, buffer: BufferId) -> Option<&BTreeMap<u64, EntryObject>> {
        self.entries.get(&buffer)
    }

    pub fn entry_mut(&mut self, buffer: BufferId, id: u64) -> Option<&mut EntryObject> {
        self.entries.get_mut(&buffer).and_then(|map| map.get_mut(&id))
    }

    pub fn all_entries(&self) -> &BTreeMap<BufferId, BTreeMap<u64, EntryObject>> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessPath, DataType, MemoryAccessType};

    fn object() -> AddressObject {
        AddressObject::new(MemoryAccess::new(
            MemoryAccessType::load(DataType::WORD),
            AccessPath::default(),
        ))
    }

    #[test]
    fn test_address_object_addresses() {
        let mut object = object();
        object.set_address(AddressId(0), 0x1000);
        assert_eq!(object.address(AddressId(0)), Some(0x1000));
        assert_eq!(object.address(AddressId(1)), None);
    }

    #[test]
    fn test_entry_object_auxiliary_flag() {
        let mut entry = EntryObject::new(7, MmuEntry::new(&[]));
        assert!(entry.is_auxiliary());
        entry.register_access(0);
        assert!(!entry.is_auxiliary());
    }

    #[test]
    fn test_solution_entry_store() {
        let mut solution = MemorySolution::new(2);
        let buffer = BufferId(0);
        solution.add_entry(buffer, EntryObject::new(3, MmuEntry::new(&[])));

        solution
            .entry_mut(buffer, 3)
            .unwrap()
            .entry
            .set_address(0xabc);

        assert_eq!(
            solution.entries(buffer).unwrap()[&3].entry.address(),
            0xabc
        );
    }
}
