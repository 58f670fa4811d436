use super::address::MmuAddressType;
use super::buffer::{BufferParams, MmuBuffer};
use super::segment::{MemoryRegion, MmuSegment};
use super::MmuModelError;

/// Index of an address type within its subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressId(pub usize);

/// Index of a buffer within its subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub usize);

/// The static description of one memory subsystem: its address spaces,
/// buffers, segments and memory regions.
///
/// Address types and buffers live in arenas and are referenced by id;
/// parent/child relations between buffers are id links, never shared
/// ownership.
#[derive(Debug, Clone, Default)]
pub struct MmuSubsystem {
    addresses: Vec<MmuAddressType>,
    buffers: Vec<MmuBuffer>,
    segments: Vec<MmuSegment>,
    regions: Vec<MemoryRegion>,
    virtual_address: Option<AddressId>,
    physical_address: Option<AddressId>,
}

impl MmuSubsystem {
    pub fn builder() -> MmuSubsystemBuilder {
        MmuSubsystemBuilder::default()
    }

    pub fn address(&self, id: AddressId) -> &MmuAddressType {
        &self.addresses[id.0]
    }

    pub fn addresses(&self) -> impl Iterator<Item = (AddressId, &MmuAddressType)> {
        self.addresses
            .iter()
            .enumerate()
            .map(|(i, a)| (AddressId(i), a))
    }

    pub fn address_by_name(&self, name: &str) -> Option<AddressId> {
        self.addresses
            .iter()
            .position(|a| a.name == name)
            .map(AddressId)
    }

    pub fn buffer(&self, id: BufferId) -> &MmuBuffer {
        &self.buffers[id.0]
    }

    pub fn buffers(&self) -> impl Iterator<Item = (BufferId, &MmuBuffer)> {
        self.buffers
            .iter()
            .enumerate()
            .map(|(i, b)| (BufferId(i), b))
    }

    pub fn buffer_by_name(&self, name: &str) -> Option<BufferId> {
        self.buffers
            .iter()
            .position(|b| b.name() == name)
            .map(BufferId)
    }

    pub fn segments(&self) -> &[MmuSegment] {
        &self.segments
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    pub fn virtual_address(&self) -> Option<AddressId> {
        self.virtual_address
    }

    pub fn physical_address(&self) -> Option<AddressId> {
        self.physical_address
    }
}

/// Incremental construction of a subsystem with name/reference validation.
#[derive(Debug, Default)]
pub struct MmuSubsystemBuilder {
    subsystem: MmuSubsystem,
}

impl MmuSubsystemBuilder {
    pub fn add_address(&mut self, address: MmuAddressType) -> Result<AddressId, MmuModelError> {
        if self
            .subsystem
            .addresses
            .iter()
            .any(|a| a.name == address.name)
        {
            return Err(MmuModelError::DuplicateName(address.name));
        }
        self.subsystem.addresses.push(address);
        Ok(AddressId(self.subsystem.addresses.len() - 1))
    }

    pub fn set_virtual_address(&mut self, id: AddressId) {
        self.subsystem.virtual_address = Some(id);
    }

    pub fn set_physical_address(&mut self, id: AddressId) {
        self.subsystem.physical_address = Some(id);
    }

    pub fn add_segment(&mut self, segment: MmuSegment) -> Result<(), MmuModelError> {
        if self
            .subsystem
            .segments
            .iter()
            .any(|s| s.name == segment.name)
        {
            return Err(MmuModelError::DuplicateName(segment.name));
        }
        self.subsystem.segments.push(segment);
        Ok(())
    }

    pub fn add_region(&mut self, region: MemoryRegion) -> Result<(), MmuModelError> {
        if self.subsystem.regions.iter().any(|r| r.name == region.name) {
            return Err(MmuModelError::DuplicateName(region.name));
        }
        self.subsystem.regions.push(region);
        Ok(())
    }

    /// Builds the buffer (deriving its address view) and wires the
    /// parent/child relation.
    pub fn add_buffer(&mut self, params: BufferParams) -> Result<BufferId, MmuModelError> {
        if self
            .subsystem
            .buffers
            .iter()
            .any(|b| b.name() == params.name)
        {
            return Err(MmuModelError::DuplicateName(params.name));
        }
        if params.address.0 >= self.subsystem.addresses.len() {
            return Err(MmuModelError::UnknownAddress(format!(
                "#{}",
                params.address.0
            )));
        }
        if let Some(parent) = params.parent {
            if parent.0 >= self.subsystem.buffers.len() {
                return Err(MmuModelError::BadParent {
                    buffer: params.name,
                    parent: format!("#{}", parent.0),
                });
            }
        }

        let parent = params.parent;
        let address_type = self.subsystem.addresses[params.address.0].clone();
        let buffer = MmuBuffer::build(params, &address_type)?;

        self.subsystem.buffers.push(buffer);
        let id = BufferId(self.subsystem.buffers.len() - 1);

        if let Some(parent) = parent {
            self.subsystem.buffers[parent.0].add_child(id);
        }

        Ok(id)
    }

    pub fn build(self) -> MmuSubsystem {
        self.subsystem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::expr::{IntegerField, MmuExpression};

    fn field(address: &MmuAddressType, lo: u32, hi: u32) -> IntegerField {
        IntegerField::new(address.variable(), lo, hi)
    }

    #[test]
    fn test_builder_wires_views() {
        let mut builder = MmuSubsystem::builder();
        let pa = builder
            .add_address(MmuAddressType::new("pa", 32))
            .unwrap();
        let address = MmuAddressType::new("pa", 32);

        let jtlb = builder
            .add_buffer(
                BufferParams::new(
                    "jtlb",
                    64,
                    1,
                    pa,
                    MmuExpression::field(field(&address, 12, 31)),
                    MmuExpression::empty(),
                    MmuExpression::field(field(&address, 0, 11)),
                )
                .non_replaceable(),
            )
            .unwrap();

        let dtlb = builder
            .add_buffer(
                BufferParams::new(
                    "dtlb",
                    4,
                    1,
                    pa,
                    MmuExpression::field(field(&address, 12, 31)),
                    MmuExpression::empty(),
                    MmuExpression::field(field(&address, 0, 11)),
                )
                .with_parent(jtlb),
            )
            .unwrap();

        let subsystem = builder.build();
        assert!(subsystem.buffer(dtlb).is_view());
        assert_eq!(subsystem.buffer(dtlb).parent(), Some(jtlb));
        assert_eq!(subsystem.buffer(jtlb).children(), &[dtlb]);
        assert!(!subsystem.buffer(jtlb).is_view());
    }

    #[test]
    fn test_duplicate_buffer_name_is_rejected() {
        let mut builder = MmuSubsystem::builder();
        let pa = builder
            .add_address(MmuAddressType::new("pa", 32))
            .unwrap();
        let address = MmuAddressType::new("pa", 32);

        let params = BufferParams::new(
            "l1",
            4,
            64,
            pa,
            MmuExpression::field(field(&address, 14, 31)),
            MmuExpression::field(field(&address, 6, 13)),
            MmuExpression::field(field(&address, 0, 5)),
        );

        builder.add_buffer(params.clone()).unwrap();
        assert!(builder.add_buffer(params).is_err());
    }

    #[test]
    fn test_lookup_by_name() {
        let mut builder = MmuSubsystem::builder();
        let va = builder
            .add_address(MmuAddressType::new("va", 48))
            .unwrap();
        builder.set_virtual_address(va);

        let subsystem = builder.build();
        assert_eq!(subsystem.address_by_name("va"), Some(va));
        assert_eq!(subsystem.virtual_address(), Some(va));
        assert!(subsystem.address_by_name("pa").is_none());
    }
}
