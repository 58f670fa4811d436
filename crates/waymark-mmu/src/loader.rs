use crate::access::BufferAccessEvent;
use crate::spec::{AddressId, BufferId};

/// An evicting or priming address, possibly with the parent-buffer entry
/// that makes it translatable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAndEntry {
    pub address: u64,
    pub entry_id: Option<u64>,
}

impl AddressAndEntry {
    pub fn address_only(address: u64) -> Self {
        Self {
            address,
            entry_id: None,
        }
    }
}

/// One preparatory access to run before the main sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Load {
    pub buffer: BufferId,
    /// The event the preparation serves (HIT priming or MISS eviction).
    pub event: BufferAccessEvent,
    /// The main-sequence address this preparation is for.
    pub target_address: u64,
    /// The address to access.
    pub address: u64,
    /// Parent entry backing the access, when the buffer is a view.
    pub entry_id: Option<u64>,
}

/// Ordered ledger of the preparatory accesses of a solution.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    loads: Vec<(AddressId, Load)>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules plain preparatory accesses.
    pub fn add_addresses(
        &mut self,
        address_type: AddressId,
        buffer: BufferId,
        event: BufferAccessEvent,
        target_address: u64,
        addresses: impl IntoIterator<Item = u64>,
    ) {
        for address in addresses {
            self.loads.push((
                address_type,
                Load {
                    buffer,
                    event,
                    target_address,
                    address,
                    entry_id: None,
                },
            ));
        }
    }

    /// Schedules preparatory accesses that carry parent entries.
    pub fn add_addresses_and_entries(
        &mut self,
        address_type: AddressId,
        buffer: BufferId,
        event: BufferAccessEvent,
        target_address: u64,
        sequence: impl IntoIterator<Item = AddressAndEntry>,
    ) {
        for item in sequence {
            self.loads.push((
                address_type,
                Load {
                    buffer,
                    event,
                    target_address,
                    address: item.address,
                    entry_id: item.entry_id,
                },
            ));
        }
    }

    /// All scheduled loads of one address type, in scheduling order.
    pub fn prepare_loads(&self, address_type: AddressId) -> Vec<Load> {
        self.loads
            .iter()
            .filter(|(t, _)| *t == address_type)
            .map(|(_, load)| *load)
            .collect()
    }

    pub fn all_loads(&self) -> impl Iterator<Item = (AddressId, Load)> + '_ {
        self.loads.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_loads_filters_by_address_type() {
        let mut loader = MemoryLoader::new();
        loader.add_addresses(
            AddressId(0),
            BufferId(0),
            BufferAccessEvent::Hit,
            0x100,
            [0x100],
        );
        loader.add_addresses(
            AddressId(1),
            BufferId(1),
            BufferAccessEvent::Miss,
            0x200,
            [0x200, 0x300],
        );

        assert_eq!(loader.prepare_loads(AddressId(0)).len(), 1);
        let misses = loader.prepare_loads(AddressId(1));
        assert_eq!(misses.len(), 2);
        assert_eq!(misses[0].address, 0x200);
        assert_eq!(misses[1].address, 0x300);
        assert_eq!(loader.len(), 3);
    }
}
