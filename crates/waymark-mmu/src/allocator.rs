use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use crate::spec::{
    bit_mask, AddressId, BufferId, IntegerRange, MemoryRegion, MmuExpression, MmuSubsystem,
};

/// Upper bound of enumerated values per allocation pool.
///
/// Wider fields are allocated from the first `ALLOC_POOL_CAP` values only;
/// exhausting a pool is an explicit error, never a silent wrap-around.
pub const ALLOC_POOL_CAP: u64 = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("allocation pool exhausted: {context}")]
    Exhausted { context: String },
}

/// A pool of values handed out at most once until `reset`.
#[derive(Debug, Clone)]
pub struct AllocationPool {
    values: Vec<u64>,
    used: BTreeSet<u64>,
}

impl AllocationPool {
    pub fn new(values: impl IntoIterator<Item = u64>) -> Self {
        Self {
            values: values.into_iter().collect(),
            used: BTreeSet::new(),
        }
    }

    /// Sequential 0..cap pool for a field of the given bit width.
    pub fn for_width(width: u32) -> Self {
        let span = if width >= 64 {
            ALLOC_POOL_CAP
        } else {
            (1u64 << width).min(ALLOC_POOL_CAP)
        };
        Self::new(0..span)
    }

    /// First unused value not in `exclude`.
    pub fn allocate(&mut self, exclude: Option<&BTreeSet<u64>>) -> Option<u64> {
        let value = self.peek(exclude)?;
        self.used.insert(value);
        Some(value)
    }

    /// Like `allocate` without consuming the value.
    pub fn peek(&self, exclude: Option<&BTreeSet<u64>>) -> Option<u64> {
        self.values
            .iter()
            .copied()
            .find(|value| {
                !self.used.contains(value)
                    && exclude.map(|set| !set.contains(value)).unwrap_or(true)
            })
    }

    /// Marks a value as handed out regardless of where it came from.
    pub fn mark_used(&mut self, value: u64) {
        self.used.insert(value);
    }

    pub fn free_count(&self) -> usize {
        self.values.len() - self.used.len()
    }

    pub fn reset(&mut self) {
        self.used.clear();
    }
}

/// Region-sensitive pool for one atomic address sub-field.
///
/// A value drawn from a region pool is marked used globally as well, so two
/// regions sharing field values still never collide.
#[derive(Debug, Clone)]
pub struct AddressAllocationTable {
    global: AllocationPool,
    regions: BTreeMap<String, AllocationPool>,
}

impl AddressAllocationTable {
    pub fn new(lo: u32, hi: u32, regions: &[MemoryRegion]) -> Self {
        let width = hi - lo + 1;
        let mut region_pools = BTreeMap::new();

        for region in regions {
            let min_field = (region.min >> lo) & bit_mask(width);
            let max_field = (region.max >> lo) & bit_mask(width);
            if min_field > max_field {
                continue;
            }
            let span = (max_field - min_field + 1).min(ALLOC_POOL_CAP);
            let pool = AllocationPool::new(min_field..min_field + span);
            region_pools.insert(region.name.clone(), pool);
        }

        Self {
            global: AllocationPool::for_width(width),
            regions: region_pools,
        }
    }

    pub fn allocate(
        &mut self,
        region: Option<&str>,
        exclude: Option<&BTreeSet<u64>>,
    ) -> Result<u64, AllocatorError> {
        let pool = match region.and_then(|name| self.regions.get_mut(name)) {
            Some(pool) => pool,
            None => &mut self.global,
        };

        let value = pool.allocate(exclude).ok_or_else(|| AllocatorError::Exhausted {
            context: match region {
                Some(name) => format!("region '{name}'"),
                None => "global pool".to_string(),
            },
        })?;

        self.global.mark_used(value);
        Ok(value)
    }

    pub fn reset(&mut self) {
        self.global.reset();
        for pool in self.regions.values_mut() {
            pool.reset();
        }
    }
}

/// Allocates parts (tag, index) of addresses of one address type.
///
/// The bit positions referenced by any buffer expression over this address
/// type are split into disjoint atomic sub-fields. Each sub-field gets one
/// pool per value of the already-fixed lower significant bits, so allocation
/// of the high bits is independent per distinct low-bit context.
#[derive(Debug, Clone)]
pub struct SingleAddressTypeAllocator {
    ranges: Vec<IntegerRange>,
    /// (sub-field low bit, fixed lower bits) -> table.
    tables: BTreeMap<(u32, u64), AddressAllocationTable>,
    /// Bits meaningful to any tag or index extraction.
    mask: u64,
    regions: Vec<MemoryRegion>,
}

impl SingleAddressTypeAllocator {
    pub fn new(
        width: u32,
        expressions: &[MmuExpression],
        mask: u64,
        regions: Vec<MemoryRegion>,
    ) -> Self {
        let mut ranges = vec![IntegerRange::new(0, width.saturating_sub(1))];
        for expression in expressions {
            for term in expression.terms() {
                ranges.push(IntegerRange::new(term.lo, term.hi));
            }
        }

        Self {
            ranges: IntegerRange::divide(&ranges),
            tables: BTreeMap::new(),
            mask,
            regions,
        }
    }

    pub fn significant_bits_mask(&self) -> u64 {
        self.mask
    }

    fn ranges_of(&self, expression: &MmuExpression) -> Vec<IntegerRange> {
        let mut result = Vec::new();
        for term in expression.terms() {
            for range in &self.ranges {
                if range.hi >= term.lo && range.lo <= term.hi {
                    result.push(*range);
                }
            }
        }
        result
    }

    /// Allocates fresh values for the sub-fields of `expression`, leaving
    /// the other bits of `partial_address` untouched.
    pub fn allocate(
        &mut self,
        expression: &MmuExpression,
        partial_address: u64,
        region: Option<&str>,
        exclude: Option<&BTreeSet<u64>>,
    ) -> Result<u64, AllocatorError> {
        let ranges = self.ranges_of(expression);
        self.allocate_ranges(&ranges, partial_address, region, exclude)
    }

    /// Allocates fresh values for every known sub-field (a whole address).
    pub fn allocate_full(
        &mut self,
        partial_address: u64,
        region: Option<&str>,
    ) -> Result<u64, AllocatorError> {
        let ranges = self.ranges.clone();
        self.allocate_ranges(&ranges, partial_address, region, None)
    }

    fn allocate_ranges(
        &mut self,
        ranges: &[IntegerRange],
        partial_address: u64,
        region: Option<&str>,
        exclude: Option<&BTreeSet<u64>>,
    ) -> Result<u64, AllocatorError> {
        let mut address = partial_address;

        for range in ranges {
            let width = range.width();
            let field_mask = bit_mask(width);

            // Insignificant sub-fields (offsets) keep whatever the partial
            // address carries and consume no pool values.
            if (field_mask << range.lo) & !self.mask != 0 {
                continue;
            }

            // Pools are keyed by the significant bits below this sub-field.
            let lower = if range.lo == 0 {
                0
            } else {
                (address & self.mask) & bit_mask(range.lo)
            };

            let regions = &self.regions;
            let table = self
                .tables
                .entry((range.lo, lower))
                .or_insert_with(|| AddressAllocationTable::new(range.lo, range.hi, regions));

            let exclude_fields = exclude.map(|addresses| {
                addresses
                    .iter()
                    .map(|a| (a >> range.lo) & field_mask)
                    .collect::<BTreeSet<u64>>()
            });

            let value = table.allocate(region, exclude_fields.as_ref())?;

            address &= !(field_mask << range.lo);
            address |= value << range.lo;
        }

        Ok(address)
    }

    pub fn reset(&mut self) {
        for table in self.tables.values_mut() {
            table.reset();
        }
    }
}

/// Collision-free address allocation across all address types of a
/// subsystem.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    allocators: BTreeMap<AddressId, SingleAddressTypeAllocator>,
}

impl AddressAllocator {
    /// Derives per-address-type allocators from the buffers of the
    /// subsystem, partitioned by the given regions per address type.
    pub fn new(
        memory: &MmuSubsystem,
        regions_per_address: &BTreeMap<AddressId, Vec<MemoryRegion>>,
    ) -> Self {
        let mut allocators = BTreeMap::new();

        for (address_id, address) in memory.addresses() {
            let mut expressions = Vec::new();
            let mut mask = 0u64;

            for (_, buffer) in memory.buffers() {
                if buffer.address() != address_id {
                    continue;
                }
                expressions.push(buffer.tag_expression().clone());
                expressions.push(buffer.index_expression().clone());
                expressions.push(buffer.offset_expression().clone());
                mask |= buffer.tag_mask();
                mask |= buffer.index_mask();
            }

            let regions = regions_per_address
                .get(&address_id)
                .cloned()
                .unwrap_or_default();

            allocators.insert(
                address_id,
                SingleAddressTypeAllocator::new(address.width, &expressions, mask, regions),
            );
        }

        Self { allocators }
    }

    pub fn allocator_mut(&mut self, address: AddressId) -> &mut SingleAddressTypeAllocator {
        self.allocators.get_mut(&address).unwrap_or_else(|| {
            panic!("no allocator for address type #{}", address.0);
        })
    }

    /// Allocates a fresh tag for the buffer, keeping index and offset of the
    /// partial address.
    pub fn allocate_tag(
        &mut self,
        memory: &MmuSubsystem,
        buffer: BufferId,
        partial_address: u64,
        region: Option<&str>,
        exclude: Option<&BTreeSet<u64>>,
    ) -> Result<u64, AllocatorError> {
        let buffer = memory.buffer(buffer);
        let expression = buffer.tag_expression().clone();
        self.allocator_mut(buffer.address())
            .allocate(&expression, partial_address, region, exclude)
    }

    /// Allocates a fresh index for the buffer.
    pub fn allocate_index(
        &mut self,
        memory: &MmuSubsystem,
        buffer: BufferId,
        partial_address: u64,
        region: Option<&str>,
        exclude: Option<&BTreeSet<u64>>,
    ) -> Result<u64, AllocatorError> {
        let buffer = memory.buffer(buffer);
        let expression = buffer.index_expression().clone();
        self.allocator_mut(buffer.address())
            .allocate(&expression, partial_address, region, exclude)
    }

    /// Allocates a fresh full address of the given type.
    pub fn allocate_address(
        &mut self,
        address: AddressId,
        partial_address: u64,
        region: Option<&str>,
    ) -> Result<u64, AllocatorError> {
        self.allocator_mut(address)
            .allocate_full(partial_address, region)
    }

    pub fn reset(&mut self) {
        debug!("resetting address allocation tables");
        for allocator in self.allocators.values_mut() {
            allocator.reset();
        }
    }
}

/// Entry-id allocation for software-managed buffers.
#[derive(Debug, Clone)]
pub struct EntryIdAllocator {
    pools: BTreeMap<BufferId, AllocationPool>,
}

impl EntryIdAllocator {
    pub fn new(memory: &MmuSubsystem) -> Self {
        let mut pools = BTreeMap::new();
        for (id, buffer) in memory.buffers() {
            if !buffer.is_replaceable() {
                let capacity = (buffer.sets() * buffer.ways()).min(ALLOC_POOL_CAP);
                pools.insert(id, AllocationPool::new(0..capacity));
            }
        }
        Self { pools }
    }

    pub fn allocate(&mut self, buffer: BufferId) -> Result<u64, AllocatorError> {
        let pool = self
            .pools
            .get_mut(&buffer)
            .ok_or_else(|| AllocatorError::Exhausted {
                context: format!("no entry pool for buffer #{}", buffer.0),
            })?;

        pool.allocate(None).ok_or_else(|| AllocatorError::Exhausted {
            context: format!("entry ids of buffer #{}", buffer.0),
        })
    }

    pub fn reset(&mut self) {
        for pool in self.pools.values_mut() {
            pool.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{BufferParams, IntegerField, MmuAddressType, MmuSubsystem};

    fn cache_subsystem() -> (MmuSubsystem, BufferId, AddressId) {
        let mut builder = MmuSubsystem::builder();
        let pa = builder.add_address(MmuAddressType::new("pa", 32)).unwrap();
        let address = MmuAddressType::new("pa", 32);
        let field = |lo, hi| IntegerField::new(address.variable(), lo, hi);

        let cache = builder
            .add_buffer(BufferParams::new(
                "l1",
                4,
                256,
                pa,
                MmuExpression::field(field(14, 31)),
                MmuExpression::field(field(6, 13)),
                MmuExpression::field(field(0, 5)),
            ))
            .unwrap();

        (builder.build(), cache, pa)
    }

    #[test]
    fn test_pool_never_repeats_values() {
        let mut pool = AllocationPool::for_width(8);
        let mut seen = BTreeSet::new();
        for _ in 0..ALLOC_POOL_CAP {
            let value = pool.allocate(None).unwrap();
            assert!(seen.insert(value), "value {value} repeated");
        }
        assert_eq!(pool.allocate(None), None);
    }

    #[test]
    fn test_pool_cap_for_narrow_fields() {
        let mut pool = AllocationPool::for_width(2);
        for _ in 0..4 {
            assert!(pool.allocate(None).is_some());
        }
        assert_eq!(pool.allocate(None), None);
        pool.reset();
        assert!(pool.allocate(None).is_some());
    }

    #[test]
    fn test_tag_allocation_is_collision_free() {
        let (memory, cache, _) = cache_subsystem();
        let mut allocator = AddressAllocator::new(&memory, &BTreeMap::new());

        let partial = 0x0000_1040u64; // fixed index and offset
        let buffer = memory.buffer(cache);

        let mut tags = BTreeSet::new();
        for _ in 0..ALLOC_POOL_CAP {
            let address = allocator
                .allocate_tag(&memory, cache, partial, None, None)
                .unwrap();
            // Index and offset survive the allocation.
            assert_eq!(buffer.index_of(address), buffer.index_of(partial));
            assert_eq!(buffer.offset_of(address), buffer.offset_of(partial));
            assert!(tags.insert(buffer.tag_of(address)), "tag repeated");
        }

        // Pool capacity reached: explicit failure instead of a wrap-around.
        assert!(allocator
            .allocate_tag(&memory, cache, partial, None, None)
            .is_err());
    }

    #[test]
    fn test_distinct_indices_draw_from_distinct_pools() {
        let (memory, cache, _) = cache_subsystem();
        let mut allocator = AddressAllocator::new(&memory, &BTreeMap::new());
        let buffer = memory.buffer(cache);

        let a = allocator
            .allocate_tag(&memory, cache, 0x0000_0040, None, None)
            .unwrap();
        let b = allocator
            .allocate_tag(&memory, cache, 0x0000_0080, None, None)
            .unwrap();

        // Independent pools may hand out the same tag for different indices.
        assert_eq!(buffer.tag_of(a), buffer.tag_of(b));
        assert_ne!(buffer.index_of(a), buffer.index_of(b));
    }

    #[test]
    fn test_exclusion_skips_addresses() {
        let (memory, cache, _) = cache_subsystem();
        let mut allocator = AddressAllocator::new(&memory, &BTreeMap::new());
        let buffer = memory.buffer(cache);

        // Exclude the address whose tag field would be handed out first.
        let excluded: BTreeSet<u64> = [buffer.address_of(0, 1, 0)].into_iter().collect();
        let address = allocator
            .allocate_tag(&memory, cache, 0x0000_0040, None, Some(&excluded))
            .unwrap();

        assert_ne!(buffer.tag_of(address), 0);
    }

    #[test]
    fn test_region_partitioned_allocation() {
        let (memory, cache, pa) = cache_subsystem();
        let regions = vec![
            MemoryRegion::new("low", 0x0000_0000, 0x3fff_ffff),
            MemoryRegion::new("high", 0x4000_0000, 0x7fff_ffff),
        ];
        let mut per_address = BTreeMap::new();
        per_address.insert(pa, regions);

        let mut allocator = AddressAllocator::new(&memory, &per_address);
        let buffer = memory.buffer(cache);

        let address = allocator
            .allocate_tag(&memory, cache, 0, Some("high"), None)
            .unwrap();

        // The tag comes from the high region's window of field values.
        assert!(buffer.tag_of(address) >= (0x4000_0000u64 >> 14));
    }

    #[test]
    fn test_entry_id_allocator() {
        let mut builder = MmuSubsystem::builder();
        let pa = builder.add_address(MmuAddressType::new("pa", 32)).unwrap();
        let address = MmuAddressType::new("pa", 32);
        let field = |lo, hi| IntegerField::new(address.variable(), lo, hi);

        let tlb = builder
            .add_buffer(
                BufferParams::new(
                    "jtlb",
                    2,
                    1,
                    pa,
                    MmuExpression::field(field(12, 31)),
                    MmuExpression::empty(),
                    MmuExpression::field(field(0, 11)),
                )
                .non_replaceable(),
            )
            .unwrap();

        let memory = builder.build();
        let mut allocator = EntryIdAllocator::new(&memory);

        assert_eq!(allocator.allocate(tlb), Ok(0));
        assert_eq!(allocator.allocate(tlb), Ok(1));
        assert!(allocator.allocate(tlb).is_err());

        allocator.reset();
        assert_eq!(allocator.allocate(tlb), Ok(0));
    }
}
