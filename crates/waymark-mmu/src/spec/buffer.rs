use crate::access::MemoryAccess;

use super::address::{AddressView, MmuAddressViewBuilder};
use super::condition::MmuGuard;
use super::expr::{IntegerVariable, MmuExpression};
use super::subsystem::{AddressId, BufferId};
use super::MmuModelError;

/// Construction parameters of a buffer; consumed by the subsystem builder.
#[derive(Debug, Clone)]
pub struct BufferParams {
    pub name: String,
    /// Associativity.
    pub ways: u64,
    pub sets: u64,
    pub address: AddressId,
    pub tag: MmuExpression,
    pub index: MmuExpression,
    pub offset: MmuExpression,
    pub guard: Option<MmuGuard>,
    /// Whether the buffer evicts entries on its own (cache-like) as opposed
    /// to being software-managed (TLB-like).
    pub replaceable: bool,
    /// Parent buffer this one is a filtered view of (e.g. DTLB over JTLB).
    pub parent: Option<BufferId>,
    /// Entry fields of a software-managed buffer.
    pub fields: Vec<IntegerVariable>,
}

impl BufferParams {
    pub fn new(
        name: impl Into<String>,
        ways: u64,
        sets: u64,
        address: AddressId,
        tag: MmuExpression,
        index: MmuExpression,
        offset: MmuExpression,
    ) -> Self {
        Self {
            name: name.into(),
            ways,
            sets,
            address,
            tag,
            index,
            offset,
            guard: None,
            replaceable: true,
            parent: None,
            fields: Vec::new(),
        }
    }

    pub fn non_replaceable(mut self) -> Self {
        self.replaceable = false;
        self
    }

    pub fn with_parent(mut self, parent: BufferId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_guard(mut self, guard: MmuGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_fields(mut self, fields: Vec<IntegerVariable>) -> Self {
        self.fields = fields;
        self
    }
}

/// A cache/TLB-like hardware structure addressed by tag, index and offset.
#[derive(Debug, Clone)]
pub struct MmuBuffer {
    name: String,
    ways: u64,
    sets: u64,
    address: AddressId,
    view: AddressView,
    guard: Option<MmuGuard>,
    replaceable: bool,
    parent: Option<BufferId>,
    children: Vec<BufferId>,
    fields: Vec<IntegerVariable>,
}

impl MmuBuffer {
    pub(super) fn build(
        params: BufferParams,
        address_type: &super::address::MmuAddressType,
    ) -> Result<Self, MmuModelError> {
        let view = MmuAddressViewBuilder::new(
            address_type,
            params.name.clone(),
            params.tag,
            params.index,
            params.offset,
        )
        .build()?;

        Ok(Self {
            name: params.name,
            ways: params.ways,
            sets: params.sets,
            address: params.address,
            view,
            guard: params.guard,
            replaceable: params.replaceable,
            parent: params.parent,
            children: Vec::new(),
            fields: params.fields,
        })
    }

    pub(super) fn add_child(&mut self, child: BufferId) {
        self.children.push(child);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ways(&self) -> u64 {
        self.ways
    }

    pub fn sets(&self) -> u64 {
        self.sets
    }

    pub fn address(&self) -> AddressId {
        self.address
    }

    pub fn view(&self) -> &AddressView {
        &self.view
    }

    pub fn tag_expression(&self) -> &MmuExpression {
        self.view.tag_expression()
    }

    pub fn index_expression(&self) -> &MmuExpression {
        self.view.index_expression()
    }

    pub fn offset_expression(&self) -> &MmuExpression {
        self.view.offset_expression()
    }

    pub fn tag_of(&self, address: u64) -> u64 {
        self.view.tag_of(address)
    }

    pub fn index_of(&self, address: u64) -> u64 {
        self.view.index_of(address)
    }

    pub fn offset_of(&self, address: u64) -> u64 {
        self.view.offset_of(address)
    }

    pub fn address_of(&self, tag: u64, index: u64, offset: u64) -> u64 {
        self.view.address_of(tag, index, offset)
    }

    /// Address bits belonging to the tag.
    pub fn tag_mask(&self) -> u64 {
        self.address_of(self.tag_of(u64::MAX), 0, 0)
    }

    /// Address bits belonging to the index.
    pub fn index_mask(&self) -> u64 {
        self.address_of(0, self.index_of(u64::MAX), 0)
    }

    /// Address bits belonging to the offset.
    pub fn offset_mask(&self) -> u64 {
        self.address_of(0, 0, self.offset_of(u64::MAX))
    }

    pub fn is_replaceable(&self) -> bool {
        self.replaceable
    }

    pub fn is_view(&self) -> bool {
        self.parent.is_some()
    }

    pub fn parent(&self) -> Option<BufferId> {
        self.parent
    }

    pub fn children(&self) -> &[BufferId] {
        &self.children
    }

    pub fn fields(&self) -> &[IntegerVariable] {
        &self.fields
    }

    /// Checks the guard against an access with its (partially) known
    /// addresses; an absent guard passes.
    pub fn check_guard<F>(&self, access: &MemoryAccess, lookup: &F) -> bool
    where
        F: Fn(&IntegerVariable) -> u64,
    {
        match &self.guard {
            Some(guard) => guard.check(access, lookup),
            None => true,
        }
    }
}
