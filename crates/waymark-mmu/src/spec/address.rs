use serde::{Deserialize, Serialize};

use super::expr::{bit_mask, IntegerField, IntegerVariable, MmuCalculator, MmuExpression};
use super::MmuModelError;

/// One address space of the subsystem (virtual, physical, intermediate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmuAddressType {
    pub name: String,
    pub width: u32,
}

impl MmuAddressType {
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }

    /// The bit-vector variable standing for an address of this space.
    pub fn variable(&self) -> IntegerVariable {
        IntegerVariable::new(self.name.clone(), self.width)
    }
}

/// Which extracted field a reconstructed address bit comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldSource {
    Tag,
    Index,
    Offset,
}

/// One contiguous piece of the address-reconstruction mapping.
#[derive(Debug, Clone)]
struct JoinPiece {
    address_lo: u32,
    source: FieldSource,
    source_lo: u32,
    width: u32,
}

/// Bidirectional tag/index/offset codec of one buffer.
///
/// Splitting evaluates the three extraction expressions; joining inverts them
/// through a bit mapping derived at construction time. Construction fails
/// when the extraction fields do not tile the address from bit 0 upwards.
#[derive(Debug, Clone)]
pub struct AddressView {
    address: IntegerVariable,
    tag: MmuExpression,
    index: MmuExpression,
    offset: MmuExpression,
    pieces: Vec<JoinPiece>,
}

impl AddressView {
    pub fn tag_of(&self, address: u64) -> u64 {
        MmuCalculator::eval_one(&self.tag, &self.address, address)
    }

    pub fn index_of(&self, address: u64) -> u64 {
        MmuCalculator::eval_one(&self.index, &self.address, address)
    }

    pub fn offset_of(&self, address: u64) -> u64 {
        MmuCalculator::eval_one(&self.offset, &self.address, address)
    }

    /// Rebuilds the address from its tag, index and offset.
    pub fn address_of(&self, tag: u64, index: u64, offset: u64) -> u64 {
        let mut address = 0u64;
        for piece in &self.pieces {
            let source = match piece.source {
                FieldSource::Tag => tag,
                FieldSource::Index => index,
                FieldSource::Offset => offset,
            };
            let bits = (source >> piece.source_lo) & bit_mask(piece.width);
            address |= bits << piece.address_lo;
        }
        address
    }

    pub fn tag_expression(&self) -> &MmuExpression {
        &self.tag
    }

    pub fn index_expression(&self) -> &MmuExpression {
        &self.index
    }

    pub fn offset_expression(&self) -> &MmuExpression {
        &self.offset
    }
}

/// Builds an [`AddressView`] by reversing the three extraction expressions.
pub struct MmuAddressViewBuilder {
    address: MmuAddressType,
    buffer_name: String,
    tag: MmuExpression,
    index: MmuExpression,
    offset: MmuExpression,
}

impl MmuAddressViewBuilder {
    pub fn new(
        address: &MmuAddressType,
        buffer_name: impl Into<String>,
        tag: MmuExpression,
        index: MmuExpression,
        offset: MmuExpression,
    ) -> Self {
        Self {
            address: address.clone(),
            buffer_name: buffer_name.into(),
            tag,
            index,
            offset,
        }
    }

    pub fn build(self) -> Result<AddressView, MmuModelError> {
        let variable = self.address.variable();
        let mut pieces = Vec::new();

        for (source, expression) in [
            (FieldSource::Tag, &self.tag),
            (FieldSource::Index, &self.index),
            (FieldSource::Offset, &self.offset),
        ] {
            let mut source_lo = 0u32;
            for term in expression.terms() {
                if term.variable != variable {
                    return Err(MmuModelError::ForeignField {
                        field: term.variable.name.clone(),
                        address: variable.name.clone(),
                    });
                }
                pieces.push(JoinPiece {
                    address_lo: term.lo,
                    source,
                    source_lo,
                    width: term.width(),
                });
                source_lo += term.width();
            }
        }

        pieces.sort_by_key(|piece| piece.address_lo);

        // The pieces must tile the address starting at bit 0.
        let mut expected = 0u32;
        for piece in &pieces {
            if piece.address_lo != expected {
                return Err(MmuModelError::ViewNotInvertible {
                    buffer: self.buffer_name,
                    expected,
                    found: piece.address_lo,
                });
            }
            expected += piece.width;
        }

        Ok(AddressView {
            address: variable,
            tag: self.tag,
            index: self.index,
            offset: self.offset,
            pieces,
        })
    }
}
