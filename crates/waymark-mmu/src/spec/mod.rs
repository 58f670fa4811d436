//! Static structural description of a memory subsystem.
//!
//! Built once (programmatically or from the JSON form in [`parse`]) and read
//! by the solver; nothing here mutates during generation.

pub mod address;
pub mod buffer;
pub mod condition;
pub mod expr;
pub mod parse;
pub mod segment;
pub mod subsystem;

pub use address::{AddressView, MmuAddressType, MmuAddressViewBuilder};
pub use buffer::{BufferParams, MmuBuffer};
pub use condition::{MmuCondition, MmuConditionAtom, MmuGuard};
pub use condition::ConditionKind;
pub use expr::{bit_mask, IntegerField, IntegerRange, IntegerVariable, MmuCalculator, MmuExpression};
pub use parse::{BufferSpec, FieldSpec, ParseError, SubsystemSpec};
pub use segment::{MemoryRegion, MmuSegment};
pub use subsystem::{AddressId, BufferId, MmuSubsystem, MmuSubsystemBuilder};

use thiserror::Error;

/// Fatal defects of a subsystem description.
#[derive(Debug, Error)]
pub enum MmuModelError {
    #[error("field {field} does not belong to address variable {address}")]
    ForeignField { field: String, address: String },
    #[error("address view of '{buffer}' cannot be inverted: bit {expected} uncovered (next field starts at {found})")]
    ViewNotInvertible {
        buffer: String,
        expected: u32,
        found: u32,
    },
    #[error("duplicate name '{0}'")]
    DuplicateName(String),
    #[error("unknown address type '{0}'")]
    UnknownAddress(String),
    #[error("unknown buffer '{0}'")]
    UnknownBuffer(String),
    #[error("buffer '{buffer}' declares parent '{parent}' after itself")]
    BadParent { buffer: String, parent: String },
    #[error("spec error: {0}")]
    Invalid(String),
}
