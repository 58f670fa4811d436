//! JSON form of the subsystem description.
//!
//! Covers the already-translated intermediate form only: addresses, buffer
//! geometry and bit decompositions, segments and regions. Guard predicates
//! are code and stay outside the codec; declarative guard conditions can be
//! attached after building.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::buffer::BufferParams;
use super::expr::{IntegerField, MmuExpression};
use super::segment::{MemoryRegion, MmuSegment};
use super::subsystem::MmuSubsystem;
use super::{MmuAddressType, MmuModelError};

/// A bit slice of the buffer's address variable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpec {
    pub lo: u32,
    pub hi: u32,
}

/// An entry field of a software-managed buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryFieldSpec {
    pub name: String,
    pub width: u32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferSpec {
    pub name: String,
    pub ways: u64,
    pub sets: u64,
    /// Name of the address type the buffer is keyed by.
    pub address: String,
    pub tag: Vec<FieldSpec>,
    pub index: Vec<FieldSpec>,
    pub offset: Vec<FieldSpec>,
    #[serde(default = "default_true")]
    pub replaceable: bool,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub fields: Vec<EntryFieldSpec>,
}

/// Serializable subsystem description.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubsystemSpec {
    pub addresses: Vec<MmuAddressType>,
    #[serde(default)]
    pub virtual_address: Option<String>,
    #[serde(default)]
    pub physical_address: Option<String>,
    #[serde(default)]
    pub segments: Vec<MmuSegment>,
    #[serde(default)]
    pub regions: Vec<MemoryRegion>,
    pub buffers: Vec<BufferSpec>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed subsystem json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Model(#[from] MmuModelError),
}

impl SubsystemSpec {
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ParseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builds the runtime subsystem, resolving names and deriving the
    /// address views.
    pub fn build(&self) -> Result<MmuSubsystem, ParseError> {
        let mut builder = MmuSubsystem::builder();

        for address in &self.addresses {
            builder.add_address(address.clone())?;
        }

        let resolve_address = |name: &str| {
            // Ids are assigned in registration order; resolve against the
            // spec's own address list.
            self.addresses
                .iter()
                .position(|a| a.name == name)
                .map(super::subsystem::AddressId)
                .ok_or_else(|| MmuModelError::UnknownAddress(name.to_string()))
        };

        if let Some(name) = &self.virtual_address {
            let id = resolve_address(name)?;
            builder.set_virtual_address(id);
        }
        if let Some(name) = &self.physical_address {
            let id = resolve_address(name)?;
            builder.set_physical_address(id);
        }

        for segment in &self.segments {
            builder.add_segment(segment.clone())?;
        }
        for region in &self.regions {
            builder.add_region(region.clone())?;
        }

        for buffer in &self.buffers {
            let address_id = resolve_address(&buffer.address)?;
            let address = &self.addresses[address_id.0];
            let variable = address.variable();

            let expression = |fields: &[FieldSpec]| {
                MmuExpression::cat(
                    fields
                        .iter()
                        .map(|f| IntegerField::new(variable.clone(), f.lo, f.hi))
                        .collect(),
                )
            };

            let mut params = BufferParams::new(
                buffer.name.clone(),
                buffer.ways,
                buffer.sets,
                address_id,
                expression(&buffer.tag),
                expression(&buffer.index),
                expression(&buffer.offset),
            );

            if !buffer.replaceable {
                params = params.non_replaceable();
            }
            if let Some(parent_name) = &buffer.parent {
                let parent = self
                    .buffers
                    .iter()
                    .position(|b| &b.name == parent_name)
                    .map(super::subsystem::BufferId)
                    .ok_or_else(|| MmuModelError::UnknownBuffer(parent_name.clone()))?;
                params = params.with_parent(parent);
            }
            if !buffer.fields.is_empty() {
                params = params.with_fields(
                    buffer
                        .fields
                        .iter()
                        .map(|f| super::expr::IntegerVariable::new(f.name.clone(), f.width))
                        .collect(),
                );
            }

            builder.add_buffer(params)?;
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"{
        "addresses": [
            { "name": "va", "width": 48 },
            { "name": "pa", "width": 36 }
        ],
        "virtual_address": "va",
        "physical_address": "pa",
        "segments": [
            { "name": "useg", "min_va": 0, "max_va": 2147483647, "mapped": true }
        ],
        "regions": [
            { "name": "ram", "min": 0, "max": 268435455 }
        ],
        "buffers": [
            {
                "name": "jtlb",
                "ways": 64,
                "sets": 1,
                "address": "va",
                "tag": [ { "lo": 13, "hi": 47 } ],
                "index": [],
                "offset": [ { "lo": 0, "hi": 12 } ],
                "replaceable": false
            },
            {
                "name": "dtlb",
                "ways": 4,
                "sets": 1,
                "address": "va",
                "tag": [ { "lo": 13, "hi": 47 } ],
                "index": [],
                "offset": [ { "lo": 0, "hi": 12 } ],
                "parent": "jtlb"
            },
            {
                "name": "l1",
                "ways": 4,
                "sets": 256,
                "address": "pa",
                "tag": [ { "lo": 14, "hi": 35 } ],
                "index": [ { "lo": 6, "hi": 13 } ],
                "offset": [ { "lo": 0, "hi": 5 } ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_and_build() {
        let spec = SubsystemSpec::from_json(SPEC).unwrap();
        let memory = spec.build().unwrap();

        let jtlb = memory.buffer_by_name("jtlb").unwrap();
        let dtlb = memory.buffer_by_name("dtlb").unwrap();
        let l1 = memory.buffer_by_name("l1").unwrap();

        assert!(!memory.buffer(jtlb).is_replaceable());
        assert_eq!(memory.buffer(dtlb).parent(), Some(jtlb));
        assert!(memory.buffer(l1).is_replaceable());
        assert_eq!(memory.buffer(l1).ways(), 4);

        assert_eq!(memory.virtual_address(), memory.address_by_name("va"));
        assert_eq!(memory.segments().len(), 1);
        assert_eq!(memory.regions().len(), 1);
    }

    #[test]
    fn test_round_trip() {
        let spec = SubsystemSpec::from_json(SPEC).unwrap();
        let json = spec.to_json().unwrap();
        let reparsed = SubsystemSpec::from_json(&json).unwrap();
        assert_eq!(spec, reparsed);
    }

    #[test]
    fn test_unknown_address_is_rejected() {
        let broken = SPEC.replace("\"address\": \"pa\"", "\"address\": \"ea\"");
        let spec = SubsystemSpec::from_json(&broken).unwrap();
        assert!(spec.build().is_err());
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let broken = SPEC.replace("\"parent\": \"jtlb\"", "\"parent\": \"itlb\"");
        let spec = SubsystemSpec::from_json(&broken).unwrap();
        assert!(spec.build().is_err());
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(SubsystemSpec::from_json("{ not json").is_err());
    }

    #[test]
    fn test_split_values_follow_the_spec() {
        let spec = SubsystemSpec::from_json(SPEC).unwrap();
        let memory = spec.build().unwrap();
        let l1 = memory.buffer_by_name("l1").unwrap();
        let buffer = memory.buffer(l1);

        let address = 0x0000_0001_4042u64 & 0xf_ffff_ffff;
        assert_eq!(buffer.offset_of(address), 0x2);
        assert_eq!(buffer.index_of(address), 0x1);
        assert_eq!(buffer.tag_of(address), 0x5);
    }
}
