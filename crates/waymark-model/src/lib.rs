//! Interfaces to the external instruction/processor model.
//!
//! The generators drive these narrow seams; the concrete instruction set,
//! assembler and simulator live outside this workspace.

pub mod context;
pub mod factorization;
pub mod instruction;

pub use context::{GeneratorContext, Processor};
pub use factorization::{EquivalenceClass, InstructionFactorization};
pub use instruction::{Instruction, Program, ProgramItem};
