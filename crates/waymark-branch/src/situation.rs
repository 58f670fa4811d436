use std::collections::BTreeSet;
use std::fmt;

use waymark_model::{GeneratorContext, Instruction, Processor, Program};

use crate::trace::BranchTrace;

/// Everything the engine knows about one realized branch site, injected into
/// its situation before construction.
#[derive(Debug, Clone, Default)]
pub struct BranchParams {
    /// Order number of the branch among the template's branches.
    pub branch_number: usize,
    /// Position of the branch in the structure.
    pub branch_index: usize,
    /// Position of the jump target in the structure.
    pub branch_label: usize,
    pub branch_trace: BranchTrace,
    pub block_coverage: Option<BTreeSet<usize>>,
    pub slot_coverage: Option<BTreeSet<usize>>,
}

impl BranchParams {
    pub fn is_forward_branch(&self) -> bool {
        self.branch_index < self.branch_label
    }

    pub fn is_backward_branch(&self) -> bool {
        !self.is_forward_branch()
    }

    pub fn can_insert_step_into_block(&self) -> bool {
        self.block_coverage.is_some()
    }

    pub fn can_insert_step_into_slot(&self) -> bool {
        self.slot_coverage.is_some()
    }
}

/// Contract between the template engine and the data-dependent setup code of
/// a branch instruction.
///
/// The engine injects the branch parameters, calls `init` once per candidate,
/// requests one `step` micro-program per covered block (or one for the delay
/// slot) and finally runs `construct`/`prepare`. `step` returning `None`
/// soft-fails the current candidate.
pub trait BranchSituation: fmt::Debug {
    fn set_params(&mut self, params: BranchParams);

    fn params(&self) -> &BranchParams;

    fn init(&mut self, context: &mut GeneratorContext);

    /// The condition-mutating micro-program for the next covered position;
    /// `Some(empty)` when no code is needed.
    fn step(&mut self) -> Option<Program>;

    fn construct(&mut self, processor: &dyn Processor, context: &mut GeneratorContext) -> bool;

    fn prepare(
        &mut self,
        processor: &dyn Processor,
        context: &mut GeneratorContext,
        layer: usize,
    ) -> Program;

    fn clone_box(&self) -> Box<dyn BranchSituation>;
}

impl Clone for Box<dyn BranchSituation> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// An instruction offered to the template engine, paired with the situation
/// driving its data-dependent setup (mandatory for branch instructions).
#[derive(Debug, Clone)]
pub struct TemplateInstruction {
    pub instruction: Instruction,
    pub situation: Option<Box<dyn BranchSituation>>,
}

impl TemplateInstruction {
    pub fn plain(instruction: Instruction) -> Self {
        Self {
            instruction,
            situation: None,
        }
    }

    pub fn with_situation(instruction: Instruction, situation: Box<dyn BranchSituation>) -> Self {
        Self {
            instruction,
            situation: Some(situation),
        }
    }
}

/// Minimal situation that flips the branch condition with a single
/// fixed instruction per step. Enough for model-only generation and tests.
#[derive(Debug, Clone, Default)]
pub struct ToggleSituation {
    params: BranchParams,
    step_name: String,
}

impl ToggleSituation {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            params: BranchParams::default(),
            step_name: step_name.into(),
        }
    }
}

impl BranchSituation for ToggleSituation {
    fn set_params(&mut self, params: BranchParams) {
        self.params = params;
    }

    fn params(&self) -> &BranchParams {
        &self.params
    }

    fn init(&mut self, _context: &mut GeneratorContext) {}

    fn step(&mut self) -> Option<Program> {
        let mut program = Program::new();
        // A fictitious branch needs no setup code at all.
        if self.params.branch_trace.is_fictitious() {
            return Some(program);
        }
        program.append_instruction(Instruction::new(self.step_name.clone(), "step"));
        Some(program)
    }

    fn construct(
        &mut self,
        _processor: &dyn Processor,
        _context: &mut GeneratorContext,
    ) -> bool {
        true
    }

    fn prepare(
        &mut self,
        _processor: &dyn Processor,
        _context: &mut GeneratorContext,
        _layer: usize,
    ) -> Program {
        Program::new()
    }

    fn clone_box(&self) -> Box<dyn BranchSituation> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxed_clone_is_independent() {
        let mut original: Box<dyn BranchSituation> = Box::new(ToggleSituation::new("flip"));
        let clone = original.clone();

        original.set_params(BranchParams {
            branch_number: 3,
            ..BranchParams::default()
        });

        assert_eq!(clone.params().branch_number, 0);
        assert_eq!(original.params().branch_number, 3);
    }

    #[test]
    fn test_toggle_step_empty_for_fictitious_trace() {
        let mut situation = ToggleSituation::new("flip");
        let mut params = BranchParams::default();
        params.branch_trace.add_execution(false);
        situation.set_params(params);

        assert!(situation.step().unwrap().is_empty());
    }
}
