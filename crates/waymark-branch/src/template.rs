use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::debug;

use waymark_iter::{CombinationEnumerator, Enumerator, ProductEnumerator, RangeEnumerator};
use waymark_model::{
    GeneratorContext, Instruction, InstructionFactorization, Processor, Program, ProgramItem,
};

use crate::constructor::ConstructorFlags;
use crate::entry::BranchEntryKind;
use crate::situation::{BranchParams, BranchSituation, TemplateInstruction};
use crate::structure::BranchStructure;
use crate::trace_iterator::BranchTraceIterator;

/// Heuristic switches of the template enumeration.
#[derive(Debug, Clone, Copy)]
pub struct TemplateFlags {
    /// Reject skeletons with two adjacent basic blocks unless every such
    /// block boundary is a jump target.
    pub do_not_iterate_consecutive_basic_blocks: bool,
    /// Never place exception-prone instructions into delay slots.
    pub do_not_use_unsafe_delay_slots: bool,
    /// Avoid exception-prone instructions in a delay slot when a later
    /// backward branch could turn the exception into an infinite loop.
    pub do_not_use_unsafe_delay_slots_if_exception_can_cause_looping: bool,
}

impl Default for TemplateFlags {
    fn default() -> Self {
        Self {
            do_not_iterate_consecutive_basic_blocks: true,
            do_not_use_unsafe_delay_slots: false,
            do_not_use_unsafe_delay_slots_if_exception_can_cause_looping: true,
        }
    }
}

/// Validated parameters of the template enumeration.
#[derive(Debug, Clone)]
pub struct BranchTemplateConfig {
    /// Whether the target architecture has branch delay slots.
    pub delay_slot: bool,
    /// Template length bounds, delay slots not counted.
    pub min_length: usize,
    pub max_length: usize,
    pub min_branch_number: usize,
    pub max_branch_number: usize,
    /// Upper bound of executions of a single branch site per trace.
    pub max_branch_execution: usize,
    pub flags: TemplateFlags,
    /// Seed of all randomized choices; same seed, same templates.
    pub seed: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateConfigError {
    #[error("min_length must be positive")]
    NonPositiveMinLength,
    #[error("min_branch_number must be positive")]
    NonPositiveMinBranchNumber,
    #[error("max_branch_execution must be positive")]
    NonPositiveMaxBranchExecution,
    #[error("min_length {min} exceeds max_length {max}")]
    InvertedLength { min: usize, max: usize },
    #[error("min_branch_number {min} exceeds max_branch_number {max}")]
    InvertedBranchNumber { min: usize, max: usize },
    #[error("min_branch_number {number} exceeds max_length {length}")]
    BranchNumberExceedsLength { number: usize, length: usize },
    #[error("min_length {length} exceeds the consecutive-block bound {bound}")]
    LengthExceedsBlockBound { length: usize, bound: usize },
}

/// Fatal misconfigurations of the instruction set offered to the engine.
#[derive(Debug, Error)]
pub enum TemplateModelError {
    #[error("no branch instructions registered while min_branch_number is positive")]
    NoBranchInstructions,
    #[error("branch instruction '{0}' carries no branch situation")]
    MissingSituation(String),
    #[error("equivalence class '{0}' mixes conditional and unconditional branches")]
    MixedConditionality(String),
    #[error("no exception-safe instructions available for a delay slot")]
    NoSafeInstructions,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Config(#[from] TemplateConfigError),
    #[error(transparent)]
    Model(#[from] TemplateModelError),
}

impl BranchTemplateConfig {
    /// Checks the parameter combination and applies the reference clamping
    /// of `max_branch_number` and `max_length`.
    pub fn validated(mut self) -> Result<Self, TemplateConfigError> {
        if self.min_length == 0 {
            return Err(TemplateConfigError::NonPositiveMinLength);
        }
        if self.min_branch_number == 0 {
            return Err(TemplateConfigError::NonPositiveMinBranchNumber);
        }
        if self.max_branch_execution == 0 {
            return Err(TemplateConfigError::NonPositiveMaxBranchExecution);
        }
        if self.min_length > self.max_length {
            return Err(TemplateConfigError::InvertedLength {
                min: self.min_length,
                max: self.max_length,
            });
        }
        if self.min_branch_number > self.max_branch_number {
            return Err(TemplateConfigError::InvertedBranchNumber {
                min: self.min_branch_number,
                max: self.max_branch_number,
            });
        }
        if self.min_branch_number > self.max_length {
            return Err(TemplateConfigError::BranchNumberExceedsLength {
                number: self.min_branch_number,
                length: self.max_length,
            });
        }

        if self.max_branch_number > self.max_length {
            self.max_branch_number = self.max_length;
        }
        if self.min_length < self.min_branch_number {
            self.min_length = self.min_branch_number;
        }

        if self.flags.do_not_iterate_consecutive_basic_blocks {
            let bound = 3 * self.max_branch_number + 1;
            if self.min_length > bound {
                return Err(TemplateConfigError::LengthExceedsBlockBound {
                    length: self.min_length,
                    bound,
                });
            }
            if self.max_length > bound {
                self.max_length = bound;
            }
        }

        Ok(self)
    }
}

/// One equivalence class of branch instructions with their situations.
#[derive(Debug, Clone)]
struct BranchClass {
    name: String,
    conditional: bool,
    instructions: Vec<TemplateInstruction>,
}

/// A realized branch site of the current program.
#[derive(Debug, Clone)]
pub struct RealizedBranch {
    /// Position of the branch within structure and program alike.
    pub position: usize,
    pub situation: Box<dyn BranchSituation>,
    pub nullifies_delay_slot: bool,
}

/// One concrete template: the skeleton it came from, the instruction
/// sequence, and the realized branch sites awaiting construction.
#[derive(Debug, Clone)]
pub struct RealizedTemplate {
    pub structure: BranchStructure,
    pub program: Program,
    pub branches: Vec<RealizedBranch>,
}

/// Top-level enumerator of branch test templates.
///
/// Eight nested levels form the search space, outer to inner: structure
/// length, branch count, branch positions, branch labels, branch classes,
/// slot classes, block classes, and the trace assignment. Advancing a level
/// re-seeds every level nested inside it.
#[derive(Debug, Clone)]
pub struct BranchTemplateIterator {
    config: BranchTemplateConfig,

    branches: Vec<BranchClass>,
    all_slots: InstructionFactorization,
    safe_slots: InstructionFactorization,
    all_blocks: InstructionFactorization,
    safe_instructions: Vec<Instruction>,

    has_value: bool,

    length_iterator: RangeEnumerator,
    branch_number_iterator: RangeEnumerator,
    branch_position_iterator: CombinationEnumerator,
    branch_label_iterator: ProductEnumerator<RangeEnumerator>,
    branch_iterator: ProductEnumerator<RangeEnumerator>,
    slot_iterator: ProductEnumerator<RangeEnumerator>,
    block_iterator: ProductEnumerator<RangeEnumerator>,
    trace_iterator: BranchTraceIterator,

    rng: ChaCha8Rng,
    stage: u64,
}

impl BranchTemplateIterator {
    pub fn new(
        config: BranchTemplateConfig,
        instructions: Vec<TemplateInstruction>,
    ) -> Result<Self, TemplateError> {
        let config = config.validated()?;

        let mut branches: Vec<BranchClass> = Vec::new();
        let mut all_slots = InstructionFactorization::new();
        let mut safe_slots = InstructionFactorization::new();
        let mut all_blocks = InstructionFactorization::new();
        let mut safe_instructions = Vec::new();

        for template_instruction in instructions {
            let instruction = &template_instruction.instruction;

            if instruction.branch {
                if template_instruction.situation.is_none() {
                    return Err(TemplateModelError::MissingSituation(
                        instruction.name.clone(),
                    )
                    .into());
                }

                let class_name = instruction.equivalence_class.clone();
                let conditional = instruction.conditional_branch;

                match branches.iter_mut().find(|c| c.name == class_name) {
                    Some(class) => {
                        if class.conditional != conditional {
                            return Err(
                                TemplateModelError::MixedConditionality(class_name).into()
                            );
                        }
                        class.instructions.push(template_instruction);
                    }
                    None => branches.push(BranchClass {
                        name: class_name,
                        conditional,
                        instructions: vec![template_instruction],
                    }),
                }
            } else {
                all_slots.register(instruction.clone());
                all_blocks.register(instruction.clone());

                if instruction.can_throw_exception {
                    // Keep the class present so slot-class indices line up.
                    safe_slots.register_class(instruction.equivalence_class.clone());
                } else {
                    safe_slots.register(instruction.clone());
                    safe_instructions.push(instruction.clone());
                }
            }
        }

        if branches.is_empty() {
            return Err(TemplateModelError::NoBranchInstructions.into());
        }

        let seed = config.seed;
        let max_branch_execution = config.max_branch_execution;

        Ok(Self {
            length_iterator: RangeEnumerator::new(
                config.min_length as i64,
                config.max_length as i64,
            ),
            branch_number_iterator: RangeEnumerator::new(
                config.min_branch_number as i64,
                config.max_branch_number as i64,
            ),
            branch_position_iterator: CombinationEnumerator::new(0, 0, 0),
            branch_label_iterator: ProductEnumerator::new(),
            branch_iterator: ProductEnumerator::new(),
            slot_iterator: ProductEnumerator::new(),
            block_iterator: ProductEnumerator::new(),
            trace_iterator: BranchTraceIterator::new(
                BranchStructure::new(0),
                max_branch_execution,
                ChaCha8Rng::seed_from_u64(seed),
            ),
            config,
            branches,
            all_slots,
            safe_slots,
            all_blocks,
            safe_instructions,
            has_value: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
            stage: 1,
        })
    }

    fn stage_rng(&mut self) -> ChaCha8Rng {
        let rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(self.stage));
        self.stage += 1;
        rng
    }

    fn current_length(&self) -> usize {
        self.length_iterator.index_value()
    }

    fn current_branch_number(&self) -> usize {
        self.branch_number_iterator.index_value()
    }

    fn product_value(product: &ProductEnumerator<RangeEnumerator>, position: usize) -> usize {
        if product.has_value() && position < product.size() {
            product.value_at(position) as usize
        } else {
            0
        }
    }

    /// Builds the skeleton described by the current level values.
    fn branch_structure(&self) -> BranchStructure {
        let length = self.current_length();
        let branch_number = self.current_branch_number();
        let slots = if self.config.delay_slot { branch_number } else { 0 };

        let mut structure = BranchStructure::new(length + slots);
        let positions = self.branch_position_iterator.value();

        let mut j = 0;
        let mut branch = 0;
        let mut block = 0;

        for i in 0..length {
            if branch < branch_number && positions.get(branch) == Some(&i) {
                let label = Self::product_value(&self.branch_label_iterator, branch);
                let class = Self::product_value(&self.branch_iterator, branch);

                let entry = structure.get_mut(j);
                entry.set_kind(BranchEntryKind::Branch);
                entry.set_conditional_branch(
                    self.branches.get(class).map(|c| c.conditional).unwrap_or(false),
                );
                entry.set_branch_label(label);
                entry.set_equivalence_class(class);

                if self.config.delay_slot {
                    let slot_class = Self::product_value(&self.slot_iterator, branch);
                    j += 1;
                    let slot = structure.get_mut(j);
                    slot.set_kind(BranchEntryKind::Slot);
                    slot.set_equivalence_class(slot_class);
                }

                branch += 1;
            } else {
                let class = Self::product_value(&self.block_iterator, block);
                let entry = structure.get_mut(j);
                entry.set_kind(BranchEntryKind::Block);
                entry.set_equivalence_class(class);
                block += 1;
            }
            j += 1;
        }

        structure
    }

    fn filter_branch_position(&self) -> bool {
        if !self.config.flags.do_not_iterate_consecutive_basic_blocks {
            return true;
        }

        let structure = self.branch_structure();
        let mut lower_bound = 0;
        for i in 1..structure.len() {
            if structure.get(i - 1).is_block() && structure.get(i).is_block() {
                lower_bound += 1;
            }
        }

        self.current_branch_number() >= lower_bound
    }

    fn filter_branch_label(&self) -> bool {
        if !self.config.flags.do_not_iterate_consecutive_basic_blocks {
            return true;
        }

        let structure = self.branch_structure();
        let mut jumps = BTreeSet::new();
        let mut blocks = BTreeSet::new();

        for i in 0..structure.len() {
            let entry = structure.get(i);
            if entry.is_branch() {
                jumps.insert(entry.branch_label());
            } else if i > 0 && structure.get(i - 1).is_block() && entry.is_block() {
                blocks.insert(i);
            }
        }

        blocks.is_subset(&jumps)
    }

    fn init_length_iterator(&mut self) -> bool {
        self.length_iterator = RangeEnumerator::new(
            self.config.min_length as i64,
            self.config.max_length as i64,
        );
        self.length_iterator.init();
        self.length_iterator.has_value()
    }

    fn init_branch_number_iterator(&mut self) -> bool {
        self.branch_number_iterator = RangeEnumerator::new(
            self.config.min_branch_number as i64,
            self.config.max_branch_number as i64,
        );
        self.branch_number_iterator.init();
        self.branch_number_iterator.has_value()
    }

    fn init_branch_position_iterator_unfiltered(&mut self, length: usize, branch_number: usize) {
        self.branch_position_iterator = CombinationEnumerator::new(0, length - 1, branch_number);
        self.branch_position_iterator.init();
    }

    fn init_branch_position_iterator(&mut self, length: usize, branch_number: usize) -> bool {
        self.init_branch_position_iterator_unfiltered(length, branch_number);

        while self.branch_position_iterator.has_value() {
            if self.filter_branch_position() {
                return true;
            }
            self.branch_position_iterator.next();
        }

        false
    }

    fn init_branch_label_iterator(&mut self, length: usize, branch_number: usize) -> bool {
        let mut product = ProductEnumerator::new();
        let upper = (length - 1) + if self.config.delay_slot { branch_number } else { 0 };
        for _ in 0..branch_number {
            product.register(RangeEnumerator::new(0, upper as i64));
        }
        product.init();
        self.branch_label_iterator = product;

        while self.branch_label_iterator.has_value() {
            // Labels without a feasible trace are skipped right here.
            if self.filter_branch_label() && self.init_trace_iterator() {
                return true;
            }
            self.branch_label_iterator.next();
        }

        false
    }

    fn init_branch_iterator(&mut self, branch_number: usize) -> bool {
        let count = self.branches.len();
        let mut product = ProductEnumerator::new();
        for _ in 0..branch_number {
            product.register(RangeEnumerator::new(0, count as i64 - 1));
        }
        product.init();
        self.branch_iterator = product;
        self.branch_iterator.has_value()
    }

    fn init_slot_iterator(&mut self, branch_number: usize) -> bool {
        let count = self.all_slots.class_count();
        let mut product = ProductEnumerator::new();
        for _ in 0..branch_number {
            product.register(RangeEnumerator::new(0, count as i64 - 1));
        }
        product.init();
        self.slot_iterator = product;
        self.slot_iterator.has_value()
    }

    fn init_block_iterator(&mut self, length: usize, branch_number: usize) -> bool {
        let count = self.all_blocks.class_count();
        let mut product = ProductEnumerator::new();
        for _ in 0..length.saturating_sub(branch_number) {
            product.register(RangeEnumerator::new(0, count as i64 - 1));
        }
        product.init();
        self.block_iterator = product;
        self.block_iterator.has_value()
    }

    fn init_trace_iterator(&mut self) -> bool {
        let structure = self.branch_structure();
        let rng = self.stage_rng();
        let flags = ConstructorFlags {
            // Without delay slots in the skeleton, slot coverage is unusable.
            do_not_use_delay_slots: !self.config.delay_slot,
        };
        self.trace_iterator = BranchTraceIterator::with_flags(
            structure,
            self.config.max_branch_execution,
            flags,
            rng,
        );
        self.trace_iterator.init();
        self.trace_iterator.has_value()
    }

    pub fn init(&mut self) {
        self.has_value = true;

        let ok = self.init_length_iterator()
            && self.init_branch_number_iterator()
            && {
                let (length, number) = (self.current_length(), self.current_branch_number());
                self.init_branch_position_iterator(length, number)
            }
            && {
                let (length, number) = (self.current_length(), self.current_branch_number());
                self.init_branch_label_iterator(length, number)
            }
            && self.init_branch_iterator(self.current_branch_number())
            && (!self.config.delay_slot || self.init_slot_iterator(self.current_branch_number()))
            && {
                let (length, number) = (self.current_length(), self.current_branch_number());
                self.init_block_iterator(length, number)
            }
            && self.init_trace_iterator();

        if !ok {
            self.stop();
        }
    }

    pub fn has_value(&self) -> bool {
        self.has_value
    }

    /// The skeleton (with traces and coverage) behind the current template.
    pub fn structure(&self) -> &BranchStructure {
        self.trace_iterator.structure()
    }

    pub fn stop(&mut self) {
        self.has_value = false;
    }

    fn next_length_iterator(&mut self) -> bool {
        if !self.length_iterator.has_value() {
            return false;
        }
        self.length_iterator.next();
        if !self.length_iterator.has_value() {
            return false;
        }

        let length = self.current_length();
        let number = self.current_branch_number();

        self.init_branch_iterator(number)
            && self.init_slot_iterator(number)
            && self.init_block_iterator(length, number)
            && self.init_branch_position_iterator(length, number)
            && self.init_branch_label_iterator(length, number)
            && self.init_trace_iterator()
    }

    fn next_branch_number_iterator(&mut self) -> bool {
        if !self.branch_number_iterator.has_value() {
            return false;
        }
        self.branch_number_iterator.next();
        if !self.branch_number_iterator.has_value() {
            return false;
        }

        let length = self.current_length();
        let number = self.current_branch_number();

        if !self.init_branch_iterator(number)
            || !self.init_slot_iterator(number)
            || !self.init_block_iterator(length, number)
        {
            return false;
        }

        self.init_branch_position_iterator_unfiltered(length, number);
        if !self.branch_position_iterator.has_value() {
            return false;
        }

        self.init_branch_label_iterator(length, number) && self.init_trace_iterator()
    }

    fn next_branch_position_iterator(&mut self) -> bool {
        let length = self.current_length();
        let number = self.current_branch_number();

        while self.branch_position_iterator.has_value() {
            self.branch_position_iterator.next();

            if self.branch_position_iterator.has_value() && self.filter_branch_position() {
                return self.init_branch_label_iterator(length, number)
                    && self.init_branch_iterator(number)
                    && self.init_slot_iterator(number)
                    && self.init_block_iterator(length, number)
                    && self.init_trace_iterator();
            }
        }

        false
    }

    fn next_branch_label_iterator(&mut self) -> bool {
        let length = self.current_length();
        let number = self.current_branch_number();

        while self.branch_label_iterator.has_value() {
            self.branch_label_iterator.next();

            if self.branch_label_iterator.has_value() && self.filter_branch_label() {
                if !self.init_branch_iterator(number)
                    || !self.init_slot_iterator(number)
                    || !self.init_block_iterator(length, number)
                {
                    return false;
                }

                // No feasible trace under these labels: try the next ones.
                if !self.init_trace_iterator() {
                    continue;
                }

                return true;
            }
        }

        false
    }

    fn next_branch_iterator(&mut self) -> bool {
        let length = self.current_length();
        let number = self.current_branch_number();

        if !self.branch_iterator.has_value() {
            return false;
        }
        self.branch_iterator.next();
        if !self.branch_iterator.has_value() {
            return false;
        }

        self.init_slot_iterator(number)
            && self.init_block_iterator(length, number)
            && self.init_trace_iterator()
    }

    fn next_slot_iterator(&mut self) -> bool {
        let length = self.current_length();
        let number = self.current_branch_number();

        if !self.slot_iterator.has_value() {
            return false;
        }
        self.slot_iterator.next();
        if !self.slot_iterator.has_value() {
            return false;
        }

        self.init_block_iterator(length, number) && self.init_trace_iterator()
    }

    fn next_block_iterator(&mut self) -> bool {
        if !self.block_iterator.has_value() {
            return false;
        }
        self.block_iterator.next();
        if !self.block_iterator.has_value() {
            return false;
        }

        self.init_trace_iterator()
    }

    fn next_trace_iterator(&mut self) -> bool {
        if !self.trace_iterator.has_value() {
            return false;
        }
        self.trace_iterator.next();
        self.trace_iterator.has_value()
    }

    pub fn next(&mut self) {
        if !self.has_value {
            return;
        }
        if self.next_trace_iterator() {
            return;
        }
        if self.next_block_iterator() {
            return;
        }
        if self.config.delay_slot && self.next_slot_iterator() {
            return;
        }
        if self.next_branch_iterator() {
            return;
        }
        if self.next_branch_label_iterator() {
            return;
        }
        if self.next_branch_position_iterator() {
            return;
        }
        if self.next_branch_number_iterator() {
            return;
        }
        if self.next_length_iterator() {
            return;
        }

        debug!("template enumeration exhausted");
        self.stop();
    }

    fn random_branch(&mut self, class: usize) -> TemplateInstruction {
        let class = &self.branches[class];
        class.instructions[self.rng.gen_range(0..class.instructions.len())].clone()
    }

    fn random_block(&mut self, class: usize) -> Instruction {
        let class = self.all_blocks.class(class);
        class.get(self.rng.gen_range(0..class.len())).clone()
    }

    fn random_slot(&mut self, class: usize) -> Instruction {
        let class = self.all_slots.class(class);
        class.get(self.rng.gen_range(0..class.len())).clone()
    }

    fn random_safe_slot(&mut self, class_index: usize) -> Result<Instruction, TemplateModelError> {
        let len = self.safe_slots.class(class_index).len();
        if len == 0 {
            // Borrow a safe instruction from any other class.
            if self.safe_instructions.is_empty() {
                return Err(TemplateModelError::NoSafeInstructions);
            }
            let index = self.rng.gen_range(0..self.safe_instructions.len());
            return Ok(self.safe_instructions[index].clone());
        }
        let index = self.rng.gen_range(0..len);
        Ok(self.safe_slots.class(class_index).get(index).clone())
    }

    /// A backward branch after the slot could retry a faulting slot
    /// instruction forever.
    fn can_exception_cause_infinite_looping(&self, branch_index: usize) -> bool {
        let structure = self.trace_iterator.structure();
        let branch = structure.get(branch_index);

        // Branching to the delay slot or to the next instruction is safe.
        if branch.branch_label() == branch_index + 1 || branch.branch_label() == branch_index + 2 {
            return false;
        }

        for i in branch_index + 2..structure.len() {
            let entry = structure.get(i);
            if entry.is_branch() && entry.branch_label() <= i {
                return true;
            }
        }

        false
    }

    /// Realizes the current skeleton as an instruction program with random
    /// picks from the equivalence classes.
    pub fn program(&mut self) -> Result<RealizedTemplate, TemplateModelError> {
        let structure = self.trace_iterator.structure().clone();
        let mut program = Program::new();
        let mut realized_branches = Vec::new();
        let mut branch_number = 0;

        for (i, entry) in structure.entries().iter().enumerate() {
            match entry.kind() {
                BranchEntryKind::Branch => {
                    let template_instruction = self.random_branch(entry.equivalence_class());
                    let mut situation = template_instruction
                        .situation
                        .clone()
                        .ok_or_else(|| {
                            TemplateModelError::MissingSituation(
                                template_instruction.instruction.name.clone(),
                            )
                        })?;

                    situation.set_params(BranchParams {
                        branch_number,
                        branch_index: i,
                        branch_label: entry.branch_label(),
                        branch_trace: entry.trace().clone(),
                        block_coverage: entry.block_coverage().cloned(),
                        slot_coverage: entry.slot_coverage().cloned(),
                    });
                    branch_number += 1;

                    realized_branches.push(RealizedBranch {
                        position: i,
                        situation,
                        nullifies_delay_slot: template_instruction
                            .instruction
                            .nullifies_delay_slot,
                    });
                    program.append_instruction(template_instruction.instruction);
                }
                BranchEntryKind::Block => {
                    let instruction = self.random_block(entry.equivalence_class());
                    program.append_instruction(instruction);
                }
                BranchEntryKind::Slot => {
                    let class = entry.equivalence_class();
                    let instruction = if self.config.flags.do_not_use_unsafe_delay_slots {
                        self.random_safe_slot(class)?
                    } else if self
                        .config
                        .flags
                        .do_not_use_unsafe_delay_slots_if_exception_can_cause_looping
                        && self.can_exception_cause_infinite_looping(i - 1)
                    {
                        self.random_safe_slot(class)?
                    } else {
                        self.random_slot(class)
                    };
                    program.append_instruction(instruction);
                }
            }
        }

        Ok(RealizedTemplate {
            structure,
            program,
            branches: realized_branches,
        })
    }

    /// Inserts jump-target labels and the condition-mutating step code into
    /// the realized program.
    ///
    /// Returns `false` (with the context reset) when the candidate cannot be
    /// constructed: a needed step does not fit the delay slot, the branch
    /// nullifies its slot, or a situation fails to produce a step. The caller
    /// then retries with a fresh realization or the next candidate.
    pub fn construct(
        &mut self,
        realized: &mut RealizedTemplate,
        _processor: &dyn Processor,
        context: &mut GeneratorContext,
    ) -> bool {
        let mut steps: BTreeMap<usize, Program> = BTreeMap::new();
        let mut slots: BTreeSet<usize> = BTreeSet::new();

        for i in 0..realized.branches.len() {
            let position = realized.branches[i].position;
            let nullifies_delay_slot = realized.branches[i].nullifies_delay_slot;
            let situation = &mut realized.branches[i].situation;

            let label = situation.params().branch_label;
            let label_text = format!("{}:", context.label(label));

            let target = steps.entry(label).or_default();
            let already_labeled = matches!(
                target.items().first(),
                Some(ProgramItem::Pseudo(text)) if *text == label_text
            );
            if !already_labeled {
                target.insert_item(ProgramItem::Pseudo(label_text), 0);
            }

            situation.init(context);

            if situation.params().can_insert_step_into_block() {
                let coverage = situation
                    .params()
                    .block_coverage
                    .clone()
                    .unwrap_or_default();

                for block in coverage {
                    match situation.step() {
                        Some(step) if !step.is_empty() => {
                            steps.entry(block).or_default().append(step);
                        }
                        Some(_) => {}
                        None => {
                            context.reset();
                            return false;
                        }
                    }
                }
            } else {
                // The step must go into the delay slot.
                if nullifies_delay_slot {
                    context.reset();
                    return false;
                }
                if !situation.params().can_insert_step_into_slot() {
                    context.reset();
                    return false;
                }

                match situation.step() {
                    None => {
                        context.reset();
                        return false;
                    }
                    Some(step) if step.is_empty() => {}
                    Some(step) => {
                        if step.instruction_count() > 1 {
                            context.reset();
                            return false;
                        }
                        let slot_position = position + 1;
                        steps.entry(slot_position).or_default().append(step);
                        slots.insert(slot_position);
                    }
                }
            }
        }

        // Ascending insertion keeps the cumulative correction valid.
        let mut correction: isize = 0;
        for (position, insert) in steps {
            let at = (position as isize + correction) as usize;
            let count = insert.len() as isize;

            realized.program.insert(insert, at);

            if slots.contains(&position) {
                // The step replaces the original slot instruction.
                realized.program.remove((at as isize + count) as usize);
                correction -= 1;
            }

            correction += count;
        }

        true
    }
}
