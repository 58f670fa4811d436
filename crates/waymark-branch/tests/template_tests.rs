use std::collections::BTreeSet;

use waymark_branch::situation::ToggleSituation;
use waymark_branch::{
    BranchTemplateConfig, BranchTemplateIterator, TemplateFlags, TemplateInstruction,
};
use waymark_model::context::NullProcessor;
use waymark_model::{GeneratorContext, Instruction, ProgramItem};

fn config(delay_slot: bool, length: usize, branches: usize, max_exec: usize) -> BranchTemplateConfig {
    BranchTemplateConfig {
        delay_slot,
        min_length: length,
        max_length: length,
        min_branch_number: branches,
        max_branch_number: branches,
        max_branch_execution: max_exec,
        flags: TemplateFlags::default(),
        seed: 42,
    }
}

fn branch_instruction(name: &str, conditional: bool) -> TemplateInstruction {
    TemplateInstruction::with_situation(
        Instruction::branch(name, "branch", conditional),
        Box::new(ToggleSituation::new("flip")),
    )
}

fn block_instruction(name: &str) -> TemplateInstruction {
    TemplateInstruction::plain(Instruction::new(name, "block"))
}

fn instruction_names(program: &waymark_model::Program) -> Vec<String> {
    program
        .items()
        .iter()
        .map(|item| match item {
            ProgramItem::Instruction(instruction) => instruction.name.clone(),
            ProgramItem::Pseudo(text) => text.clone(),
        })
        .collect()
}

#[test]
fn test_single_unconditional_branch_end_to_end() {
    // Length 2, one unconditional branch, no delay slots: the only feasible
    // candidate is [BRANCH(label=1), BLOCK] — a backward loop could never
    // complete within the execution bound.
    let mut iterator = BranchTemplateIterator::new(
        config(false, 2, 1, 2),
        vec![branch_instruction("jump", false), block_instruction("add")],
    )
    .unwrap();

    let mut count = 0;
    iterator.init();
    while iterator.has_value() {
        let structure = iterator.structure();
        assert_eq!(structure.len(), 2);
        assert!(structure.get(0).is_branch());
        assert_eq!(structure.get(0).branch_label(), 1);
        assert!(structure.get(1).is_block());

        // Unconditional: exactly one execution, fictitious, empty coverage.
        let trace = structure.get(0).trace();
        assert_eq!(trace.decisions(), vec![true]);
        assert_eq!(structure.get(0).block_coverage(), Some(&BTreeSet::new()));

        count += 1;
        iterator.next();
        assert!(count < 100, "runaway enumeration");
    }

    assert_eq!(count, 1);
}

#[test]
fn test_single_conditional_branch_candidate_count() {
    // Worked out by hand for length 2, one conditional branch, max two
    // executions: six (position, label, trace) combinations are feasible.
    let mut iterator = BranchTemplateIterator::new(
        config(false, 2, 1, 2),
        vec![branch_instruction("beq", true), block_instruction("add")],
    )
    .unwrap();

    let mut seen = BTreeSet::new();
    iterator.init();
    while iterator.has_value() {
        let structure = iterator.structure();
        let branch_position = (0..structure.len())
            .find(|&i| structure.get(i).is_branch())
            .unwrap();
        let key = (
            branch_position,
            structure.get(branch_position).branch_label(),
            structure.get(branch_position).trace().decisions(),
        );
        assert!(seen.insert(key), "duplicate candidate");
        iterator.next();
        assert!(seen.len() < 100, "runaway enumeration");
    }

    assert_eq!(seen.len(), 6);
}

#[test]
fn test_construct_inserts_label_and_steps() {
    let mut iterator = BranchTemplateIterator::new(
        config(false, 2, 1, 2),
        vec![branch_instruction("beq", true), block_instruction("add")],
    )
    .unwrap();

    let processor = NullProcessor;
    let mut found_covered_candidate = false;

    iterator.init();
    while iterator.has_value() {
        let structure = iterator.structure().clone();
        let needs_step = structure
            .entries()
            .iter()
            .any(|entry| entry.is_branch() && !entry.trace().is_fictitious());

        let mut realized = iterator.program().unwrap();
        let mut context = GeneratorContext::new();
        assert!(iterator.construct(&mut realized, &processor, &mut context));

        let names = instruction_names(&realized.program);
        // Every candidate gets its jump-target label.
        assert!(names.iter().any(|name| name.ends_with(':')));

        if needs_step {
            found_covered_candidate = true;
            // The covered block carries the condition-mutating step.
            assert!(names.contains(&"flip".to_string()));
            // [BLOCK, BRANCH(label=0)]: the step lands in front of the
            // covered block, after the jump-target label.
            assert_eq!(names, vec!["L0:", "flip", "add", "beq"]);
        }

        iterator.next();
    }

    assert!(found_covered_candidate);
}

#[test]
fn test_delay_slot_structures_interleave_slots() {
    let mut iterator = BranchTemplateIterator::new(
        config(true, 2, 1, 2),
        vec![
            branch_instruction("beq", true),
            block_instruction("add"),
            block_instruction("mul"),
        ],
    )
    .unwrap();

    iterator.init();
    assert!(iterator.has_value());

    let mut saw_slot = false;
    let mut count = 0;
    while iterator.has_value() {
        let structure = iterator.structure();
        // One branch plus its slot extends the structure.
        assert_eq!(structure.len(), 3);
        for i in 0..structure.len() {
            if structure.get(i).is_branch() {
                assert!(structure.get(i + 1).is_slot());
                saw_slot = true;
            }
        }
        count += 1;
        iterator.next();
        assert!(count < 1000, "runaway enumeration");
    }

    assert!(saw_slot);
}

#[test]
fn test_invalid_configs_are_rejected() {
    let instructions = vec![branch_instruction("beq", true), block_instruction("add")];

    let zero_length = BranchTemplateConfig {
        min_length: 0,
        ..config(false, 2, 1, 2)
    };
    assert!(BranchTemplateIterator::new(zero_length, instructions.clone()).is_err());

    let inverted = BranchTemplateConfig {
        min_length: 3,
        max_length: 2,
        ..config(false, 2, 1, 2)
    };
    assert!(BranchTemplateIterator::new(inverted, instructions.clone()).is_err());

    let too_many_branches = BranchTemplateConfig {
        min_branch_number: 3,
        max_branch_number: 3,
        ..config(false, 2, 1, 2)
    };
    assert!(BranchTemplateIterator::new(too_many_branches, instructions).is_err());
}

#[test]
fn test_branch_without_situation_is_structural_error() {
    let result = BranchTemplateIterator::new(
        config(false, 2, 1, 2),
        vec![
            TemplateInstruction::plain(Instruction::branch("beq", "branch", true)),
            block_instruction("add"),
        ],
    );
    assert!(result.is_err());
}

#[test]
fn test_mixed_conditionality_is_structural_error() {
    let result = BranchTemplateIterator::new(
        config(false, 2, 1, 2),
        vec![
            branch_instruction("beq", true),
            branch_instruction("jump", false),
            block_instruction("add"),
        ],
    );
    assert!(result.is_err());
}

#[test]
fn test_same_seed_reproduces_programs() {
    let instructions = vec![
        branch_instruction("beq", true),
        block_instruction("add"),
        block_instruction("mul"),
    ];

    let run = || {
        let mut iterator =
            BranchTemplateIterator::new(config(false, 3, 1, 2), instructions.clone()).unwrap();
        let mut names = Vec::new();
        iterator.init();
        while iterator.has_value() {
            let realized = iterator.program().unwrap();
            names.push(instruction_names(&realized.program));
            iterator.next();
        }
        names
    };

    assert_eq!(run(), run());
}
