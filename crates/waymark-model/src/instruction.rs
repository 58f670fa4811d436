/// One abstract instruction of the target instruction set.
///
/// Only the properties the generators reason about are modeled; operand
/// encoding and semantics stay with the external processor model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Mnemonic or other display name.
    pub name: String,
    /// Equivalence class the instruction belongs to. Instructions of one
    /// class are interchangeable wherever the class is referenced.
    pub equivalence_class: String,
    /// Whether this is a branch instruction.
    pub branch: bool,
    /// Whether the branch is conditional (meaningless for non-branches).
    pub conditional_branch: bool,
    /// Whether executing the instruction can raise an exception.
    pub can_throw_exception: bool,
    /// Whether a taken branch nullifies its delay slot.
    pub nullifies_delay_slot: bool,
}

impl Instruction {
    pub fn new(name: impl Into<String>, equivalence_class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            equivalence_class: equivalence_class.into(),
            branch: false,
            conditional_branch: false,
            can_throw_exception: false,
            nullifies_delay_slot: false,
        }
    }

    pub fn branch(
        name: impl Into<String>,
        equivalence_class: impl Into<String>,
        conditional: bool,
    ) -> Self {
        Self {
            branch: true,
            conditional_branch: conditional,
            ..Self::new(name, equivalence_class)
        }
    }

    pub fn with_exception(mut self) -> Self {
        self.can_throw_exception = true;
        self
    }

    pub fn with_nullified_slot(mut self) -> Self {
        self.nullifies_delay_slot = true;
        self
    }
}

/// One item of a program: a real instruction or a pseudo item such as a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramItem {
    Instruction(Instruction),
    Pseudo(String),
}

impl ProgramItem {
    pub fn is_instruction(&self) -> bool {
        matches!(self, ProgramItem::Instruction(_))
    }

    pub fn as_instruction(&self) -> Option<&Instruction> {
        match self {
            ProgramItem::Instruction(instruction) => Some(instruction),
            ProgramItem::Pseudo(_) => None,
        }
    }
}

/// Ordered, mutable sequence of program items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    items: Vec<ProgramItem>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ProgramItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of real instructions (pseudo items excluded).
    pub fn instruction_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_instruction()).count()
    }

    pub fn get(&self, position: usize) -> &ProgramItem {
        &self.items[position]
    }

    pub fn append_instruction(&mut self, instruction: Instruction) {
        self.items.push(ProgramItem::Instruction(instruction));
    }

    pub fn append_pseudo(&mut self, text: impl Into<String>) {
        self.items.push(ProgramItem::Pseudo(text.into()));
    }

    /// Appends all items of `other`.
    pub fn append(&mut self, other: Program) {
        self.items.extend(other.items);
    }

    /// Inserts all items of `other` before `position`.
    pub fn insert(&mut self, other: Program, position: usize) {
        self.items.splice(position..position, other.items);
    }

    /// Inserts a single item before `position`.
    pub fn insert_item(&mut self, item: ProgramItem, position: usize) {
        self.items.insert(position, item);
    }

    /// Removes and returns the item at `position`.
    pub fn remove(&mut self, position: usize) -> ProgramItem {
        self.items.remove(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_count_skips_pseudo_items() {
        let mut program = Program::new();
        program.append_pseudo("start:");
        program.append_instruction(Instruction::new("add", "alu"));
        program.append_instruction(Instruction::new("sub", "alu"));
        assert_eq!(program.len(), 3);
        assert_eq!(program.instruction_count(), 2);
    }

    #[test]
    fn test_insert_splices_before_position() {
        let mut program = Program::new();
        program.append_instruction(Instruction::new("a", "alu"));
        program.append_instruction(Instruction::new("b", "alu"));

        let mut inserted = Program::new();
        inserted.append_pseudo("L0:");
        inserted.append_instruction(Instruction::new("x", "alu"));

        program.insert(inserted, 1);

        assert_eq!(program.len(), 4);
        assert_eq!(program.get(1), &ProgramItem::Pseudo("L0:".to_string()));
        assert_eq!(
            program.get(3).as_instruction().map(|i| i.name.as_str()),
            Some("b")
        );
    }

    #[test]
    fn test_remove_returns_item() {
        let mut program = Program::new();
        program.append_instruction(Instruction::new("a", "alu"));
        let removed = program.remove(0);
        assert!(removed.is_instruction());
        assert!(program.is_empty());
    }
}
