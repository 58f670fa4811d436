use crate::instruction::Instruction;

/// A group of interchangeable instructions.
#[derive(Debug, Clone, Default)]
pub struct EquivalenceClass {
    name: String,
    instructions: Vec<Instruction>,
}

impl EquivalenceClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn get(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

/// Instructions grouped by equivalence class, in registration order.
///
/// Class indices are stable across lookups; a class registered without
/// instructions stays present (and empty).
#[derive(Debug, Clone, Default)]
pub struct InstructionFactorization {
    classes: Vec<EquivalenceClass>,
}

impl InstructionFactorization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.classes.clear();
    }

    /// Registers an instruction under its class, creating the class on first
    /// use.
    pub fn register(&mut self, instruction: Instruction) {
        let class = self.class_entry(instruction.equivalence_class.clone());
        class.add(instruction);
    }

    /// Registers an empty class so its index stays aligned with a sibling
    /// factorization.
    pub fn register_class(&mut self, name: impl Into<String>) {
        self.class_entry(name.into());
    }

    fn class_entry(&mut self, name: String) -> &mut EquivalenceClass {
        if let Some(position) = self.classes.iter().position(|c| c.name() == name) {
            &mut self.classes[position]
        } else {
            self.classes.push(EquivalenceClass::new(name));
            self.classes.last_mut().unwrap()
        }
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn class(&self, index: usize) -> &EquivalenceClass {
        &self.classes[index]
    }

    pub fn instruction_count(&self, class_index: usize) -> usize {
        self.classes[class_index].len()
    }

    pub fn instruction(&self, class_index: usize, index: usize) -> &Instruction {
        self.classes[class_index].get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_fixes_class_indices() {
        let mut factorization = InstructionFactorization::new();
        factorization.register(Instruction::new("add", "alu"));
        factorization.register(Instruction::new("lw", "mem"));
        factorization.register(Instruction::new("sub", "alu"));

        assert_eq!(factorization.class_count(), 2);
        assert_eq!(factorization.class(0).name(), "alu");
        assert_eq!(factorization.instruction_count(0), 2);
        assert_eq!(factorization.instruction(1, 0).name, "lw");
    }

    #[test]
    fn test_register_class_keeps_empty_class() {
        let mut factorization = InstructionFactorization::new();
        factorization.register_class("fpu");
        assert_eq!(factorization.class_count(), 1);
        assert!(factorization.class(0).is_empty());
    }
}
