use crate::execution::BranchExecution;

/// Ordered sequence of executions of one branch site along a control path.
///
/// Grown by one execution per firing while a trace candidate is prolonged and
/// shrunk again on backtracking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchTrace {
    executions: Vec<BranchExecution>,
}

impl BranchTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn get(&self, index: usize) -> &BranchExecution {
        &self.executions[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut BranchExecution {
        &mut self.executions[index]
    }

    pub fn last(&self) -> Option<&BranchExecution> {
        self.executions.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut BranchExecution> {
        self.executions.last_mut()
    }

    /// Appends a fresh execution for a branch of the given conditionality.
    pub fn add_execution(&mut self, conditional: bool) {
        self.executions.push(BranchExecution::new(conditional));
    }

    pub fn remove_last_execution(&mut self) {
        self.executions.pop();
    }

    pub fn clear(&mut self) {
        self.executions.clear();
    }

    pub fn executions(&self) -> &[BranchExecution] {
        &self.executions
    }

    /// Number of adjacent decision changes along the trace.
    pub fn change_count(&self) -> usize {
        self.executions
            .windows(2)
            .filter(|pair| pair[0].condition() != pair[1].condition())
            .count()
    }

    /// A fictitious trace never changes its decision.
    pub fn is_fictitious(&self) -> bool {
        self.change_count() == 0
    }

    /// A simple trace changes its decision at most once.
    pub fn is_simple(&self) -> bool {
        self.change_count() <= 1
    }

    /// Decisions of all executions in order, mostly for tests and display.
    pub fn decisions(&self) -> Vec<bool> {
        self.executions.iter().map(|e| e.condition()).collect()
    }
}
