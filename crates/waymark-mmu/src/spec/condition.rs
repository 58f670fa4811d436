use std::fmt;
use std::sync::Arc;

use crate::access::MemoryAccess;

use super::expr::{IntegerVariable, MmuCalculator, MmuExpression};

/// An atomic declarative constraint over bit-field expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionKind {
    /// `lhs == rhs`.
    EqExprExpr { lhs: MmuExpression, rhs: MmuExpression },
    /// Both halves of one expression are equal (e.g. even/odd page pair).
    EqSameExpr { expr: MmuExpression },
    /// `expr == constant`.
    EqExprConst { expr: MmuExpression, value: u64 },
    /// `expr` lies in an inclusive range.
    InRange { expr: MmuExpression, min: u64, max: u64 },
    /// `expr` equals the tag just evicted from the buffer; only the solver
    /// can decide this one.
    EqReplaced { expr: MmuExpression },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmuConditionAtom {
    pub kind: ConditionKind,
    pub negated: bool,
}

impl MmuConditionAtom {
    pub fn eq_expr(lhs: MmuExpression, rhs: MmuExpression) -> Self {
        Self {
            kind: ConditionKind::EqExprExpr { lhs, rhs },
            negated: false,
        }
    }

    pub fn eq_const(expr: MmuExpression, value: u64) -> Self {
        Self {
            kind: ConditionKind::EqExprConst { expr, value },
            negated: false,
        }
    }

    pub fn eq_same(expr: MmuExpression) -> Self {
        Self {
            kind: ConditionKind::EqSameExpr { expr },
            negated: false,
        }
    }

    pub fn in_range(expr: MmuExpression, min: u64, max: u64) -> Self {
        Self {
            kind: ConditionKind::InRange { expr, min, max },
            negated: false,
        }
    }

    pub fn eq_replaced(expr: MmuExpression) -> Self {
        Self {
            kind: ConditionKind::EqReplaced { expr },
            negated: false,
        }
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Evaluates the atom under a variable assignment. `None` when the atom
    /// cannot be decided statically (replaced-tag constraints).
    pub fn evaluate<F>(&self, lookup: &F) -> Option<bool>
    where
        F: Fn(&IntegerVariable) -> u64,
    {
        let truth = match &self.kind {
            ConditionKind::EqExprExpr { lhs, rhs } => {
                MmuCalculator::eval(lhs, lookup) == MmuCalculator::eval(rhs, lookup)
            }
            ConditionKind::EqSameExpr { expr } => {
                let value = MmuCalculator::eval(expr, lookup);
                let half = expr.width() / 2;
                let mask = super::expr::bit_mask(half);
                (value & mask) == ((value >> half) & mask)
            }
            ConditionKind::EqExprConst { expr, value } => {
                MmuCalculator::eval(expr, lookup) == *value
            }
            ConditionKind::InRange { expr, min, max } => {
                let value = MmuCalculator::eval(expr, lookup);
                *min <= value && value <= *max
            }
            ConditionKind::EqReplaced { .. } => return None,
        };

        Some(truth != self.negated)
    }
}

/// A conjunction of atomic conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MmuCondition {
    atoms: Vec<MmuConditionAtom>,
}

impl MmuCondition {
    pub fn and(atoms: Vec<MmuConditionAtom>) -> Self {
        Self { atoms }
    }

    pub fn atoms(&self) -> &[MmuConditionAtom] {
        &self.atoms
    }

    /// `None` when any atom is undecidable and no decidable atom is false.
    pub fn evaluate<F>(&self, lookup: &F) -> Option<bool>
    where
        F: Fn(&IntegerVariable) -> u64,
    {
        let mut undecided = false;
        for atom in &self.atoms {
            match atom.evaluate(lookup) {
                Some(false) => return Some(false),
                Some(true) => {}
                None => undecided = true,
            }
        }
        if undecided {
            None
        } else {
            Some(true)
        }
    }
}

/// Access predicate of a buffer view.
type GuardPredicate = Arc<dyn Fn(&MemoryAccess) -> bool + Send + Sync>;

/// Guard of a buffer: a declarative condition, a predicate over the access,
/// or both. An absent guard always passes.
#[derive(Clone, Default)]
pub struct MmuGuard {
    pub condition: Option<MmuCondition>,
    predicate: Option<GuardPredicate>,
}

impl MmuGuard {
    pub fn condition(condition: MmuCondition) -> Self {
        Self {
            condition: Some(condition),
            predicate: None,
        }
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&MemoryAccess) -> bool + Send + Sync + 'static,
    {
        Self {
            condition: None,
            predicate: Some(Arc::new(predicate)),
        }
    }

    /// Checks the guard against an access. The declarative condition is
    /// consulted only when it is statically decidable.
    pub fn check<F>(&self, access: &MemoryAccess, lookup: &F) -> bool
    where
        F: Fn(&IntegerVariable) -> u64,
    {
        if let Some(predicate) = &self.predicate {
            if !predicate(access) {
                return false;
            }
        }
        if let Some(condition) = &self.condition {
            if condition.evaluate(lookup) == Some(false) {
                return false;
            }
        }
        true
    }
}

impl fmt::Debug for MmuGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmuGuard")
            .field("condition", &self.condition)
            .field("predicate", &self.predicate.as_ref().map(|_| ".."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::expr::{IntegerField, IntegerVariable};

    fn va() -> IntegerVariable {
        IntegerVariable::new("va", 32)
    }

    fn high_bits() -> MmuExpression {
        MmuExpression::field(IntegerField::new(va(), 28, 31))
    }

    #[test]
    fn test_eq_const_atom() {
        let atom = MmuConditionAtom::eq_const(high_bits(), 0x8);
        let lookup = |_: &IntegerVariable| 0x8000_0000u64;
        assert_eq!(atom.evaluate(&lookup), Some(true));

        let lookup = |_: &IntegerVariable| 0x4000_0000u64;
        assert_eq!(atom.evaluate(&lookup), Some(false));
    }

    #[test]
    fn test_negated_atom() {
        let atom = MmuConditionAtom::eq_const(high_bits(), 0x8).negate();
        let lookup = |_: &IntegerVariable| 0x8000_0000u64;
        assert_eq!(atom.evaluate(&lookup), Some(false));
    }

    #[test]
    fn test_range_atom() {
        let atom = MmuConditionAtom::in_range(high_bits(), 0x8, 0xb);
        let lookup = |_: &IntegerVariable| 0xa000_0000u64;
        assert_eq!(atom.evaluate(&lookup), Some(true));
    }

    #[test]
    fn test_replaced_atom_is_undecidable() {
        let atom = MmuConditionAtom::eq_replaced(high_bits());
        let lookup = |_: &IntegerVariable| 0u64;
        assert_eq!(atom.evaluate(&lookup), None);

        let condition = MmuCondition::and(vec![atom]);
        assert_eq!(condition.evaluate(&lookup), None);
    }

    #[test]
    fn test_conjunction_short_circuits_on_false() {
        let condition = MmuCondition::and(vec![
            MmuConditionAtom::eq_const(high_bits(), 0x1),
            MmuConditionAtom::eq_replaced(high_bits()),
        ]);
        let lookup = |_: &IntegerVariable| 0u64;
        assert_eq!(condition.evaluate(&lookup), Some(false));
    }
}
