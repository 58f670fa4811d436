use serde::{Deserialize, Serialize};

/// A named bit-vector variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntegerVariable {
    pub name: String,
    pub width: u32,
}

impl IntegerVariable {
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }
}

/// An inclusive bit slice of a variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntegerField {
    pub variable: IntegerVariable,
    pub lo: u32,
    pub hi: u32,
}

impl IntegerField {
    pub fn new(variable: IntegerVariable, lo: u32, hi: u32) -> Self {
        Self { variable, lo, hi }
    }

    /// The whole variable as a single field.
    pub fn whole(variable: IntegerVariable) -> Self {
        let hi = variable.width.saturating_sub(1);
        Self::new(variable, 0, hi)
    }

    pub fn width(&self) -> u32 {
        self.hi - self.lo + 1
    }

    /// Extracts this field from a value of the variable.
    pub fn extract(&self, value: u64) -> u64 {
        (value >> self.lo) & bit_mask(self.width())
    }
}

/// Mask with the `width` low bits set.
pub fn bit_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Concatenation of bit fields, low bits first. The empty expression
/// evaluates to 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MmuExpression {
    terms: Vec<IntegerField>,
}

impl MmuExpression {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn field(field: IntegerField) -> Self {
        Self { terms: vec![field] }
    }

    pub fn var(variable: IntegerVariable) -> Self {
        Self::field(IntegerField::whole(variable))
    }

    pub fn cat(terms: Vec<IntegerField>) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &[IntegerField] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Total width of the concatenation.
    pub fn width(&self) -> u32 {
        self.terms.iter().map(IntegerField::width).sum()
    }
}

/// Evaluation of bit-field expressions over variable assignments.
pub struct MmuCalculator;

impl MmuCalculator {
    /// Evaluates `expression`, reading every variable through `lookup`.
    pub fn eval<F>(expression: &MmuExpression, lookup: F) -> u64
    where
        F: Fn(&IntegerVariable) -> u64,
    {
        let mut result = 0u64;
        let mut shift = 0u32;

        for term in expression.terms() {
            let value = term.extract(lookup(&term.variable));
            if shift < 64 {
                result |= value << shift;
            }
            shift += term.width();
        }

        result
    }

    /// Evaluates an expression over a single variable.
    pub fn eval_one(expression: &MmuExpression, variable: &IntegerVariable, value: u64) -> u64 {
        Self::eval(expression, |v| if v == variable { value } else { 0 })
    }
}

/// An inclusive bit-position range.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct IntegerRange {
    pub lo: u32,
    pub hi: u32,
}

impl IntegerRange {
    pub fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }

    pub fn width(&self) -> u32 {
        self.hi - self.lo + 1
    }

    pub fn contains(&self, bit: u32) -> bool {
        self.lo <= bit && bit <= self.hi
    }

    /// Splits a set of (possibly overlapping) ranges into the disjoint
    /// atomic sub-ranges bounded by all of their endpoints.
    pub fn divide(ranges: &[IntegerRange]) -> Vec<IntegerRange> {
        let mut cuts = std::collections::BTreeSet::new();
        for range in ranges {
            cuts.insert(range.lo);
            cuts.insert(range.hi + 1);
        }

        let cuts: Vec<u32> = cuts.into_iter().collect();
        let mut result = Vec::new();

        for pair in cuts.windows(2) {
            let (lo, hi) = (pair[0], pair[1] - 1);
            if ranges.iter().any(|range| range.contains(lo)) {
                result.push(IntegerRange::new(lo, hi));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> IntegerVariable {
        IntegerVariable::new("va", 32)
    }

    #[test]
    fn test_field_extract() {
        let field = IntegerField::new(address(), 4, 7);
        assert_eq!(field.extract(0xffu64), 0xf);
        assert_eq!(field.extract(0x30u64), 0x3);
    }

    #[test]
    fn test_eval_concatenation_is_low_bits_first() {
        // tag = va[11:8] ++ va[3:0]  (va[3:0] are the low bits of the tag)
        let expression = MmuExpression::cat(vec![
            IntegerField::new(address(), 0, 3),
            IntegerField::new(address(), 8, 11),
        ]);

        let value = MmuCalculator::eval_one(&expression, &address(), 0x0a5f);
        assert_eq!(value, 0xaf);
    }

    #[test]
    fn test_empty_expression_evaluates_to_zero() {
        assert_eq!(
            MmuCalculator::eval_one(&MmuExpression::empty(), &address(), 0xdead),
            0
        );
    }

    #[test]
    fn test_eval_ignores_other_variables() {
        let other = IntegerVariable::new("pa", 32);
        let expression = MmuExpression::var(other);
        assert_eq!(MmuCalculator::eval_one(&expression, &address(), 0xff), 0);
    }

    #[test]
    fn test_divide_splits_overlapping_ranges() {
        let ranges = vec![
            IntegerRange::new(0, 31),
            IntegerRange::new(12, 31),
            IntegerRange::new(5, 11),
        ];
        let atoms = IntegerRange::divide(&ranges);
        assert_eq!(
            atoms,
            vec![
                IntegerRange::new(0, 4),
                IntegerRange::new(5, 11),
                IntegerRange::new(12, 31),
            ]
        );
    }

    #[test]
    fn test_divide_keeps_gaps_out() {
        let ranges = vec![IntegerRange::new(0, 3), IntegerRange::new(8, 11)];
        let atoms = IntegerRange::divide(&ranges);
        assert_eq!(
            atoms,
            vec![IntegerRange::new(0, 3), IntegerRange::new(8, 11)]
        );
    }

    #[test]
    fn test_bit_mask_saturates_at_64() {
        assert_eq!(bit_mask(64), u64::MAX);
        assert_eq!(bit_mask(3), 0b111);
    }
}
