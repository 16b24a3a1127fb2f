//! Parameter vectors and search ranges.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from parameter name to value.
///
/// Ordered by name, so comparing two vectors is lexicographic over
/// `(name, value)` pairs. Optimizers rely on this as their tie-break.
pub type ParameterVector = BTreeMap<String, Decimal>;

/// Read a parameter as `f64`.
pub fn param_f64(params: &ParameterVector, name: &str) -> Option<f64> {
    params.get(name).and_then(|v| v.to_f64())
}

/// Read a parameter as a non-negative integer, rounding to nearest.
pub fn param_usize(params: &ParameterVector, name: &str) -> Option<usize> {
    params
        .get(name)
        .and_then(|v| v.round().to_u64())
        .map(|v| v as usize)
}

/// Render a vector as `a=1, b=2` for logs.
pub fn format_params(params: &ParameterVector) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v.normalize()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Inclusive `{min, max, step}` range for one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: Decimal,
    pub max: Decimal,
    pub step: Decimal,
}

impl ParameterRange {
    pub fn new(min: Decimal, max: Decimal, step: Decimal) -> Self {
        Self { min, max, step }
    }

    /// A range with a positive step and `min <= max`.
    pub fn is_valid(&self) -> bool {
        self.step > Decimal::ZERO && self.min <= self.max
    }

    /// Number of values, `floor((max - min) / step) + 1`, or 0 when invalid.
    pub fn count(&self) -> usize {
        if !self.is_valid() {
            return 0;
        }
        // Spans too wide for usize saturate instead of reading as empty
        self.max
            .checked_sub(self.min)
            .and_then(|span| span.checked_div(self.step))
            .and_then(|steps| steps.floor().to_usize())
            .map_or(usize::MAX, |n| n.saturating_add(1))
    }

    /// The `index`-th value, `min + step * index`.
    pub fn value_at(&self, index: usize) -> Decimal {
        (self.min + self.step * Decimal::from(index as u64)).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_count_is_exact_for_decimal_steps() {
        let range = ParameterRange::new(Decimal::new(1, 2), Decimal::new(3, 2), Decimal::new(1, 2));
        assert_eq!(range.count(), 3);
        assert_eq!(range.value_at(0), Decimal::new(1, 2));
        assert_eq!(range.value_at(2), Decimal::new(3, 2));
    }

    #[test]
    fn test_value_at_steps_from_min() {
        let range = ParameterRange::new(Decimal::new(5, 0), Decimal::new(40, 0), Decimal::new(5, 0));
        assert_eq!(range.count(), 8);
        assert_eq!(range.value_at(3), Decimal::new(20, 0));
        assert_eq!(range.value_at(7), Decimal::new(40, 0));
    }

    #[test]
    fn test_huge_range_saturates() {
        let range = ParameterRange::new(Decimal::MIN, Decimal::MAX, Decimal::new(1, 28));
        assert!(range.is_valid());
        assert_eq!(range.count(), usize::MAX);
    }

    #[test]
    fn test_range_partial_last_step() {
        // 0..1 step 0.3 -> 0, 0.3, 0.6, 0.9
        let range = ParameterRange::new(Decimal::ZERO, Decimal::ONE, Decimal::new(3, 1));
        assert_eq!(range.count(), 4);
    }

    #[test]
    fn test_invalid_ranges_are_empty() {
        let inverted = ParameterRange::new(Decimal::new(5, 2), Decimal::new(1, 2), Decimal::new(1, 2));
        assert_eq!(inverted.count(), 0);

        let zero_step = ParameterRange::new(Decimal::ZERO, Decimal::ONE, Decimal::ZERO);
        assert!(!zero_step.is_valid());
        assert_eq!(zero_step.count(), 0);
    }

    #[test]
    fn test_parameter_vector_ordering() {
        let mut a = ParameterVector::new();
        a.insert("fast".to_string(), Decimal::new(5, 0));
        a.insert("slow".to_string(), Decimal::new(20, 0));
        let mut b = a.clone();
        b.insert("slow".to_string(), Decimal::new(30, 0));
        assert!(a < b);
        assert_eq!(param_usize(&a, "slow"), Some(20));
        assert_eq!(format_params(&a), "fast=5, slow=20");
    }
}
