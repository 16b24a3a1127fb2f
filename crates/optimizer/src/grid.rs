//! Exhaustive grid search.

use backtest_core::{ParameterRange, ParameterVector};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

use crate::control::{OptimizationStatus, SearchControl};
use crate::diagnostics::{overfitting_score, robustness_score};
use crate::evaluator::{Evaluation, Evaluator};
use crate::objective::rank;
use crate::outcome::OptimizationOutcome;

/// Number of grid combinations, 0 when any range is invalid.
pub fn count_combinations(ranges: &BTreeMap<String, ParameterRange>) -> usize {
    if ranges.is_empty() {
        return 0;
    }
    ranges
        .values()
        .map(ParameterRange::count)
        .try_fold(1usize, |acc, n| (n > 0).then(|| acc.saturating_mul(n)))
        .unwrap_or(0)
}

/// Combinations enumerated when no explicit cap is configured.
pub const DEFAULT_MAX_COMBINATIONS: usize = 100_000;

/// Cartesian product of all ranges in parameter-name order.
///
/// Returns nothing when any range is invalid. Enumeration stops after
/// `limit` vectors, or [`DEFAULT_MAX_COMBINATIONS`] when unset; the flag
/// reports whether anything was left out. Values are computed per index,
/// so only the emitted vectors are allocated.
pub fn generate_combinations(
    ranges: &BTreeMap<String, ParameterRange>,
    limit: Option<usize>,
) -> (Vec<ParameterVector>, bool) {
    let total = count_combinations(ranges);
    if total == 0 {
        return (Vec::new(), false);
    }

    let axes: Vec<(&String, &ParameterRange, usize)> =
        ranges.iter().map(|(name, r)| (name, r, r.count())).collect();
    let take = limit.unwrap_or(DEFAULT_MAX_COMBINATIONS).min(total);
    let mut combinations = Vec::with_capacity(take);
    let mut cursor = vec![0usize; axes.len()];

    while combinations.len() < take {
        combinations.push(
            axes.iter()
                .zip(&cursor)
                .map(|((name, range, _), &i)| ((*name).clone(), range.value_at(i)))
                .collect(),
        );

        // Odometer increment, last parameter fastest
        let mut axis = axes.len();
        loop {
            if axis == 0 {
                return (combinations, take < total);
            }
            axis -= 1;
            cursor[axis] += 1;
            if cursor[axis] < axes[axis].2 {
                break;
            }
            cursor[axis] = 0;
        }
    }

    (combinations, take < total)
}

/// Evaluate every combination and rank the results.
pub fn grid_search(
    evaluator: &Evaluator<'_>,
    ranges: &BTreeMap<String, ParameterRange>,
    max_combinations: Option<usize>,
    control: &SearchControl,
) -> OptimizationOutcome {
    let started = Instant::now();
    let objective = evaluator.objective();

    if evaluator.candles().len() < 2 {
        warn!(candles = evaluator.candles().len(), "Not enough data for grid search");
        return OptimizationOutcome::empty(objective, OptimizationStatus::InsufficientData);
    }

    let (combinations, truncated) = generate_combinations(ranges, max_combinations);
    if combinations.is_empty() {
        warn!(parameters = ranges.len(), "No valid parameter combinations");
        return OptimizationOutcome::empty(objective, OptimizationStatus::NoValidCombinations);
    }
    if truncated {
        warn!(
            total = count_combinations(ranges),
            evaluated = combinations.len(),
            "Grid truncated to max_combinations"
        );
    }

    info!(
        combinations = combinations.len(),
        objective = %objective,
        "Starting grid search"
    );

    let batch = evaluator.evaluate_batch(&combinations, control, "grid");
    let mut results = Vec::new();
    let mut failed = 0;
    for evaluation in batch.evaluations {
        match evaluation {
            Evaluation::Scored(result) => results.push(*result),
            Evaluation::Failed => failed += 1,
            Evaluation::NotRun => {}
        }
    }
    rank(&mut results);

    let status = match batch.stopped {
        Some(status) => status,
        None if results.is_empty() => OptimizationStatus::NoValidCombinations,
        None => OptimizationStatus::Completed,
    };

    let outcome = OptimizationOutcome {
        objective,
        evaluated: results.len(),
        failed,
        overfitting_score: overfitting_score(&results),
        robustness_score: robustness_score(&results),
        convergence: Vec::new(),
        history: Vec::new(),
        status,
        elapsed_ms: started.elapsed().as_millis() as u64,
        truncated,
        results,
    };

    info!(
        status = ?outcome.status,
        evaluated = outcome.evaluated,
        failed = outcome.failed,
        best_score = outcome.best().map(|r| r.score).unwrap_or(0.0),
        elapsed_ms = outcome.elapsed_ms,
        "Grid search completed"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn range(min: i64, max: i64, step: i64) -> ParameterRange {
        ParameterRange::new(Decimal::new(min, 2), Decimal::new(max, 2), Decimal::new(step, 2))
    }

    #[test]
    fn test_nine_combinations() {
        let mut ranges = BTreeMap::new();
        ranges.insert("a".to_string(), range(1, 3, 1));
        ranges.insert("b".to_string(), range(1, 3, 1));

        assert_eq!(count_combinations(&ranges), 9);
        let (combos, truncated) = generate_combinations(&ranges, None);
        assert_eq!(combos.len(), 9);
        assert!(!truncated);
        assert_eq!(combos[0]["a"], Decimal::new(1, 2));
        assert_eq!(combos[1]["b"], Decimal::new(2, 2));
        assert_eq!(combos[8]["a"], Decimal::new(3, 2));

        let mut sorted = combos.clone();
        sorted.sort();
        assert_eq!(sorted, combos);
    }

    #[test]
    fn test_inverted_range_yields_nothing() {
        let mut ranges = BTreeMap::new();
        ranges.insert("a".to_string(), range(5, 1, 1));
        ranges.insert("b".to_string(), range(1, 3, 1));

        assert_eq!(count_combinations(&ranges), 0);
        assert!(generate_combinations(&ranges, None).0.is_empty());
    }

    #[test]
    fn test_limit_truncates() {
        let mut ranges = BTreeMap::new();
        ranges.insert("a".to_string(), range(1, 10, 1));
        ranges.insert("b".to_string(), range(1, 10, 1));

        let (combos, truncated) = generate_combinations(&ranges, Some(15));
        assert_eq!(combos.len(), 15);
        assert!(truncated);
    }

    #[test]
    fn test_huge_grid_is_capped_by_default() {
        let mut ranges = BTreeMap::new();
        ranges.insert(
            "a".to_string(),
            ParameterRange::new(Decimal::ZERO, Decimal::new(1_000_000, 0), Decimal::ONE),
        );
        ranges.insert(
            "b".to_string(),
            ParameterRange::new(Decimal::MIN, Decimal::MAX, Decimal::new(1, 28)),
        );

        assert_eq!(count_combinations(&ranges), usize::MAX);
        let (combos, truncated) = generate_combinations(&ranges, None);
        assert_eq!(combos.len(), DEFAULT_MAX_COMBINATIONS);
        assert!(truncated);
        assert_eq!(combos[0]["a"], Decimal::ZERO);
        assert_eq!(combos[0]["b"], Decimal::MIN);
    }

    #[test]
    fn test_empty_ranges() {
        assert_eq!(count_combinations(&BTreeMap::new()), 0);
    }
}
