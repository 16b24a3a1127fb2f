//! Sensitivity diagnostics over evaluated parameter vectors.

use backtester::analyzer::{mean, std_dev};

use crate::outcome::OptimizationResult;

/// Spread between the best and worst fitness relative to the best.
///
/// Higher means results depend more on the parameter choice.
pub fn overfitting_score(results: &[OptimizationResult]) -> f64 {
    let fitness = results.iter().map(|r| r.fitness);
    let best = fitness.clone().fold(f64::NEG_INFINITY, f64::max);
    let worst = fitness.fold(f64::INFINITY, f64::min);

    if !best.is_finite() || !worst.is_finite() || best == 0.0 {
        return 0.0;
    }
    let score = (best - worst) / best.abs();
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// `1 / (1 + CV)` over the top decile of fitness values.
///
/// Higher means the best region of the search space is more stable.
pub fn robustness_score(results: &[OptimizationResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }

    let mut fitness: Vec<f64> = results.iter().map(|r| r.fitness).collect();
    fitness.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top = ((fitness.len() as f64 * 0.1).ceil() as usize).max(1);
    let top_scores = &fitness[..top];

    stability(top_scores)
}

/// `1 / (1 + CV)`, 1 for constant values around zero and 0 when the mean is
/// zero but values vary.
pub fn stability(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let sd = std_dev(values);
    if m.abs() < f64::EPSILON {
        return if sd == 0.0 { 1.0 } else { 0.0 };
    }
    let score = 1.0 / (1.0 + sd / m.abs());
    if score.is_finite() {
        score
    } else {
        0.0
    }
}
