//! Search configuration.

use backtest_core::ParameterRange;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::objective::Objective;

/// Settings for the evolutionary search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub generations: usize,
    /// Per-gene probability of taking the second parent's value.
    pub crossover_rate: f64,
    /// Per-gene probability of re-sampling from the allowed values.
    pub mutation_rate: f64,
    pub tournament_size: usize,
    /// Share of each generation carried over unchanged.
    pub elite_fraction: f64,
    /// Seed for the search's random source.
    pub seed: u64,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 20,
            crossover_rate: 0.7,
            mutation_rate: 0.1,
            tournament_size: 3,
            elite_fraction: 0.1,
            seed: 42,
        }
    }
}

impl GeneticConfig {
    /// Elites kept per generation: 10% of the population, at least one.
    pub fn elite_count(&self) -> usize {
        ((self.population_size as f64 * self.elite_fraction).round() as usize)
            .max(1)
            .min(self.population_size)
    }
}

/// What to search and how to rank it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Ranges keyed by parameter name.
    pub parameters: BTreeMap<String, ParameterRange>,
    pub objective: Objective,
    /// Run the genetic search instead of the full grid when set.
    pub genetic: Option<GeneticConfig>,
    /// Worker threads, defaults to available cores.
    pub workers: Option<usize>,
    /// Evaluate at most this many grid combinations.
    pub max_combinations: Option<usize>,
}

impl OptimizationConfig {
    pub fn new(objective: Objective) -> Self {
        Self {
            objective,
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, name: &str, min: Decimal, max: Decimal, step: Decimal) -> Self {
        self.parameters
            .insert(name.to_string(), ParameterRange::new(min, max, step));
        self
    }

    pub fn with_genetic(mut self, genetic: GeneticConfig) -> Self {
        self.genetic = Some(genetic);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_max_combinations(mut self, max: usize) -> Self {
        self.max_combinations = Some(max);
        self
    }
}
