//! Cooperative cancellation, time budget and progress reporting for searches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How a search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    Completed,
    /// Stopped by the cancellation token. Results hold what finished.
    Cancelled,
    /// Stopped by the deadline. Results hold what finished.
    TimedOut,
    /// Every parameter range was invalid or every evaluation failed.
    NoValidCombinations,
    /// Too few candles to simulate.
    InsufficientData,
}

impl OptimizationStatus {
    /// Whether the search was stopped before finishing.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, OptimizationStatus::Cancelled | OptimizationStatus::TimedOut)
    }
}

/// Snapshot passed to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// Search stage, e.g. `grid`, `genetic` or `walk_forward`.
    pub stage: &'static str,
    pub completed: usize,
    pub total: usize,
    /// Best fitness so far, when known.
    pub best_fitness: Option<f64>,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Checked between evaluations so callers can stop a long search.
#[derive(Clone, Default)]
pub struct SearchControl {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    progress: Option<ProgressCallback>,
}

impl SearchControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an externally owned token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Stop starting new evaluations after `budget` from now.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// The status to stop with, or `None` to keep going.
    pub fn check(&self) -> Option<OptimizationStatus> {
        if self.cancellation.is_cancelled() {
            return Some(OptimizationStatus::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(OptimizationStatus::TimedOut),
            _ => None,
        }
    }

    pub fn report(&self, update: ProgressUpdate) {
        if let Some(callback) = &self.progress {
            callback(update);
        }
    }
}

impl fmt::Debug for SearchControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchControl")
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("deadline", &self.deadline)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cancellation() {
        let control = SearchControl::new();
        assert_eq!(control.check(), None);
        control.token().cancel();
        assert_eq!(control.check(), Some(OptimizationStatus::Cancelled));
        assert!(OptimizationStatus::Cancelled.is_interrupted());
    }

    #[test]
    fn test_expired_deadline() {
        let control = SearchControl::new().with_time_budget(Duration::ZERO);
        assert_eq!(control.check(), Some(OptimizationStatus::TimedOut));
    }

    #[test]
    fn test_progress_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let control = SearchControl::new().with_progress(move |update| {
            assert_eq!(update.total, 4);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        control.report(ProgressUpdate {
            stage: "grid",
            completed: 1,
            total: 4,
            best_fitness: None,
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
