//! Structured spans for alignment runs
//!
//! One span per public aligner operation, carrying the correlation id and
//! recording each stage as it completes.

use std::time::Instant;
use tracing::{field, span, Level, Span};
use uuid::Uuid;

/// Span covering one `hungarian`, `align` or `branch_and_bound` call
pub struct AlignmentSpan {
    span: Span,
    start_time: Instant,
    operation: &'static str,
}

impl AlignmentSpan {
    pub fn new(
        operation: &'static str,
        mode: &str,
        points: usize,
        correlation_id: Option<Uuid>,
    ) -> Self {
        let span = span!(
            Level::INFO,
            "alignment",
            operation = operation,
            mode = mode,
            points = points,
            correlation_id = field::Empty,
            candidates = field::Empty,
            best_score = field::Empty,
            distance = field::Empty,
            iterations = field::Empty,
            certified = field::Empty,
            execution_time_ms = field::Empty,
        );
        if let Some(id) = correlation_id {
            span.record("correlation_id", field::display(id));
        }

        Self {
            span,
            start_time: Instant::now(),
            operation,
        }
    }

    /// Attach to the current thread's correlation id, if any.
    pub fn current(operation: &'static str, mode: &str, points: usize) -> Self {
        Self::new(operation, mode, points, crate::logging::get_correlation_id())
    }

    pub fn record_coefficients(&self, precomputed: bool, values: usize) {
        tracing::debug!(
            parent: &self.span,
            precomputed,
            values,
            "Coefficients ready"
        );
    }

    pub fn record_candidates(&self, count: usize, best_score: Option<f64>) {
        self.span.record("candidates", count);
        if let Some(score) = best_score {
            self.span.record("best_score", score);
        }
        tracing::debug!(
            parent: &self.span,
            candidates = count,
            best_score,
            "Overlap grid evaluated"
        );
    }

    pub fn record_refinement(&self, candidate: usize, distance: f64, steps: usize) {
        tracing::trace!(
            parent: &self.span,
            candidate,
            distance,
            steps,
            "Candidate refined"
        );
    }

    pub fn record_search(&self, iterations: usize, nodes: usize, certified: bool) {
        self.span.record("iterations", iterations);
        self.span.record("certified", certified);
        tracing::debug!(
            parent: &self.span,
            iterations,
            nodes,
            certified,
            "Branch-and-bound finished"
        );
    }

    /// Final distance, closes out the timing.
    pub fn record_result(&self, distance: f64, rmsd: f64, inverted: bool) {
        let duration = self.start_time.elapsed();
        self.span.record("distance", distance);
        self.span
            .record("execution_time_ms", duration.as_secs_f64() * 1000.0);

        tracing::info!(
            parent: &self.span,
            operation = self.operation,
            distance,
            rmsd = format!("{:.6}", rmsd),
            inverted,
            execution_time_ms = duration.as_millis(),
            "Alignment completed"
        );
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_span_records_without_subscriber() {
        let span = AlignmentSpan::new("align", "spherical", 12, Some(Uuid::new_v4()));
        let _enter = span.enter();
        span.record_coefficients(false, 484);
        span.record_candidates(5, Some(3.5));
        span.record_refinement(0, 0.25, 3);
        span.record_search(10, 120, false);
        span.record_result(0.25, 0.144, false);
    }

    #[test]
    fn test_current_picks_up_thread_correlation_id() {
        let id = crate::logging::new_correlation_id();
        let span = AlignmentSpan::current("hungarian", "periodic", 3);
        assert_eq!(crate::logging::get_correlation_id(), Some(id));
        span.record_result(0.0, 0.0, false);
        crate::logging::clear_correlation_id();
    }
}
