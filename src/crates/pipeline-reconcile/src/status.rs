//! Status assignment from a reconciliation outcome.

use crate::score::ReconciliationOutcome;
use pipeline_core::model::RelationshipStatus;

/// Thresholds mapping a final score to a relationship's terminal status.
/// Defaults match spec: 0.65 / 0.35, both configurable.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub validate: f64,
    pub discard: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { validate: 0.65, discard: 0.35 }
    }
}

/// `score >= validate && !conflict -> validated`; `score <= discard ->
/// discarded`; otherwise `conflicted`. Conflicts remain visible but are
/// excluded from graph finalization (invariant 3: nothing reaches
/// `validated` without evidence, which `reconcile` already requires by
/// construction — an empty evidence array never clears the validate bar).
pub fn assign_status(outcome: ReconciliationOutcome, thresholds: Thresholds) -> RelationshipStatus {
    if outcome.final_score >= thresholds.validate && !outcome.has_conflict {
        RelationshipStatus::Validated
    } else if outcome.final_score <= thresholds.discard {
        RelationshipStatus::Discarded
    } else {
        RelationshipStatus::Conflicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_score_without_conflict_validates() {
        let outcome = ReconciliationOutcome { final_score: 0.7, has_conflict: false };
        assert_eq!(assign_status(outcome, Thresholds::default()), RelationshipStatus::Validated);
    }

    #[test]
    fn high_score_with_conflict_stays_conflicted() {
        let outcome = ReconciliationOutcome { final_score: 0.7, has_conflict: true };
        assert_eq!(assign_status(outcome, Thresholds::default()), RelationshipStatus::Conflicted);
    }

    #[test]
    fn low_score_discards() {
        let outcome = ReconciliationOutcome { final_score: 0.2, has_conflict: false };
        assert_eq!(assign_status(outcome, Thresholds::default()), RelationshipStatus::Discarded);
    }

    #[test]
    fn middle_score_is_conflicted() {
        let outcome = ReconciliationOutcome { final_score: 0.5, has_conflict: false };
        assert_eq!(assign_status(outcome, Thresholds::default()), RelationshipStatus::Conflicted);
    }
}
