//! The canonical confidence-scoring reduce. The source carried two
//! implementations (an imperative loop and a reduce); this is the
//! reduce version, canonicalized because it additionally validates the
//! first evidence element and skips malformed later ones.

use pipeline_core::model::Evidence;
use tracing::warn;

/// Result of fusing a relationship's evidence into one confidence value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconciliationOutcome {
    pub final_score: f64,
    pub has_conflict: bool,
}

const AGREEMENT_CONVERGENCE: f64 = 0.2;
const DISAGREEMENT_PENALTY: f64 = 0.5;

/// Fuse an ordered evidence array into a final score and conflict flag.
pub fn reconcile(evidence: &[Evidence]) -> ReconciliationOutcome {
    let Some(first) = evidence.first() else {
        return ReconciliationOutcome { final_score: 0.0, has_conflict: false };
    };

    if !(0.0..=1.0).contains(&first.initial_score) {
        warn!("first evidence element has an out-of-range initial_score, defaulting to {{0, false}}");
        return ReconciliationOutcome { final_score: 0.0, has_conflict: false };
    }

    let mut score = first.initial_score;
    let mut agreements: u32 = if first.found_relationship { 1 } else { 0 };
    let mut disagreements: u32 = 1 - agreements;

    for (index, item) in evidence.iter().enumerate().skip(1) {
        if !(0.0..=1.0).contains(&item.initial_score) {
            warn!(index, "skipping malformed evidence element");
            continue;
        }
        if item.found_relationship {
            score += (1.0 - score) * AGREEMENT_CONVERGENCE;
            agreements += 1;
        } else {
            score *= DISAGREEMENT_PENALTY;
            disagreements += 1;
        }
    }

    ReconciliationOutcome {
        final_score: score.clamp(0.0, 1.0),
        has_conflict: agreements > 0 && disagreements > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::model::EvidenceSource;

    fn ev(initial_score: f64, found_relationship: bool) -> Evidence {
        Evidence {
            id: "e".into(),
            relationship_id: "r".into(),
            run_id: "run".into(),
            source_worker: EvidenceSource::File,
            initial_score,
            found_relationship,
            payload: "{}".into(),
        }
    }

    #[test]
    fn scenario_1_single_agreement() {
        let outcome = reconcile(&[ev(0.6, true), ev(0.7, true)]);
        assert!((outcome.final_score - 0.68).abs() < 1e-9);
        assert!(!outcome.has_conflict);
    }

    #[test]
    fn scenario_2_single_disagreement() {
        let outcome = reconcile(&[ev(0.8, true), ev(0.1, false)]);
        assert!((outcome.final_score - 0.40).abs() < 1e-9);
        assert!(outcome.has_conflict);
    }

    #[test]
    fn scenario_3_malformed_middle_is_skipped() {
        let mut malformed_a = ev(0.0, false);
        malformed_a.initial_score = f64::NAN;
        let mut malformed_b = ev(-1.0, true);
        malformed_b.initial_score = -1.0;

        let evidence = vec![ev(0.7, true), malformed_a, ev(0.1, false), malformed_b, ev(0.8, true)];
        let outcome = reconcile(&evidence);
        assert!((outcome.final_score - 0.48).abs() < 0.01);
        assert!(outcome.has_conflict);
    }

    #[test]
    fn scenario_4_clamp_upper() {
        let evidence: Vec<Evidence> = std::iter::repeat_with(|| ev(0.9, true)).take(6).collect();
        let outcome = reconcile(&evidence);
        assert!(outcome.final_score <= 1.0);

        let mut running = Vec::new();
        let mut last = 0.0;
        for e in evidence {
            running.push(e);
            let step = reconcile(&running).final_score;
            assert!(step >= last - 1e-12, "score must be monotone non-decreasing");
            last = step;
        }
    }

    #[test]
    fn scenario_5_empty() {
        let outcome = reconcile(&[]);
        assert_eq!(outcome.final_score, 0.0);
        assert!(!outcome.has_conflict);
    }

    proptest::proptest! {
        #[test]
        fn confidence_is_always_clamped(scores in proptest::collection::vec((0.0f64..=1.0, proptest::bool::ANY), 0..20)) {
            let evidence: Vec<Evidence> = scores.into_iter().map(|(s, f)| ev(s, f)).collect();
            let outcome = reconcile(&evidence);
            assert!((0.0..=1.0).contains(&outcome.final_score));
        }

        #[test]
        fn adding_agreement_never_decreases_score(seed_score in 0.0f64..=1.0, seed_found in proptest::bool::ANY) {
            let base = vec![ev(seed_score, seed_found)];
            let before = reconcile(&base).final_score;
            let mut extended = base;
            extended.push(ev(0.5, true));
            let after = reconcile(&extended).final_score;
            assert!(after >= before - 1e-9);
        }

        #[test]
        fn adding_disagreement_never_increases_score(seed_score in 0.0f64..=1.0, seed_found in proptest::bool::ANY) {
            let base = vec![ev(seed_score, seed_found)];
            let before = reconcile(&base).final_score;
            let mut extended = base;
            extended.push(ev(0.5, false));
            let after = reconcile(&extended).final_score;
            assert!(after <= before + 1e-9);
        }
    }
}
