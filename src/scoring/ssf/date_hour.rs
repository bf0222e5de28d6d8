use tracing::debug;

use super::*;
use crate::scoring::confusion::Outcome;

/// Decides how a FILL survivor counts when its fill is found again later.
/// Candidates arrive in ascending date_hour order.
pub trait DiscoveryPolicy {
    fn name(&self) -> &'static str;

    fn judge(&mut self, candidate: &FillCandidate) -> Outcome;
}

/// Binary credit: only the earliest evidence for a truth class counts.
#[derive(Debug, Default)]
pub struct EarliestDiscovery {
    seen: BTreeSet<ClassKey>,
}

impl DiscoveryPolicy for EarliestDiscovery {
    fn name(&self) -> &'static str {
        "earliest"
    }

    fn judge(&mut self, candidate: &FillCandidate) -> Outcome {
        if self.seen.insert(candidate.class_key()) {
            Outcome::Positive
        } else {
            Outcome::Negative
        }
    }
}

pub(super) fn run(
    mut candidates: Vec<FillCandidate>,
    truth: &SsfTruth,
    config: &ScoringConfig,
    policy: &mut dyn DiscoveryPolicy,
) -> Result<StageOutput<FillCandidate>, ScoreError> {
    sort_for_scan(&mut candidates, |candidate| candidate.slot.date_hour.as_str());

    let mut builder = stage_builder(
        Mode::DateHour,
        truth,
        config,
        candidates
            .iter()
            .map(|candidate| candidate.slot.assertion.entity_id.as_str()),
    );

    let judged = candidates.len();
    let mut survivors = Vec::new();
    let mut ahead_of_assessors = 0usize;
    for candidate in candidates {
        let outcome = policy.judge(&candidate);
        if outcome == Outcome::Positive {
            let earliest = truth.earliest_date_hour(&candidate.class_key());
            if earliest.is_some_and(|hour| candidate.slot.date_hour.as_str() <= hour) {
                ahead_of_assessors += 1;
            }
        }
        builder.record(
            &candidate.slot.assertion.entity_id,
            candidate.slot.assertion.confidence,
            outcome,
        )?;
        if outcome == Outcome::Positive {
            survivors.push(candidate);
        }
    }

    debug!(
        policy = policy.name(),
        credited = survivors.len(),
        ahead_of_assessors,
        "DATE_HOUR stage"
    );

    Ok(StageOutput {
        matrix: builder.finish(truth.positives(Mode::DateHour))?,
        survivors,
        judged,
    })
}
