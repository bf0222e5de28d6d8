use tracing::debug;

use super::*;
use crate::scoring::confusion::Outcome;
use crate::scoring::dedup::collapse_by_key;

/// Result of checking one side of a run/truth equivalence pairing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FillJudgement {
    /// Seen before with the same partner.
    Correct,
    /// Seen before with a different partner.
    Incorrect,
    /// First sighting on this side.
    Unseen,
}

impl FillJudgement {
    /// Incorrect on either side wins; otherwise the pairing stands.
    pub fn combine(self, other: FillJudgement) -> FillJudgement {
        match (self, other) {
            (Self::Incorrect, _) | (_, Self::Incorrect) => Self::Incorrect,
            (Self::Correct, _) | (_, Self::Correct) => Self::Correct,
            (Self::Unseen, Self::Unseen) => Self::Unseen,
        }
    }

    pub fn accepted(self) -> bool {
        self != Self::Incorrect
    }
}

/// (entity_id, slot_type, equivalence id)
type ScopedId = (String, String, String);

/// One-to-one correspondence between run clusters and truth clusters,
/// built up in scan order. Ids are scoped per (entity, slot_type).
#[derive(Debug, Default)]
pub struct CorefLedger {
    run_to_truth: BTreeMap<ScopedId, String>,
    truth_to_run: BTreeMap<ScopedId, String>,
}

impl CorefLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(map: &BTreeMap<ScopedId, String>, key: &ScopedId, partner: &str) -> FillJudgement {
        match map.get(key) {
            None => FillJudgement::Unseen,
            Some(known) if known == partner => FillJudgement::Correct,
            Some(_) => FillJudgement::Incorrect,
        }
    }

    /// Judges the pairing and records it when both sides are new.
    pub fn judge(
        &mut self,
        entity_id: &str,
        slot_type: &str,
        run_equivalence_id: &str,
        truth_equivalence_id: &str,
    ) -> FillJudgement {
        let run_key = (
            entity_id.to_string(),
            slot_type.to_string(),
            run_equivalence_id.to_string(),
        );
        let truth_key = (
            entity_id.to_string(),
            slot_type.to_string(),
            truth_equivalence_id.to_string(),
        );

        let from_run = Self::check(&self.run_to_truth, &run_key, truth_equivalence_id);
        let from_truth = Self::check(&self.truth_to_run, &truth_key, run_equivalence_id);
        let judgement = from_run.combine(from_truth);

        if judgement == FillJudgement::Unseen {
            self.run_to_truth
                .insert(run_key, truth_equivalence_id.to_string());
            self.truth_to_run
                .insert(truth_key, run_equivalence_id.to_string());
        }
        judgement
    }

    pub fn len(&self) -> usize {
        self.run_to_truth.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.run_to_truth.is_empty()
    }
}

pub(super) fn run(
    candidates: Vec<FillCandidate>,
    truth: &SsfTruth,
    config: &ScoringConfig,
) -> Result<StageOutput<FillCandidate>, ScoreError> {
    let mut deduped = collapse_by_key(candidates, credit_key);
    sort_for_scan(&mut deduped, |candidate| candidate.slot.date_hour.as_str());

    let mut builder = stage_builder(
        Mode::Fill,
        truth,
        config,
        deduped
            .iter()
            .map(|candidate| candidate.slot.assertion.entity_id.as_str()),
    );

    let judged = deduped.len();
    let mut ledger = CorefLedger::new();
    let mut survivors = Vec::with_capacity(judged);
    let mut incorrect = 0usize;
    for candidate in deduped {
        let judgement = ledger.judge(
            &candidate.slot.assertion.entity_id,
            &candidate.slot.slot_type,
            &candidate.slot.equivalence_id,
            &candidate.truth_equivalence_id,
        );
        let outcome = if judgement.accepted() {
            Outcome::Positive
        } else {
            incorrect += 1;
            Outcome::Negative
        };
        builder.record(
            &candidate.slot.assertion.entity_id,
            candidate.slot.assertion.confidence,
            outcome,
        )?;
        if judgement.accepted() {
            survivors.push(candidate);
        }
    }

    debug!(
        pairings = ledger.len(),
        incorrect,
        credited = survivors.len(),
        "FILL stage"
    );

    Ok(StageOutput {
        matrix: builder.finish(truth.positives(Mode::Fill))?,
        survivors,
        judged,
    })
}
