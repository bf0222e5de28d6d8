use tracing::debug;

use super::*;
use crate::scoring::confusion::Outcome;
use crate::scoring::dedup::collapse_by_key;

type SpanKey = (String, String, String, u64, u64);

fn span_key(row: &SlotAssertion) -> SpanKey {
    (
        row.assertion.document_id.clone(),
        row.assertion.entity_id.clone(),
        row.slot_type.clone(),
        row.byte_range.start,
        row.byte_range.end,
    )
}

/// Truth classes whose assessor spans in this document the row overlaps.
fn matching_classes(row: &SlotAssertion, truth: &SsfTruth) -> Vec<String> {
    truth
        .classes_for(
            &row.assertion.document_id,
            &row.assertion.entity_id,
            &row.slot_type,
        )
        .filter(|(_, mention)| {
            mention
                .offsets
                .iter()
                .any(|offsets| row.byte_range.overlaps_truth(offsets))
        })
        .map(|(equivalence_id, _)| equivalence_id.to_string())
        .collect()
}

/// Splits DOCS survivors into one candidate per matched truth class. A span
/// matching nothing is a false positive here and goes no further.
pub(super) fn run(
    rows: Vec<SlotAssertion>,
    truth: &SsfTruth,
    config: &ScoringConfig,
) -> Result<StageOutput<FillCandidate>, ScoreError> {
    let spans = collapse_by_key(rows, span_key);
    let mut builder = stage_builder(
        Mode::Overlap,
        truth,
        config,
        spans.iter().map(|row| row.assertion.entity_id.as_str()),
    );

    let mut candidates = Vec::new();
    let mut missed = 0usize;
    for span in &spans {
        let classes = matching_classes(span, truth);
        if classes.is_empty() {
            missed += 1;
            builder.record(
                &span.assertion.entity_id,
                span.assertion.confidence,
                Outcome::Negative,
            )?;
            continue;
        }
        candidates.extend(classes.into_iter().map(|truth_equivalence_id| FillCandidate {
            slot: span.clone(),
            truth_equivalence_id,
        }));
    }

    let mut survivors = collapse_by_key(candidates, credit_key);
    for candidate in &survivors {
        builder.record(
            &candidate.slot.assertion.entity_id,
            candidate.slot.assertion.confidence,
            Outcome::Positive,
        )?;
    }
    sort_for_scan(&mut survivors, |candidate| candidate.slot.date_hour.as_str());

    debug!(
        spans = spans.len(),
        missed,
        credited = survivors.len(),
        "OVERLAP stage"
    );

    Ok(StageOutput {
        matrix: builder.finish(truth.positives(Mode::Overlap))?,
        survivors,
        judged: spans.len(),
    })
}
