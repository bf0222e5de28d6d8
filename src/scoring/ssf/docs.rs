use tracing::debug;

use super::*;
use crate::scoring::confusion::Outcome;
use crate::scoring::dedup::{RowFilter, collapse_by_key};

fn document_key(row: &&SlotAssertion) -> DocumentKey {
    (
        row.assertion.document_id.clone(),
        row.assertion.entity_id.clone(),
        row.slot_type.clone(),
    )
}

/// Credits one assertion per (document, entity, slot_type) key the truth
/// knows. Every admitted row on a credited key survives, since OVERLAP
/// re-judges the individual spans.
pub(super) fn run(
    rows: Vec<SlotAssertion>,
    truth: &SsfTruth,
    config: &ScoringConfig,
) -> Result<StageOutput<SlotAssertion>, ScoreError> {
    let positive_entities: BTreeSet<String> = truth
        .positives(Mode::Docs)
        .positive_entities()
        .map(ToOwned::to_owned)
        .collect();
    let mut filter = RowFilter::new(
        config.inclusion.min_rating(),
        config
            .skip_entities_without_positives
            .then_some(&positive_entities),
    );

    let mut other_slot_types = 0usize;
    let without_mention = rows.iter().filter(|row| !row.contains_mention).count();
    let mut admitted = Vec::with_capacity(rows.len());
    for row in rows {
        if !truth.scores_slot_type(&row.slot_type) {
            other_slot_types += 1;
            continue;
        }
        if filter.admits(&row.assertion) {
            admitted.push(row);
        }
    }

    let deduped = collapse_by_key(admitted.iter(), document_key);
    let mut builder = stage_builder(
        Mode::Docs,
        truth,
        config,
        deduped.iter().map(|row| row.assertion.entity_id.as_str()),
    );

    let mut credited: BTreeSet<DocumentKey> = BTreeSet::new();
    for row in &deduped {
        let key = document_key(row);
        let outcome = if truth.has_document_key(&key.0, &key.1, &key.2) {
            credited.insert(key);
            Outcome::Positive
        } else if config.unjudged_is_negative {
            Outcome::Negative
        } else {
            Outcome::Excluded
        };
        builder.record(&row.assertion.entity_id, row.assertion.confidence, outcome)?;
    }

    let deduped_count = deduped.len();
    let mut survivors: Vec<SlotAssertion> = admitted
        .into_iter()
        .filter(|row| credited.contains(&document_key(&row)))
        .collect();
    sort_for_scan(&mut survivors, |row| row.date_hour.as_str());

    debug!(
        other_slot_types,
        without_mention,
        below_rating = filter.below_rating,
        without_positives = filter.without_positives,
        deduped = deduped_count,
        credited = credited.len(),
        "DOCS stage"
    );

    Ok(StageOutput {
        matrix: builder.finish(truth.positives(Mode::Docs))?,
        survivors,
        judged: deduped_count,
    })
}
