//! Slot-specific filtering: a four-stage cascade where each stage re-judges
//! the previous stage's true positives under a stricter notion of correct.
//!
//! DOCS      the document substantiates some fill of this slot type
//! OVERLAP   the asserted byte range overlaps an assessor's span
//! FILL      run equivalence ids map one-to-one onto truth equivalence ids
//! DATE_HOUR the assertion is the earliest evidence found for its fill
//!
//! Every stage is a function from the prior survivors to a fresh confusion
//! matrix plus its own survivors; no matrix is shared between stages.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::info;

use super::assertion::{Assertion, SlotAssertion};
use super::config::{ScoringConfig, entity_universe};
use super::confusion::{ConfusionMatrix, MatrixBuilder};
use super::dedup::Ranked;
use super::error::ScoreError;

mod date_hour;
mod docs;
mod fill;
mod overlap;
mod truth;

pub use date_hour::{DiscoveryPolicy, EarliestDiscovery};
pub use fill::{CorefLedger, FillJudgement};
pub use truth::{ClassKey, DocumentKey, SsfTruth, TruthMention};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Mode {
    Docs,
    Overlap,
    Fill,
    DateHour,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Self::Docs, Self::Overlap, Self::Fill, Self::DateHour];

    pub fn name(self) -> &'static str {
        match self {
            Self::Docs => "DOCS",
            Self::Overlap => "OVERLAP",
            Self::Fill => "FILL",
            Self::DateHour => "DATE_HOUR",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::Docs => 0,
            Self::Overlap => 1,
            Self::Fill => 2,
            Self::DateHour => 3,
        }
    }
}

/// An OVERLAP survivor paired with the truth class its span matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillCandidate {
    pub slot: SlotAssertion,
    pub truth_equivalence_id: String,
}

impl FillCandidate {
    pub fn class_key(&self) -> ClassKey {
        ClassKey {
            entity_id: self.slot.assertion.entity_id.clone(),
            slot_type: self.slot.slot_type.clone(),
            equivalence_id: self.truth_equivalence_id.clone(),
        }
    }
}

impl Ranked for FillCandidate {
    fn assertion(&self) -> &Assertion {
        &self.slot.assertion
    }
}

/// One stage's frozen matrix and the records it passes downstream.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub matrix: ConfusionMatrix,
    pub survivors: Vec<T>,
    /// Deduplicated records the stage judged.
    pub judged: usize,
}

#[derive(Debug, Clone)]
pub struct SsfRunMatrices {
    pub matrices: BTreeMap<Mode, ConfusionMatrix>,
    pub survivors: BTreeMap<Mode, usize>,
    /// DOCS-stage assertions left after filtering and deduplication.
    pub scored_assertions: usize,
}

pub fn score_ssf_run(
    rows: Vec<SlotAssertion>,
    truth: &SsfTruth,
    config: &ScoringConfig,
) -> Result<SsfRunMatrices, ScoreError> {
    score_ssf_run_with(rows, truth, config, &mut EarliestDiscovery::default())
}

/// Runs the cascade with a caller-chosen DATE_HOUR policy.
pub fn score_ssf_run_with(
    rows: Vec<SlotAssertion>,
    truth: &SsfTruth,
    config: &ScoringConfig,
    policy: &mut dyn DiscoveryPolicy,
) -> Result<SsfRunMatrices, ScoreError> {
    let docs = docs::run(rows, truth, config)?;
    let overlap = overlap::run(docs.survivors.clone(), truth, config)?;
    let fill = fill::run(overlap.survivors.clone(), truth, config)?;
    let date_hour = date_hour::run(fill.survivors.clone(), truth, config, policy)?;

    let survivors = BTreeMap::from([
        (Mode::Docs, docs.survivors.len()),
        (Mode::Overlap, overlap.survivors.len()),
        (Mode::Fill, fill.survivors.len()),
        (Mode::DateHour, date_hour.survivors.len()),
    ]);
    info!(
        docs = survivors[&Mode::Docs],
        overlap = survivors[&Mode::Overlap],
        fill = survivors[&Mode::Fill],
        date_hour = survivors[&Mode::DateHour],
        policy = policy.name(),
        "SSF cascade survivors"
    );

    let matrices = BTreeMap::from([
        (Mode::Docs, docs.matrix),
        (Mode::Overlap, overlap.matrix),
        (Mode::Fill, fill.matrix),
        (Mode::DateHour, date_hour.matrix),
    ]);

    Ok(SsfRunMatrices {
        matrices,
        survivors,
        scored_assertions: docs.judged,
    })
}

/// Keys every scored run asserted, for pooled-only truth restriction.
pub fn asserted_document_keys<'a>(
    rows: impl IntoIterator<Item = &'a SlotAssertion>,
) -> BTreeSet<DocumentKey> {
    rows.into_iter()
        .map(|row| {
            (
                row.assertion.document_id.clone(),
                row.assertion.entity_id.clone(),
                row.slot_type.clone(),
            )
        })
        .collect()
}

/// Stages scan in ascending date_hour, then file order.
fn sort_for_scan<T: Ranked>(records: &mut [T], date_hour: impl Fn(&T) -> &str) {
    records.sort_by(|left, right| {
        date_hour(left)
            .cmp(date_hour(right))
            .then(left.assertion().line.cmp(&right.assertion().line))
    });
}

/// Credit unit shared by OVERLAP and FILL: one truth class in one document.
fn credit_key(candidate: &FillCandidate) -> (String, String, String, String) {
    (
        candidate.slot.assertion.document_id.clone(),
        candidate.slot.assertion.entity_id.clone(),
        candidate.slot.slot_type.clone(),
        candidate.truth_equivalence_id.clone(),
    )
}

fn stage_builder<'a>(
    mode: Mode,
    truth: &SsfTruth,
    config: &ScoringConfig,
    asserted_entities: impl IntoIterator<Item = &'a str>,
) -> MatrixBuilder {
    let entities = entity_universe(truth.positives(mode).positive_entities(), asserted_entities);
    MatrixBuilder::new(mode.name(), &config.ladder, entities)
}
