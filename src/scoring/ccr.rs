//! Cumulative citation recommendation: document-level scoring of a run
//! against merged assessor judgments.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use serde::Serialize;
use tracing::{debug, info};

use super::assertion::{Assertion, document_timestamp};
use super::config::{END_OF_TRAINING_RANGE, MergePolicy, ScoringConfig, entity_universe};
use super::confusion::{ConfusionMatrix, KnownPositives, MatrixBuilder, Outcome};
use super::dedup::{RowFilter, collapse_by_key};
use super::error::ScoreError;

pub const CCR_LABEL: &str = "CCR";

const DOCUMENT_COLUMN: usize = 2;
const ENTITY_COLUMN: usize = 3;
const RATING_COLUMN: usize = 5;
const CLEAN_VISIBLE_COLUMN: usize = 11;

/// Merged (document, entity) -> relevant labels plus per-entity positives.
#[derive(Debug, Clone)]
pub struct CcrTruth {
    labels: BTreeMap<(String, String), bool>,
    positives: KnownPositives,
}

#[derive(Debug, Default)]
struct LoadCounters {
    rows: usize,
    too_short: usize,
    rejected: usize,
    out_of_range: usize,
}

impl CcrTruth {
    /// Reads tab-separated judgments; `#` lines are comments.
    pub fn from_reader<R: Read>(
        reader: R,
        config: &ScoringConfig,
        reject: impl Fn(&str) -> bool,
    ) -> Result<Self, ScoreError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .quoting(false)
            .from_reader(reader);

        let threshold = config.inclusion.min_rating();
        let mut labels: BTreeMap<(String, String), bool> = BTreeMap::new();
        let mut counters = LoadCounters::default();

        for (index, record) in csv_reader.records().enumerate() {
            let record = record?;
            let line = index + 1;
            if record.len() <= RATING_COLUMN {
                return Err(ScoreError::MalformedTruth(format!(
                    "record {line}: expected at least {} columns, found {}",
                    RATING_COLUMN + 1,
                    record.len()
                )));
            }
            counters.rows += 1;

            let document_id = record[DOCUMENT_COLUMN].to_string();
            let entity_id = record[ENTITY_COLUMN].to_string();
            let raw_rating = record[RATING_COLUMN].trim();
            let rating = raw_rating.parse::<i8>().map_err(|_| {
                ScoreError::MalformedTruth(format!(
                    "record {line}: rating {raw_rating:?} is not an integer"
                ))
            })?;
            if !(-1..=2).contains(&rating) {
                return Err(ScoreError::RatingOutOfRange {
                    line,
                    value: raw_rating.to_string(),
                });
            }

            if let Some(raw_len) = record.get(CLEAN_VISIBLE_COLUMN) {
                let clean_visible_len = raw_len.trim().parse::<u64>().map_err(|_| {
                    ScoreError::MalformedTruth(format!(
                        "record {line}: clean_visible length {raw_len:?} is not an integer"
                    ))
                })?;
                if clean_visible_len < config.min_clean_visible_len {
                    counters.too_short += 1;
                    debug!(
                        document = %document_id,
                        clean_visible_len,
                        "excluding judgment with too little clean_visible text"
                    );
                    continue;
                }
            }

            if reject(&entity_id) {
                counters.rejected += 1;
                debug!(entity = %entity_id, "excluding truth data for rejected entity");
                continue;
            }

            let in_range = document_timestamp(&document_id)
                .map(|timestamp| config.in_scored_range(timestamp))
                .unwrap_or(config.include_training);
            if !in_range {
                counters.out_of_range += 1;
                continue;
            }

            let relevant = rating >= threshold;
            match labels.get_mut(&(document_id.clone(), entity_id.clone())) {
                Some(label) => match config.merge_policy {
                    MergePolicy::ConservativeDown if !relevant => *label = false,
                    MergePolicy::AnyUp if relevant => *label = true,
                    _ => {}
                },
                None => {
                    labels.insert((document_id, entity_id), relevant);
                }
            }
        }

        let mut truth = Self::from_labels(labels);
        if let Some(minimum) = config.require_positives {
            truth.require_positives(minimum);
        }

        let positive_count = truth.positives.total();
        info!(
            rows = counters.rows,
            too_short = counters.too_short,
            rejected = counters.rejected,
            out_of_range = counters.out_of_range,
            pairs = truth.labels.len(),
            positives = positive_count,
            inclusion = config.inclusion.label(),
            "loaded CCR truth data"
        );

        if positive_count == 0 {
            return Err(ScoreError::NoPositives {
                context: format!(
                    "{} judged (document, entity) pairs at threshold {}",
                    truth.labels.len(),
                    config.inclusion.label()
                ),
            });
        }
        Ok(truth)
    }

    pub fn from_labels(labels: BTreeMap<(String, String), bool>) -> Self {
        let mut positives = KnownPositives::new();
        for ((_, entity), relevant) in &labels {
            positives.add(entity, u64::from(*relevant));
        }
        Self { labels, positives }
    }

    /// Drops every label of entities with fewer than `minimum` positives.
    fn require_positives(&mut self, minimum: u64) {
        let dropped: BTreeSet<String> = self
            .positives
            .entities()
            .filter(|entity| self.positives.get(entity) < minimum)
            .map(ToOwned::to_owned)
            .collect();
        if dropped.is_empty() {
            return;
        }

        info!(
            entities = dropped.len(),
            minimum, "dropping entities below the required positive count"
        );
        self.labels
            .retain(|(_, entity), _| !dropped.contains(entity));
        self.positives.retain(|entity, _| !dropped.contains(entity));
    }

    pub fn label(&self, document_id: &str, entity_id: &str) -> Option<bool> {
        self.labels
            .get(&(document_id.to_string(), entity_id.to_string()))
            .copied()
    }

    pub fn positives(&self) -> &KnownPositives {
        &self.positives
    }
}

/// Per-entity assertion counts, reported with `--debug`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssertionCounts {
    pub total: u64,
    pub in_training_range: u64,
    pub in_annotation_set: u64,
}

#[derive(Debug, Clone)]
pub struct CcrRunMatrix {
    pub matrix: ConfusionMatrix,
    pub assertion_counts: BTreeMap<String, AssertionCounts>,
    pub scored_assertions: usize,
}

/// Single-stage build: dedup by (document, entity), then sweep cutoffs.
pub fn score_ccr_run(
    assertions: impl IntoIterator<Item = Assertion>,
    truth: &CcrTruth,
    config: &ScoringConfig,
) -> Result<CcrRunMatrix, ScoreError> {
    let positive_entities: BTreeSet<String> = truth
        .positives()
        .positive_entities()
        .map(ToOwned::to_owned)
        .collect();
    let mut filter = RowFilter::new(
        config.inclusion.min_rating(),
        config
            .skip_entities_without_positives
            .then_some(&positive_entities),
    );

    let mut assertion_counts: BTreeMap<String, AssertionCounts> = BTreeMap::new();
    let mut admitted = Vec::new();
    for assertion in assertions {
        let timestamp =
            assertion
                .document_timestamp()
                .ok_or_else(|| ScoreError::MalformedRow {
                    line: assertion.line,
                    reason: format!(
                        "document id {:?} lacks an epoch timestamp prefix",
                        assertion.document_id
                    ),
                })?;

        let counts = assertion_counts
            .entry(assertion.entity_id.clone())
            .or_default();
        counts.total += 1;
        if timestamp <= END_OF_TRAINING_RANGE {
            counts.in_training_range += 1;
        }

        if !config.in_scored_range(timestamp) || !filter.admits(&assertion) {
            continue;
        }
        admitted.push(assertion);
    }

    let deduped = collapse_by_key(admitted, |assertion: &Assertion| {
        (assertion.document_id.clone(), assertion.entity_id.clone())
    });

    let entities = entity_universe(
        positive_entities.iter().map(String::as_str),
        deduped.iter().map(|assertion| assertion.entity_id.as_str()),
    );
    let mut builder = MatrixBuilder::new(CCR_LABEL, &config.ladder, entities);

    for assertion in &deduped {
        let label = truth.label(&assertion.document_id, &assertion.entity_id);
        if label.is_some() {
            if let Some(counts) = assertion_counts.get_mut(&assertion.entity_id) {
                counts.in_annotation_set += 1;
            }
        }

        let outcome = match label {
            Some(true) => Outcome::Positive,
            Some(false) => Outcome::Negative,
            None if config.unjudged_is_negative => Outcome::Negative,
            None => Outcome::Excluded,
        };
        builder.record(&assertion.entity_id, assertion.confidence, outcome)?;
    }

    debug!(
        below_rating = filter.below_rating,
        without_positives = filter.without_positives,
        scored = deduped.len(),
        "deduplicated CCR assertions"
    );

    Ok(CcrRunMatrix {
        matrix: builder.finish(truth.positives())?,
        assertion_counts,
        scored_assertions: deduped.len(),
    })
}
