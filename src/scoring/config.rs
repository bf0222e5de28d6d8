use std::collections::BTreeSet;

use super::error::ScoreError;

/// Highest cutoff bound (exclusive). Confidences run 1..=1000, so a cutoff
/// of 999 would only admit perfect-confidence assertions.
pub const CUTOFF_LIMIT: u32 = 999;

/// Last second of February 2012; documents at or before it belong to the
/// training time range.
pub const END_OF_TRAINING_RANGE: i64 = 1_330_559_999;

/// Fixed ladder of confidence cutoffs `0, step, 2*step, ... < 999`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutoffLadder {
    cutoffs: Vec<u32>,
}

impl CutoffLadder {
    pub fn new(step: u32) -> Result<Self, ScoreError> {
        if step == 0 {
            return Err(ScoreError::InvalidCutoffStep(step));
        }
        let cutoffs = (0..CUTOFF_LIMIT).step_by(step as usize).collect();
        Ok(Self { cutoffs })
    }

    pub fn cutoffs(&self) -> &[u32] {
        &self.cutoffs
    }
}

/// Minimum assessor (and self-reported) rating that counts as relevant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InclusionThreshold {
    VitalOnly,
    VitalUseful,
    VitalUsefulNeutral,
}

impl InclusionThreshold {
    pub fn min_rating(self) -> i8 {
        match self {
            Self::VitalOnly => 2,
            Self::VitalUseful => 1,
            Self::VitalUsefulNeutral => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::VitalOnly => "vital",
            Self::VitalUseful => "vital+useful",
            Self::VitalUsefulNeutral => "vital+useful+neutral",
        }
    }
}

/// How several assessor judgments of one (document, entity) key combine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MergePolicy {
    /// Any judgment below threshold makes the key negative.
    ConservativeDown,
    /// Any judgment at or above threshold makes the key positive.
    AnyUp,
}

/// Everything the core needs to know about a scoring session. Built once by
/// the command layer and passed by reference into every stage.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub ladder: CutoffLadder,
    pub inclusion: InclusionThreshold,
    pub merge_policy: MergePolicy,
    pub unjudged_is_negative: bool,
    /// Entities with fewer positive truth labels are dropped; `None` keeps all.
    pub require_positives: Option<u64>,
    pub min_clean_visible_len: u64,
    pub include_training: bool,
    /// Drop run rows for entities with no known positives before dedup.
    pub skip_entities_without_positives: bool,
    pub slot_type_filter: Option<String>,
    pub pooled_only: bool,
}

impl ScoringConfig {
    pub fn new(cutoff_step: u32) -> Result<Self, ScoreError> {
        Ok(Self {
            ladder: CutoffLadder::new(cutoff_step)?,
            inclusion: InclusionThreshold::VitalOnly,
            merge_policy: MergePolicy::ConservativeDown,
            unjudged_is_negative: false,
            require_positives: None,
            min_clean_visible_len: 100,
            include_training: false,
            skip_entities_without_positives: false,
            slot_type_filter: None,
            pooled_only: false,
        })
    }

    /// True when a document's timestamp falls in the scored range.
    pub fn in_scored_range(&self, document_timestamp: i64) -> bool {
        self.include_training || document_timestamp > END_OF_TRAINING_RANGE
    }
}

/// Entity ids the truth set knows positives for; used to pre-populate
/// confusion matrices together with the entities a run asserted.
pub fn entity_universe<'k, 'a>(
    known: impl IntoIterator<Item = &'k str>,
    asserted: impl IntoIterator<Item = &'a str>,
) -> BTreeSet<String> {
    known
        .into_iter()
        .map(ToOwned::to_owned)
        .chain(asserted.into_iter().map(ToOwned::to_owned))
        .collect()
}
