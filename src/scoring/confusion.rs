//! Per-entity confusion matrices swept over a cutoff ladder.
//!
//! Cells live in one flat vector addressed by `(entity index, cutoff index)`.
//! Every cell is created zeroed before the scan starts; recording against an
//! entity that was never registered is an error, not an implicit insert.

use std::collections::BTreeMap;

use serde::Serialize;

use super::config::CutoffLadder;
use super::error::ScoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    #[serde(rename = "TP")]
    pub tp: u64,
    #[serde(rename = "FP")]
    pub fp: u64,
    #[serde(rename = "FN")]
    pub fn_count: u64,
    #[serde(rename = "TN")]
    pub tn: u64,
}

impl Counts {
    pub fn add(&mut self, other: &Counts) {
        self.tp += other.tp;
        self.fp += other.fp;
        self.fn_count += other.fn_count;
        self.tn += other.tn;
    }
}

/// How one deduplicated record counts at a stage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// TP above the cutoff; below it the miss is back-filled as FN.
    Positive,
    /// FP above the cutoff, TN at or below it.
    Negative,
    /// Neither: unjudged rows when unjudged rows are not negatives.
    Excluded,
}

/// Ceiling of discoverable positives per entity, fixed before any run is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnownPositives {
    by_entity: BTreeMap<String, u64>,
}

impl KnownPositives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity: &str, count: u64) {
        *self.by_entity.entry(entity.to_string()).or_insert(0) += count;
    }

    pub fn get(&self, entity: &str) -> u64 {
        self.by_entity.get(entity).copied().unwrap_or(0)
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.by_entity.keys().map(String::as_str)
    }

    /// Entities with at least one positive.
    pub fn positive_entities(&self) -> impl Iterator<Item = &str> {
        self.by_entity
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(entity, _)| entity.as_str())
    }

    pub fn total(&self) -> u64 {
        self.by_entity.values().sum()
    }

    pub fn retain(&mut self, keep: impl Fn(&str, u64) -> bool) {
        self.by_entity.retain(|entity, count| keep(entity, *count));
    }
}

#[derive(Debug, Clone)]
struct Cells {
    label: String,
    cutoffs: Vec<u32>,
    entities: Vec<String>,
    index: BTreeMap<String, usize>,
    counts: Vec<Counts>,
}

impl Cells {
    fn slot(&self, entity: usize, cutoff: usize) -> usize {
        entity * self.cutoffs.len() + cutoff
    }

    fn row(&self, entity: usize) -> &[Counts] {
        let start = self.slot(entity, 0);
        &self.counts[start..start + self.cutoffs.len()]
    }
}

/// Mutable phase: counts accumulate while a stage scans its records.
#[derive(Debug, Clone)]
pub struct MatrixBuilder {
    cells: Cells,
}

impl MatrixBuilder {
    pub fn new<I, S>(label: impl Into<String>, ladder: &CutoffLadder, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sorted: Vec<String> = entities.into_iter().map(Into::into).collect();
        sorted.sort();
        sorted.dedup();

        let index = sorted
            .iter()
            .enumerate()
            .map(|(position, entity)| (entity.clone(), position))
            .collect();
        let cutoffs = ladder.cutoffs().to_vec();
        let counts = vec![Counts::default(); sorted.len() * cutoffs.len()];

        Self {
            cells: Cells {
                label: label.into(),
                cutoffs,
                entities: sorted,
                index,
                counts,
            },
        }
    }

    pub fn record(
        &mut self,
        entity: &str,
        confidence: u32,
        outcome: Outcome,
    ) -> Result<(), ScoreError> {
        if outcome == Outcome::Excluded {
            return Ok(());
        }

        let Some(&entity_index) = self.cells.index.get(entity) else {
            return Err(ScoreError::MissingCell {
                mode: self.cells.label.clone(),
                entity: entity.to_string(),
                cutoff: self.cells.cutoffs.first().copied().unwrap_or(0),
            });
        };

        for cutoff_index in 0..self.cells.cutoffs.len() {
            let above = confidence > self.cells.cutoffs[cutoff_index];
            let slot = self.cells.slot(entity_index, cutoff_index);
            let cell = &mut self.cells.counts[slot];
            match (outcome, above) {
                (Outcome::Positive, true) => cell.tp += 1,
                (Outcome::Positive, false) => {}
                (Outcome::Negative, true) => cell.fp += 1,
                (Outcome::Negative, false) => cell.tn += 1,
                (Outcome::Excluded, _) => {}
            }
        }
        Ok(())
    }

    /// Back-fill FN from the known positives and freeze the matrix.
    pub fn finish(mut self, positives: &KnownPositives) -> Result<ConfusionMatrix, ScoreError> {
        for entity_index in 0..self.cells.entities.len() {
            let entity = &self.cells.entities[entity_index];
            let known = positives.get(entity);
            for cutoff_index in 0..self.cells.cutoffs.len() {
                let slot = self.cells.slot(entity_index, cutoff_index);
                let cell = &mut self.cells.counts[slot];
                if cell.tp > known {
                    return Err(ScoreError::TruePositivesExceedKnown {
                        mode: self.cells.label.clone(),
                        entity: entity.clone(),
                        cutoff: self.cells.cutoffs[cutoff_index],
                        true_positives: cell.tp,
                        known_positives: known,
                    });
                }
                cell.fn_count = known - cell.tp;
            }
        }

        Ok(ConfusionMatrix { cells: self.cells })
    }
}

/// Frozen phase: read-only counts with FN filled in.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    cells: Cells,
}

impl ConfusionMatrix {
    pub fn cutoffs(&self) -> &[u32] {
        &self.cells.cutoffs
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.cells.entities.iter().map(String::as_str)
    }

    pub fn get(&self, entity: &str, cutoff: u32) -> Option<Counts> {
        let entity_index = *self.cells.index.get(entity)?;
        let cutoff_index = self.cells.cutoffs.iter().position(|c| *c == cutoff)?;
        Some(self.cells.counts[self.cells.slot(entity_index, cutoff_index)])
    }

    /// Every `(entity, cutoff, counts)` cell, entity-major.
    pub fn cells(&self) -> impl Iterator<Item = (&str, u32, Counts)> + '_ {
        self.cells
            .entities
            .iter()
            .enumerate()
            .flat_map(move |(entity_index, entity)| {
                self.cells
                    .cutoffs
                    .iter()
                    .copied()
                    .zip(self.cells.row(entity_index).iter().copied())
                    .map(move |(cutoff, counts)| (entity.as_str(), cutoff, counts))
            })
    }

    /// Counts summed over entities at each cutoff.
    pub fn summed(&self) -> BTreeMap<u32, Counts> {
        let mut totals: BTreeMap<u32, Counts> = self
            .cells
            .cutoffs
            .iter()
            .map(|cutoff| (*cutoff, Counts::default()))
            .collect();
        for (_, cutoff, counts) in self.cells() {
            if let Some(total) = totals.get_mut(&cutoff) {
                total.add(&counts);
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const E1: &str = "http://example.org/E1";
    const E2: &str = "http://example.org/E2";

    fn ladder() -> CutoffLadder {
        CutoffLadder::new(250).expect("valid step")
    }

    #[test]
    fn cells_exist_zeroed_before_any_record() {
        let builder = MatrixBuilder::new("DOCS", &ladder(), [E1, E2]);
        let mut positives = KnownPositives::new();
        positives.add(E2, 3);

        let matrix = builder.finish(&positives).expect("no violations");
        let counts = matrix.get(E2, 500).expect("cell exists");
        assert_eq!(counts.tp, 0);
        assert_eq!(counts.fn_count, 3);
        assert_eq!(matrix.get(E1, 0), Some(Counts::default()));
    }

    #[test]
    fn positive_and_negative_outcomes_split_on_cutoff() {
        let mut builder = MatrixBuilder::new("DOCS", &ladder(), [E1]);
        builder.record(E1, 600, Outcome::Positive).expect("known entity");
        builder.record(E1, 300, Outcome::Negative).expect("known entity");
        builder.record(E1, 900, Outcome::Excluded).expect("known entity");

        let mut positives = KnownPositives::new();
        positives.add(E1, 2);
        let matrix = builder.finish(&positives).expect("no violations");

        // cutoffs 0, 250, 500, 750
        let at_250 = matrix.get(E1, 250).expect("cell");
        assert_eq!((at_250.tp, at_250.fp, at_250.tn, at_250.fn_count), (1, 1, 0, 1));

        let at_500 = matrix.get(E1, 500).expect("cell");
        assert_eq!((at_500.tp, at_500.fp, at_500.tn, at_500.fn_count), (1, 0, 1, 1));

        let at_750 = matrix.get(E1, 750).expect("cell");
        assert_eq!((at_750.tp, at_750.fp, at_750.tn, at_750.fn_count), (0, 0, 1, 2));
    }

    #[test]
    fn recording_unregistered_entity_fails() {
        let mut builder = MatrixBuilder::new("DOCS", &ladder(), [E1]);
        let error = builder
            .record(E2, 500, Outcome::Negative)
            .expect_err("unregistered entity");
        assert!(matches!(error, ScoreError::MissingCell { .. }));
    }

    #[test]
    fn more_true_positives_than_known_is_a_violation() {
        let mut builder = MatrixBuilder::new("FILL", &ladder(), [E1]);
        builder.record(E1, 800, Outcome::Positive).expect("known entity");
        builder.record(E1, 800, Outcome::Positive).expect("known entity");

        let mut positives = KnownPositives::new();
        positives.add(E1, 1);
        let error = builder.finish(&positives).expect_err("TP exceeds known");
        match error {
            ScoreError::TruePositivesExceedKnown {
                mode,
                entity,
                cutoff,
                true_positives,
                known_positives,
            } => {
                assert_eq!(mode, "FILL");
                assert_eq!(entity, E1);
                assert_eq!(cutoff, 0);
                assert_eq!(true_positives, 2);
                assert_eq!(known_positives, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn summed_adds_every_entity_per_cutoff() {
        let mut builder = MatrixBuilder::new("DOCS", &ladder(), [E1, E2]);
        builder.record(E1, 600, Outcome::Positive).expect("known entity");
        builder.record(E2, 600, Outcome::Negative).expect("known entity");
        let mut positives = KnownPositives::new();
        positives.add(E1, 1);
        positives.add(E2, 2);
        let matrix = builder.finish(&positives).expect("no violations");

        let totals = matrix.summed();
        let at_0 = totals[&0];
        assert_eq!((at_0.tp, at_0.fp, at_0.fn_count), (1, 1, 2));
        assert_eq!(totals.len(), 4);
    }
}
