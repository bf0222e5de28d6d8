//! Turns frozen confusion matrices into P/R/F/SU per entity and per average.

use std::collections::BTreeMap;

use serde::Serialize;

use super::confusion::{ConfusionMatrix, Counts};
use super::error::ScoreError;
use super::metrics::{DEFAULT_MIN_NORMALIZED_UTILITY, fscore, precision, recall, scaled_utility};

/// Floating-point slack tolerated when range-checking averaged metrics.
const RANGE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Score {
    #[serde(rename = "P")]
    pub precision: f64,
    #[serde(rename = "R")]
    pub recall: f64,
    #[serde(rename = "F")]
    pub f_score: f64,
    #[serde(rename = "SU")]
    pub scaled_utility: f64,
}

impl Score {
    pub fn from_counts(counts: &Counts, name: &str, cutoff: u32) -> Result<Self, ScoreError> {
        let p = precision(counts.tp, counts.fp);
        let r = recall(counts.tp, counts.fn_count);
        let su = scaled_utility(
            counts.tp,
            counts.fp,
            counts.fn_count,
            DEFAULT_MIN_NORMALIZED_UTILITY,
        );
        Self::checked(p, r, su, name, cutoff, counts)
    }

    /// Builds a score whose F is recomputed from `p` and `r`; all four values
    /// must land in `[0, 1]`.
    fn checked(
        p: f64,
        r: f64,
        su: f64,
        name: &str,
        cutoff: u32,
        counts: &Counts,
    ) -> Result<Self, ScoreError> {
        let p = in_unit_interval("P", p, name, cutoff, counts)?;
        let r = in_unit_interval("R", r, name, cutoff, counts)?;
        let su = in_unit_interval("SU", su, name, cutoff, counts)?;
        let f = in_unit_interval("F", fscore(p, r), name, cutoff, counts)?;
        Ok(Self {
            precision: p,
            recall: r,
            f_score: f,
            scaled_utility: su,
        })
    }
}

fn in_unit_interval(
    metric: &'static str,
    value: f64,
    name: &str,
    cutoff: u32,
    counts: &Counts,
) -> Result<f64, ScoreError> {
    if value.is_nan() || !(-RANGE_EPSILON..=1.0 + RANGE_EPSILON).contains(&value) {
        return Err(ScoreError::MetricOutOfRange {
            metric,
            value,
            entity: name.to_string(),
            cutoff,
            tp: counts.tp,
            fp: counts.fp,
            fn_count: counts.fn_count,
        });
    }
    Ok(value.clamp(0.0, 1.0))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AverageKind {
    Micro,
    Macro,
    Weighted,
}

impl AverageKind {
    pub const ALL: [AverageKind; 3] = [Self::Micro, Self::Macro, Self::Weighted];

    pub fn name(self) -> &'static str {
        match self {
            Self::Micro => "micro_average",
            Self::Macro => "macro_average",
            Self::Weighted => "weighted_average",
        }
    }
}

/// Scores keyed by `(entity, cutoff)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    scores: BTreeMap<(String, u32), Score>,
}

impl ScoreTable {
    pub fn get(&self, entity: &str, cutoff: u32) -> Option<Score> {
        self.scores.get(&(entity.to_string(), cutoff)).copied()
    }

    pub fn series(&self, entity: &str) -> impl Iterator<Item = (u32, Score)> + '_ {
        let from = (entity.to_string(), u32::MIN);
        let to = (entity.to_string(), u32::MAX);
        self.scores
            .range(from..=to)
            .map(|((_, cutoff), score)| (*cutoff, *score))
    }
}

/// Best operating points along one series of cutoffs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MaxScores {
    #[serde(rename = "F")]
    pub max_f: f64,
    #[serde(rename = "P")]
    pub precision_at_max_f: f64,
    #[serde(rename = "R")]
    pub recall_at_max_f: f64,
    pub cutoff_at_max_f: u32,
    #[serde(rename = "SU")]
    pub max_su: f64,
    pub cutoff_at_max_su: u32,
}

/// Everything derived from one stage's matrix. Immutable once built.
#[derive(Debug, Clone)]
pub struct CompiledScores {
    pub matrix: ConfusionMatrix,
    pub entity_scores: ScoreTable,
    pub summed: BTreeMap<u32, Counts>,
    pub averages: BTreeMap<AverageKind, BTreeMap<u32, Score>>,
    pub max_scores: BTreeMap<String, MaxScores>,
}

impl CompiledScores {
    pub fn average(&self, kind: AverageKind) -> Option<&BTreeMap<u32, Score>> {
        self.averages.get(&kind)
    }

    #[cfg(test)]
    pub fn max_for(&self, name: &str) -> Option<&MaxScores> {
        self.max_scores.get(name)
    }
}

pub fn compile_performance_metrics(matrix: &ConfusionMatrix) -> Result<ScoreTable, ScoreError> {
    let mut scores = BTreeMap::new();
    for (entity, cutoff, counts) in matrix.cells() {
        let score = Score::from_counts(&counts, entity, cutoff)?;
        scores.insert((entity.to_string(), cutoff), score);
    }
    Ok(ScoreTable { scores })
}

/// Sum raw counts over entities, then score the summed matrix.
pub fn micro_average(matrix: &ConfusionMatrix) -> Result<BTreeMap<u32, Score>, ScoreError> {
    matrix
        .summed()
        .into_iter()
        .map(|(cutoff, counts)| {
            Score::from_counts(&counts, AverageKind::Micro.name(), cutoff).map(|s| (cutoff, s))
        })
        .collect()
}

/// Unweighted mean of per-entity P, R and SU; F is recomputed from the mean
/// P and mean R, never averaged.
pub fn macro_average(
    matrix: &ConfusionMatrix,
    table: &ScoreTable,
) -> Result<BTreeMap<u32, Score>, ScoreError> {
    let entities: Vec<&str> = matrix.entities().collect();
    let weight = if entities.is_empty() {
        0.0
    } else {
        1.0 / entities.len() as f64
    };
    let weights: Vec<(&str, f64)> = entities.iter().map(|entity| (*entity, weight)).collect();
    weighted_mean(AverageKind::Macro, matrix, table, &weights)
}

/// Like the macro average, but each entity weighs its share of all known
/// positives (TP + FN at the lowest cutoff).
pub fn weighted_average(
    matrix: &ConfusionMatrix,
    table: &ScoreTable,
) -> Result<BTreeMap<u32, Score>, ScoreError> {
    let floor = matrix.cutoffs().first().copied().unwrap_or(0);
    let positives: Vec<(&str, u64)> = matrix
        .entities()
        .map(|entity| {
            let known = matrix
                .get(entity, floor)
                .map(|counts| counts.tp + counts.fn_count)
                .unwrap_or(0);
            (entity, known)
        })
        .collect();

    let total: u64 = positives.iter().map(|(_, known)| known).sum();
    let weights: Vec<(&str, f64)> = positives
        .into_iter()
        .map(|(entity, known)| {
            let weight = if total == 0 {
                0.0
            } else {
                known as f64 / total as f64
            };
            (entity, weight)
        })
        .collect();
    weighted_mean(AverageKind::Weighted, matrix, table, &weights)
}

fn weighted_mean(
    kind: AverageKind,
    matrix: &ConfusionMatrix,
    table: &ScoreTable,
    weights: &[(&str, f64)],
) -> Result<BTreeMap<u32, Score>, ScoreError> {
    let summed = matrix.summed();
    let mut averages = BTreeMap::new();

    for &cutoff in matrix.cutoffs() {
        let (mut p, mut r, mut su) = (0.0_f64, 0.0_f64, 0.0_f64);
        for (entity, weight) in weights {
            let Some(score) = table.get(entity, cutoff) else {
                continue;
            };
            p += weight * score.precision;
            r += weight * score.recall;
            su += weight * score.scaled_utility;
        }

        let counts = summed.get(&cutoff).copied().unwrap_or_default();
        let score = Score::checked(p, r, su, kind.name(), cutoff, &counts)?;
        averages.insert(cutoff, score);
    }

    Ok(averages)
}

/// Max SU and, independently, max F with the P and R that produced it.
/// Ties keep the lowest cutoff.
pub fn find_max_scores(series: impl IntoIterator<Item = (u32, Score)>) -> MaxScores {
    let mut best: Option<MaxScores> = None;
    for (cutoff, score) in series {
        let current = best.get_or_insert(MaxScores {
            max_f: score.f_score,
            precision_at_max_f: score.precision,
            recall_at_max_f: score.recall,
            cutoff_at_max_f: cutoff,
            max_su: score.scaled_utility,
            cutoff_at_max_su: cutoff,
        });

        if score.f_score > current.max_f {
            current.max_f = score.f_score;
            current.precision_at_max_f = score.precision;
            current.recall_at_max_f = score.recall;
            current.cutoff_at_max_f = cutoff;
        }
        if score.scaled_utility > current.max_su {
            current.max_su = score.scaled_utility;
            current.cutoff_at_max_su = cutoff;
        }
    }
    best.unwrap_or_default()
}

pub fn compile(matrix: ConfusionMatrix) -> Result<CompiledScores, ScoreError> {
    let entity_scores = compile_performance_metrics(&matrix)?;

    let mut averages = BTreeMap::new();
    averages.insert(AverageKind::Micro, micro_average(&matrix)?);
    averages.insert(AverageKind::Macro, macro_average(&matrix, &entity_scores)?);
    averages.insert(
        AverageKind::Weighted,
        weighted_average(&matrix, &entity_scores)?,
    );

    let mut max_scores = BTreeMap::new();
    for entity in matrix.entities() {
        max_scores.insert(
            entity.to_string(),
            find_max_scores(entity_scores.series(entity)),
        );
    }
    for (kind, series) in &averages {
        max_scores.insert(
            kind.name().to_string(),
            find_max_scores(series.iter().map(|(cutoff, score)| (*cutoff, *score))),
        );
    }

    let summed = matrix.summed();
    Ok(CompiledScores {
        matrix,
        entity_scores,
        summed,
        averages,
        max_scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::config::CutoffLadder;
    use crate::scoring::confusion::{KnownPositives, MatrixBuilder, Outcome};

    const E1: &str = "http://example.org/E1";
    const E2: &str = "http://example.org/E2";

    /// E1: 1 TP, 0 FP, 3 FN (P=1, R=0.25); E2: 1 TP, 3 FP, 0 FN (P=0.25, R=1).
    fn lopsided_matrix() -> ConfusionMatrix {
        let ladder = CutoffLadder::new(500).expect("valid step");
        let mut builder = MatrixBuilder::new("DOCS", &ladder, [E1, E2]);
        builder.record(E1, 900, Outcome::Positive).expect("known entity");
        builder.record(E2, 900, Outcome::Positive).expect("known entity");
        for _ in 0..3 {
            builder.record(E2, 900, Outcome::Negative).expect("known entity");
        }

        let mut positives = KnownPositives::new();
        positives.add(E1, 4);
        positives.add(E2, 1);
        builder.finish(&positives).expect("no violations")
    }

    #[test]
    fn macro_f_is_recomputed_from_averaged_p_and_r() {
        let matrix = lopsided_matrix();
        let table = compile_performance_metrics(&matrix).expect("valid metrics");
        let macro_avg = macro_average(&matrix, &table).expect("valid average");

        let at_0 = macro_avg[&0];
        assert!((at_0.precision - 0.625).abs() < 1e-12);
        assert!((at_0.recall - 0.625).abs() < 1e-12);
        assert!((at_0.f_score - fscore(0.625, 0.625)).abs() < 1e-12);

        let mean_entity_f = (table.get(E1, 0).expect("E1").f_score
            + table.get(E2, 0).expect("E2").f_score)
            / 2.0;
        assert!(
            (at_0.f_score - mean_entity_f).abs() > 0.1,
            "macro F {} should differ from mean entity F {}",
            at_0.f_score,
            mean_entity_f
        );
    }

    #[test]
    fn micro_average_scores_the_summed_matrix() {
        let matrix = lopsided_matrix();
        let micro = micro_average(&matrix).expect("valid average");
        let at_0 = micro[&0];
        // summed: TP=2, FP=3, FN=3
        assert!((at_0.precision - 0.4).abs() < 1e-12);
        assert!((at_0.recall - 0.4).abs() < 1e-12);
    }

    #[test]
    fn weighted_average_follows_share_of_known_positives() {
        let matrix = lopsided_matrix();
        let table = compile_performance_metrics(&matrix).expect("valid metrics");
        let weighted = weighted_average(&matrix, &table).expect("valid average");
        let at_0 = weighted[&0];
        // weights 4/5 and 1/5
        assert!((at_0.precision - (0.8 * 1.0 + 0.2 * 0.25)).abs() < 1e-12);
        assert!((at_0.recall - (0.8 * 0.25 + 0.2 * 1.0)).abs() < 1e-12);
    }

    #[test]
    fn weighted_average_is_zero_without_positives() {
        let ladder = CutoffLadder::new(500).expect("valid step");
        let mut builder = MatrixBuilder::new("DOCS", &ladder, [E1]);
        builder.record(E1, 900, Outcome::Negative).expect("known entity");
        let matrix = builder.finish(&KnownPositives::new()).expect("no violations");
        let table = compile_performance_metrics(&matrix).expect("valid metrics");
        let weighted = weighted_average(&matrix, &table).expect("valid average");
        assert_eq!(weighted[&0], Score::default());
    }

    #[test]
    fn max_f_reports_p_and_r_from_the_same_cutoff() {
        let series = vec![
            (
                0,
                Score {
                    precision: 0.2,
                    recall: 1.0,
                    f_score: fscore(0.2, 1.0),
                    scaled_utility: 0.1,
                },
            ),
            (
                50,
                Score {
                    precision: 0.5,
                    recall: 0.5,
                    f_score: 0.5,
                    scaled_utility: 0.4,
                },
            ),
            (
                100,
                Score {
                    precision: 1.0,
                    recall: 0.1,
                    f_score: fscore(1.0, 0.1),
                    scaled_utility: 0.6,
                },
            ),
        ];

        let best = find_max_scores(series);
        assert_eq!(best.max_f, 0.5);
        assert_eq!(best.precision_at_max_f, 0.5);
        assert_eq!(best.recall_at_max_f, 0.5);
        assert_eq!(best.cutoff_at_max_f, 50);
        assert_eq!(best.max_su, 0.6);
        assert_eq!(best.cutoff_at_max_su, 100);
    }

    #[test]
    fn compiling_twice_is_bit_for_bit_identical() {
        let first = compile(lopsided_matrix()).expect("compiles");
        let second = compile(lopsided_matrix()).expect("compiles");
        assert_eq!(first.entity_scores, second.entity_scores);
        assert_eq!(first.averages, second.averages);
        assert_eq!(first.max_scores, second.max_scores);
        assert_eq!(first.summed, second.summed);
    }

    #[test]
    fn compiled_scores_include_every_average_and_entity() {
        let compiled = compile(lopsided_matrix()).expect("compiles");
        for kind in AverageKind::ALL {
            assert!(compiled.average(kind).is_some());
            assert!(compiled.max_for(kind.name()).is_some());
        }
        assert!(compiled.max_for(E1).is_some());
        assert!(compiled.max_for(E2).is_some());
    }
}
