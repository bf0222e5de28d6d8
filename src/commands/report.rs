//! CSV reports: one metrics table per run and mode, plus the cross-run
//! overviews.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::{CcrArgs, CommonArgs, SsfArgs};
use crate::commands::runs::RunFile;
use crate::scoring::metrics::{mean, median};
use crate::scoring::ssf::Mode;
use crate::scoring::{AverageKind, CompiledScores, Counts, InclusionThreshold, MaxScores, Score};
use crate::util::ensure_directory;

#[derive(Debug, Serialize)]
struct MetricRow<'a> {
    target_id: &'a str,
    cutoff: u32,
    #[serde(rename = "TP")]
    tp: u64,
    #[serde(rename = "FP")]
    fp: u64,
    #[serde(rename = "FN")]
    fn_count: u64,
    #[serde(rename = "TN")]
    tn: u64,
    #[serde(rename = "P")]
    precision: f64,
    #[serde(rename = "R")]
    recall: f64,
    #[serde(rename = "F")]
    f_score: f64,
    #[serde(rename = "SU")]
    scaled_utility: f64,
}

impl<'a> MetricRow<'a> {
    fn new(target_id: &'a str, cutoff: u32, counts: Counts, score: Score) -> Self {
        Self {
            target_id,
            cutoff,
            tp: counts.tp,
            fp: counts.fp,
            fn_count: counts.fn_count,
            tn: counts.tn,
            precision: score.precision,
            recall: score.recall,
            f_score: score.f_score,
            scaled_utility: score.scaled_utility,
        }
    }
}

/// Best operating points of one run under one description.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_name: String,
    pub team_id: String,
    pub system_id: String,
    pub max_scores: BTreeMap<String, MaxScores>,
}

impl RunSummary {
    pub fn new(run: &RunFile, compiled: &CompiledScores) -> Self {
        Self {
            run_name: run.name.clone(),
            team_id: run.team_id.clone(),
            system_id: run.system_id.clone(),
            max_scores: compiled.max_scores.clone(),
        }
    }
}

pub fn log_best_scores(summary: &RunSummary) {
    for kind in AverageKind::ALL {
        if let Some(best) = summary.max_scores.get(kind.name()) {
            info!(
                run = %summary.run_name,
                average = kind.name(),
                max_f = best.max_f,
                cutoff_at_max_f = best.cutoff_at_max_f,
                max_su = best.max_su,
                "best scores"
            );
        }
    }
}

/// Graphs are not produced; say so once per session.
pub fn tabular_output_only() {
    info!("plot generation is not available; writing CSV tables only");
}

fn describe_entities(args: &CommonArgs) -> String {
    if args.reject_wikipedia && !args.reject_twitter {
        "twitter-only".to_string()
    } else if args.reject_twitter && !args.reject_wikipedia {
        "wikipedia-only".to_string()
    } else if let Some(group) = &args.group {
        format!("{group}-only")
    } else if let Some(entity_type) = &args.entity_type {
        format!("{entity_type}-only")
    } else if args.restrict.is_some() {
        "restricted-entities".to_string()
    } else {
        "all-entities".to_string()
    }
}

pub fn describe_ccr(args: &CcrArgs) -> String {
    format!(
        "ccr-{}-{}-cutoff-step-size-{}",
        describe_entities(&args.common),
        InclusionThreshold::from(args.inclusion).label(),
        args.common.cutoff_step
    )
}

/// `mode` is left out for names covering the whole cascade.
pub fn describe_ssf(args: &SsfArgs, mode: Option<Mode>) -> String {
    let mode = mode.map(|mode| format!("-{}", mode.name())).unwrap_or_default();
    format!(
        "ssf{mode}-{}-{}-cutoff-step-size-{}",
        describe_entities(&args.common),
        args.slot_type.as_deref().unwrap_or("all"),
        args.common.cutoff_step
    )
}

pub fn run_report_path(output_dir: &Path, run_name: &str, description: &str) -> PathBuf {
    output_dir.join(format!("{run_name}-{description}.csv"))
}

/// Rows sorted by name, then descending cutoff; the three averages carry
/// the summed counts.
pub fn write_run_report(path: &Path, compiled: &CompiledScores) -> Result<()> {
    let matrix = &compiled.matrix;
    let mut rows: Vec<MetricRow<'_>> = Vec::new();

    for entity in matrix.entities() {
        for &cutoff in matrix.cutoffs() {
            let (Some(counts), Some(score)) = (
                matrix.get(entity, cutoff),
                compiled.entity_scores.get(entity, cutoff),
            ) else {
                continue;
            };
            rows.push(MetricRow::new(entity, cutoff, counts, score));
        }
    }

    for kind in AverageKind::ALL {
        let Some(series) = compiled.average(kind) else {
            continue;
        };
        for (cutoff, score) in series {
            let counts = compiled.summed.get(cutoff).copied().unwrap_or_default();
            rows.push(MetricRow::new(kind.name(), *cutoff, counts, *score));
        }
    }

    rows.sort_by(|a, b| {
        a.target_id
            .cmp(b.target_id)
            .then(b.cutoff.cmp(&a.cutoff))
    });

    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for row in &rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// Writes `<output>/overviews/<description>-{run,target_id}-overview.csv`.
pub fn write_overviews(
    output_dir: &Path,
    description: &str,
    summaries: &[RunSummary],
) -> Result<Vec<PathBuf>> {
    let overview_dir = output_dir.join("overviews");
    ensure_directory(&overview_dir)?;

    let run_path = overview_dir.join(format!("{description}-run-overview.csv"));
    write_run_overview(&run_path, summaries)?;

    let target_path = overview_dir.join(format!("{description}-target_id-overview.csv"));
    write_target_overview(&target_path, summaries)?;

    info!(
        runs = summaries.len(),
        run_overview = %run_path.display(),
        target_overview = %target_path.display(),
        "wrote overviews"
    );
    Ok(vec![run_path, target_path])
}

fn write_run_overview(path: &Path, summaries: &[RunSummary]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let mut header = vec!["team_id".to_string(), "system_id".to_string()];
    for kind in AverageKind::ALL {
        for metric in ["P", "R", "F", "SU"] {
            header.push(format!("{}_{metric}", kind.name()));
        }
    }
    writer
        .write_record(&header)
        .with_context(|| format!("failed to write {}", path.display()))?;

    for summary in summaries {
        let mut record = vec![summary.team_id.clone(), summary.system_id.clone()];
        for kind in AverageKind::ALL {
            let best = summary
                .max_scores
                .get(kind.name())
                .copied()
                .unwrap_or_default();
            record.extend(
                [
                    best.precision_at_max_f,
                    best.recall_at_max_f,
                    best.max_f,
                    best.max_su,
                ]
                .iter()
                .map(f64::to_string),
            );
        }
        writer
            .write_record(&record)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn write_target_overview(path: &Path, summaries: &[RunSummary]) -> Result<()> {
    let mut by_target: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for summary in summaries {
        for (target, best) in &summary.max_scores {
            let (f_values, su_values) = by_target.entry(target.as_str()).or_default();
            f_values.push(best.max_f);
            su_values.push(best.max_su);
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer
        .write_record([
            "target_id", "maxF", "medianF", "meanF", "minF", "maxSU", "medianSU", "meanSU",
            "minSU",
        ])
        .with_context(|| format!("failed to write {}", path.display()))?;

    for (target, (f_values, su_values)) in &by_target {
        let mut record = vec![target.to_string()];
        record.extend(spread(f_values).iter().map(f64::to_string));
        record.extend(spread(su_values).iter().map(f64::to_string));
        writer
            .write_record(&record)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// max, median, mean, min
fn spread(values: &[f64]) -> [f64; 4] {
    if values.is_empty() {
        return [0.0; 4];
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    [
        max,
        median(values).unwrap_or(0.0),
        mean(values).unwrap_or(0.0),
        min,
    ]
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::scoring::compile;
    use crate::scoring::config::CutoffLadder;
    use crate::scoring::confusion::{KnownPositives, MatrixBuilder, Outcome};

    const E1: &str = "http://example.org/E1";
    const E2: &str = "http://example.org/E2";

    fn compiled() -> CompiledScores {
        let ladder = CutoffLadder::new(500).expect("valid step");
        let mut builder = MatrixBuilder::new("CCR", &ladder, [E1, E2]);
        builder.record(E1, 700, Outcome::Positive).expect("record");
        builder.record(E2, 300, Outcome::Negative).expect("record");

        let mut positives = KnownPositives::new();
        positives.add(E1, 1);
        positives.add(E2, 1);
        compile(builder.finish(&positives).expect("finish")).expect("compile")
    }

    fn run(name: &str, team: &str, system: &str) -> RunFile {
        RunFile {
            path: PathBuf::from(name),
            name: name.to_string(),
            team_id: team.to_string(),
            system_id: system.to_string(),
        }
    }

    #[test]
    fn run_report_sorts_by_name_then_descending_cutoff() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = run_report_path(dir.path(), "teamA-sys1", "ccr-all-entities");
        write_run_report(&path, &compiled()).expect("writes");

        let text = fs::read_to_string(&path).expect("read report");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "target_id,cutoff,TP,FP,FN,TN,P,R,F,SU");
        assert!(lines[1].starts_with("http://example.org/E1,500,1,0,0,0,"));
        assert!(lines[2].starts_with("http://example.org/E1,0,1,0,0,0,"));
        assert!(lines[5].starts_with("macro_average,500,"));
        assert!(lines[7].starts_with("micro_average,500,1,0,1,1,"));
        assert_eq!(lines.len(), 1 + 2 * 5);
    }

    #[test]
    fn overviews_cover_every_run_and_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scores = compiled();
        let summaries = vec![
            RunSummary::new(&run("teamA-sys1", "teamA", "sys1"), &scores),
            RunSummary::new(&run("teamB-sys2", "teamB", "sys2"), &scores),
        ];

        let paths = write_overviews(dir.path(), "ccr-test", &summaries).expect("writes");
        assert_eq!(paths.len(), 2);

        let runs = fs::read_to_string(&paths[0]).expect("read run overview");
        let run_lines: Vec<&str> = runs.lines().collect();
        assert!(run_lines[0].starts_with("team_id,system_id,micro_average_P,"));
        assert!(run_lines[1].starts_with("teamA,sys1,"));
        assert_eq!(run_lines.len(), 3);

        let targets = fs::read_to_string(&paths[1]).expect("read target overview");
        let e1_line = targets
            .lines()
            .find(|line| line.starts_with(E1))
            .expect("E1 row");
        assert_eq!(e1_line, format!("{E1},1,1,1,1,1,1,1,1"));
        // E1, E2 and the three averages.
        assert_eq!(targets.lines().count(), 1 + 5);
    }

    #[test]
    fn spread_of_values() {
        assert_eq!(spread(&[0.2, 0.8, 0.5]), [0.8, 0.5, 0.5, 0.2]);
        assert_eq!(spread(&[]), [0.0; 4]);
    }
}
