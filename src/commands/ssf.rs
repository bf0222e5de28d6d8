use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::SsfArgs;
use crate::commands::filters::EntityFilter;
use crate::commands::finish_session;
use crate::commands::report::{
    RunSummary, describe_ssf, log_best_scores, run_report_path, tabular_output_only,
    write_overviews, write_run_report,
};
use crate::commands::runs::{
    ParsedRun, RunContents, RunFile, RunOutcome, RunResult, check_metadata, discover_runs,
    process_runs, read_run,
};
use crate::model::RunMetadata;
use crate::scoring::assertion::{has_null_slot_columns, parse_ssf_row};
use crate::scoring::ssf::{DocumentKey, asserted_document_keys};
use crate::scoring::{Mode, ScoringConfig, SlotAssertion, SsfTruth, compile, score_ssf_run};
use crate::util::{ensure_directory, open_text_reader};

pub(crate) struct ScoredRun {
    pub summaries: BTreeMap<Mode, RunSummary>,
    pub scored_assertions: usize,
    pub report_paths: Vec<PathBuf>,
}

pub fn run(args: SsfArgs) -> Result<()> {
    let config = scoring_config(&args)?;
    let filter = EntityFilter::from_args(&args.common)?;
    let description = describe_ssf(&args, None);
    let output_dir = args.common.output_dir.clone();
    ensure_directory(&output_dir)?;

    let truth_path = &args.common.truth_path;
    let reader = open_text_reader(truth_path)?;
    let mut truth = SsfTruth::from_reader(
        reader,
        |entity| filter.rejects(entity),
        config.slot_type_filter.as_deref(),
    )
    .with_context(|| format!("failed to load SSF truth data {}", truth_path.display()))?;

    let runs = discover_runs(&args.common.run_dir)?;
    info!(runs = runs.len(), description = %description, "reading SSF runs");
    tabular_output_only();

    let items = runs.into_iter().map(|run| (run, ())).collect();
    let mut results = if config.pooled_only {
        score_pooled(items, &mut truth, &config, &output_dir, &args)?
    } else {
        process_runs(items, args.common.jobs, |run, ()| match parse_run(run)? {
            RunOutcome::Scored(parsed) => {
                score_run(run, parsed, &truth, &config, &output_dir, &args)
            }
            RunOutcome::Skipped(reason) => Ok(RunOutcome::Skipped(reason)),
            RunOutcome::Failed(message) => Ok(RunOutcome::Failed(message)),
        })?
    };
    results.sort_by(|a, b| a.run.name.cmp(&b.run.name));

    let mut reports: Vec<PathBuf> = Vec::new();
    for result in &results {
        if let RunOutcome::Scored(scored) = &result.outcome {
            reports.extend(scored.report_paths.iter().cloned());
        }
    }
    for mode in Mode::ALL {
        let summaries: Vec<RunSummary> = results
            .iter()
            .filter_map(|result| match &result.outcome {
                RunOutcome::Scored(scored) => scored.summaries.get(&mode).cloned(),
                _ => None,
            })
            .collect();
        if !summaries.is_empty() {
            let mode_description = describe_ssf(&args, Some(mode));
            reports.extend(write_overviews(&output_dir, &mode_description, &summaries)?);
        }
    }

    finish_session(
        "ssf",
        &description,
        &args.common,
        config.inclusion.label(),
        &results,
        |scored| scored.scored_assertions,
        reports,
    )
}

/// Pooling needs every run's keys before truth is final, so all runs are
/// parsed up front and scored in a second pass.
fn score_pooled(
    items: Vec<(RunFile, ())>,
    truth: &mut SsfTruth,
    config: &ScoringConfig,
    output_dir: &Path,
    args: &SsfArgs,
) -> Result<Vec<RunResult<ScoredRun>>> {
    let parsed = process_runs(items, args.common.jobs, |run, ()| parse_run(run))?;

    let asserted: BTreeSet<DocumentKey> = parsed
        .iter()
        .filter_map(|result| match &result.outcome {
            RunOutcome::Scored(parsed_run) => Some(asserted_document_keys(&parsed_run.rows)),
            _ => None,
        })
        .flatten()
        .collect();
    truth
        .retain_pooled(&asserted)
        .context("no truth data left after restricting to pooled documents")?;

    let mut carried = Vec::new();
    let mut results = Vec::new();
    for result in parsed {
        match result.outcome {
            RunOutcome::Scored(rows) => carried.push((result.run, rows)),
            RunOutcome::Skipped(reason) => results.push(RunResult {
                run: result.run,
                outcome: RunOutcome::Skipped(reason),
            }),
            RunOutcome::Failed(message) => results.push(RunResult {
                run: result.run,
                outcome: RunOutcome::Failed(message),
            }),
        }
    }

    let truth: &SsfTruth = truth;
    results.extend(process_runs(carried, args.common.jobs, |run, parsed| {
        score_run(run, parsed, truth, config, output_dir, args)
    })?);
    Ok(results)
}

fn scoring_config(args: &SsfArgs) -> Result<ScoringConfig> {
    let mut config = ScoringConfig::new(args.common.cutoff_step)?;
    config.inclusion = args.inclusion.into();
    config.unjudged_is_negative = !args.exclude_unjudged;
    config.skip_entities_without_positives = args.common.skip_entities_without_positives;
    config.slot_type_filter = args.slot_type.clone();
    config.pooled_only = args.pooled_only;
    Ok(config)
}

/// CCR submissions sometimes land in SSF run directories; they are skipped
/// on their task id or on `NULL` slot columns.
fn ssf_guard(metadata: Option<&RunMetadata>, first_row: &str) -> Option<String> {
    if let Some(task_id) = metadata.and_then(|metadata| metadata.task_id.as_deref()) {
        if !task_id.contains("ssf") {
            return Some(format!("task_id {task_id:?} is not an SSF task"));
        }
    }
    if has_null_slot_columns(first_row) {
        return Some("first row has NULL slot columns".to_string());
    }
    None
}

fn parse_run(run: &RunFile) -> Result<RunOutcome<ParsedRun<SlotAssertion>>> {
    match read_run(&run.path, parse_ssf_row, ssf_guard)? {
        RunContents::Rows(parsed) => {
            check_metadata(run, parsed.metadata.as_ref());
            if parsed.rows.is_empty() {
                warn!(run = %run.name, "run has no assertions");
            }
            Ok(RunOutcome::Scored(parsed))
        }
        RunContents::Skipped(reason) => Ok(RunOutcome::Skipped(reason)),
    }
}

fn score_run(
    run: &RunFile,
    parsed: ParsedRun<SlotAssertion>,
    truth: &SsfTruth,
    config: &ScoringConfig,
    output_dir: &Path,
    args: &SsfArgs,
) -> Result<RunOutcome<ScoredRun>> {
    let scored = score_ssf_run(parsed.rows, truth, config)
        .with_context(|| format!("failed to score run {}", run.name))?;
    let scored_assertions = scored.scored_assertions;
    let survivors = scored.survivors;

    let mut summaries = BTreeMap::new();
    let mut report_paths = Vec::new();
    for (mode, matrix) in scored.matrices {
        let compiled = compile(matrix).with_context(|| {
            format!("failed to compile {} metrics for run {}", mode.name(), run.name)
        })?;

        let report_path = run_report_path(output_dir, &run.name, &describe_ssf(args, Some(mode)));
        write_run_report(&report_path, &compiled)?;
        report_paths.push(report_path);

        let summary = RunSummary::new(run, &compiled);
        info!(
            run = %run.name,
            mode = mode.name(),
            survivors = survivors.get(&mode).copied().unwrap_or_default(),
            "scored SSF stage"
        );
        log_best_scores(&summary);
        summaries.insert(mode, summary);
    }

    Ok(RunOutcome::Scored(ScoredRun {
        summaries,
        scored_assertions,
        report_paths,
    }))
}
