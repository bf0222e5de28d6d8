use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::CcrArgs;
use crate::commands::filters::EntityFilter;
use crate::commands::finish_session;
use crate::commands::report::{
    RunSummary, describe_ccr, log_best_scores, run_report_path, tabular_output_only,
    write_overviews, write_run_report,
};
use crate::commands::runs::{
    RunContents, RunFile, RunOutcome, check_metadata, discover_runs, process_runs, read_run,
};
use crate::scoring::assertion::parse_ccr_row;
use crate::scoring::{CcrTruth, MergePolicy, ScoringConfig, compile, score_ccr_run};
use crate::util::{ensure_directory, open_text_reader};

pub(crate) struct ScoredRun {
    pub summary: RunSummary,
    pub scored_assertions: usize,
    pub report_path: PathBuf,
}

pub fn run(args: CcrArgs) -> Result<()> {
    let config = scoring_config(&args)?;
    let filter = EntityFilter::from_args(&args.common)?;
    let description = describe_ccr(&args);
    let output_dir = args.common.output_dir.clone();
    ensure_directory(&output_dir)?;

    let truth_path = &args.common.truth_path;
    let reader = open_text_reader(truth_path)?;
    let truth = CcrTruth::from_reader(reader, &config, |entity| filter.rejects(entity))
        .with_context(|| format!("failed to load CCR truth data {}", truth_path.display()))?;

    let runs = discover_runs(&args.common.run_dir)?;
    info!(runs = runs.len(), description = %description, "scoring CCR runs");
    tabular_output_only();

    let items = runs.into_iter().map(|run| (run, ())).collect();
    let results = process_runs(items, args.common.jobs, |run, ()| {
        score_run(
            run,
            &truth,
            &config,
            &output_dir,
            &description,
            args.common.debug,
        )
    })?;

    let summaries: Vec<RunSummary> = results
        .iter()
        .filter_map(|result| match &result.outcome {
            RunOutcome::Scored(scored) => Some(scored.summary.clone()),
            _ => None,
        })
        .collect();
    let mut reports: Vec<PathBuf> = results
        .iter()
        .filter_map(|result| match &result.outcome {
            RunOutcome::Scored(scored) => Some(scored.report_path.clone()),
            _ => None,
        })
        .collect();
    if !summaries.is_empty() {
        reports.extend(write_overviews(&output_dir, &description, &summaries)?);
    }

    finish_session(
        "ccr",
        &description,
        &args.common,
        config.inclusion.label(),
        &results,
        |scored| scored.scored_assertions,
        reports,
    )
}

fn scoring_config(args: &CcrArgs) -> Result<ScoringConfig> {
    let mut config = ScoringConfig::new(args.common.cutoff_step)?;
    config.inclusion = args.inclusion.into();
    config.merge_policy = if args.any_up {
        MergePolicy::AnyUp
    } else {
        MergePolicy::ConservativeDown
    };
    config.unjudged_is_negative = args.unannotated_is_true_negative;
    config.require_positives = args.require_positives;
    config.min_clean_visible_len = args.min_len_clean_visible;
    config.include_training = args.include_training;
    config.skip_entities_without_positives = args.common.skip_entities_without_positives;
    Ok(config)
}

fn score_run(
    run: &RunFile,
    truth: &CcrTruth,
    config: &ScoringConfig,
    output_dir: &Path,
    description: &str,
    debug_counts: bool,
) -> Result<RunOutcome<ScoredRun>> {
    let parsed = match read_run(&run.path, parse_ccr_row, |_, _| None)? {
        RunContents::Rows(parsed) => parsed,
        RunContents::Skipped(reason) => return Ok(RunOutcome::Skipped(reason)),
    };
    check_metadata(run, parsed.metadata.as_ref());

    let scored = score_ccr_run(parsed.rows, truth, config)
        .with_context(|| format!("failed to score run {}", run.name))?;

    if debug_counts {
        for (entity, counts) in &scored.assertion_counts {
            debug!(
                run = %run.name,
                entity = %entity,
                total = counts.total,
                in_training_range = counts.in_training_range,
                in_annotation_set = counts.in_annotation_set,
                "assertion counts"
            );
        }
    }

    let scored_assertions = scored.scored_assertions;
    let compiled = compile(scored.matrix)
        .with_context(|| format!("failed to compile metrics for run {}", run.name))?;

    let report_path = run_report_path(output_dir, &run.name, description);
    write_run_report(&report_path, &compiled)?;

    let summary = RunSummary::new(run, &compiled);
    log_best_scores(&summary);

    Ok(RunOutcome::Scored(ScoredRun {
        summary,
        scored_assertions,
        report_path,
    }))
}
