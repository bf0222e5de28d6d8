pub mod ccr;
pub mod filters;
pub mod report;
pub mod runs;
pub mod ssf;

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::CommonArgs;
use crate::model::{RunManifestEntry, RunStatus, ScoringManifest};
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

use self::runs::{RunOutcome, RunResult};

/// Writes `<description>-manifest.json` next to the reports, recording what
/// was scored, from which inputs, and how each run ended.
pub(crate) fn finish_session<R>(
    task: &str,
    description: &str,
    common: &CommonArgs,
    inclusion: &str,
    results: &[RunResult<R>],
    scored_assertions: impl Fn(&R) -> usize,
    reports: Vec<PathBuf>,
) -> Result<()> {
    let mut runs = Vec::with_capacity(results.len());
    for result in results {
        let (status, assertions, message) = match &result.outcome {
            RunOutcome::Scored(scored) => (RunStatus::Scored, scored_assertions(scored), None),
            RunOutcome::Skipped(reason) => (RunStatus::Skipped, 0, Some(reason.clone())),
            RunOutcome::Failed(message) => (RunStatus::Failed, 0, Some(message.clone())),
        };

        let sha256 = sha256_file(&result.run.path).unwrap_or_else(|err| {
            warn!(run = %result.run.name, error = %err, "failed to hash run file");
            String::new()
        });

        runs.push(RunManifestEntry {
            run_name: result.run.name.clone(),
            team_id: result.run.team_id.clone(),
            system_id: result.run.system_id.clone(),
            path: result.run.path.display().to_string(),
            sha256,
            status,
            scored_assertions: assertions,
            message,
        });
    }

    let scored = runs
        .iter()
        .filter(|entry| entry.status == RunStatus::Scored)
        .count();
    let skipped = runs
        .iter()
        .filter(|entry| entry.status == RunStatus::Skipped)
        .count();
    let failed = runs.len() - scored - skipped;

    let manifest = ScoringManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        task: task.to_string(),
        description: description.to_string(),
        truth_path: common.truth_path.display().to_string(),
        truth_sha256: sha256_file(&common.truth_path)?,
        cutoff_step: common.cutoff_step,
        inclusion: inclusion.to_string(),
        reports: reports
            .iter()
            .map(|path| path.display().to_string())
            .collect(),
        runs,
    };

    let manifest_path = common
        .output_dir
        .join(format!("{description}-manifest.json"));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        task,
        scored,
        skipped,
        failed,
        manifest = %manifest_path.display(),
        "scoring session completed"
    );

    if scored == 0 {
        bail!("no run in {} could be scored", common.run_dir.display());
    }

    Ok(())
}
