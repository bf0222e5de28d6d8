use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use regex::Regex;
use tracing::{error, info, warn};

use crate::model::RunMetadata;
use crate::scoring::ScoreError;
use crate::util::open_text_reader;

/// A run submission on disk. `name` is the file name without `.gz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFile {
    pub path: PathBuf,
    pub name: String,
    pub team_id: String,
    pub system_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRun<T> {
    pub metadata: Option<RunMetadata>,
    pub rows: Vec<T>,
}

#[derive(Debug)]
pub enum RunContents<T> {
    Rows(ParsedRun<T>),
    /// The run belongs to another task; carries the reason.
    Skipped(String),
}

#[derive(Debug)]
pub enum RunOutcome<R> {
    Scored(R),
    Skipped(String),
    Failed(String),
}

#[derive(Debug)]
pub struct RunResult<R> {
    pub run: RunFile,
    pub outcome: RunOutcome<R>,
}

pub fn discover_runs(run_dir: &Path) -> Result<Vec<RunFile>> {
    let pattern = Regex::new(r"^(?P<team>[^-]+)-(?P<system>.+)$")
        .context("failed to compile run name regex")?;

    let entries = fs::read_dir(run_dir)
        .with_context(|| format!("failed to read run directory {}", run_dir.display()))?;

    let mut runs = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", run_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            warn!(path = %path.display(), "skipping run file with non UTF-8 name");
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }

        let name = run_name(file_name).to_string();
        let (team_id, system_id) = split_run_name(&name, &pattern);
        runs.push(RunFile {
            path: path.clone(),
            name,
            team_id,
            system_id,
        });
    }

    if runs.is_empty() {
        bail!("no run files found in {}", run_dir.display());
    }

    runs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(runs)
}

pub fn run_name(file_name: &str) -> &str {
    file_name.strip_suffix(".gz").unwrap_or(file_name)
}

fn split_run_name(name: &str, pattern: &Regex) -> (String, String) {
    match pattern.captures(name) {
        Some(captures) => (
            captures["team"].to_string(),
            captures["system"].to_string(),
        ),
        None => (name.to_string(), String::new()),
    }
}

/// Reads one run file. `guard` sees the metadata and the first data row and
/// may reject the whole run before any row is parsed.
pub fn read_run<T, P, G>(path: &Path, parse: P, guard: G) -> Result<RunContents<T>>
where
    P: Fn(usize, &str) -> Result<T, ScoreError>,
    G: Fn(Option<&RunMetadata>, &str) -> Option<String>,
{
    let reader = open_text_reader(path)?;

    let mut metadata = None;
    let mut seen_content = false;
    let mut rows = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.with_context(|| {
            format!("failed to read line {line_number} of {}", path.display())
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(comment) = trimmed.strip_prefix('#') {
            if !seen_content {
                metadata = parse_metadata(comment, path);
            }
            seen_content = true;
            continue;
        }

        if rows.is_empty() {
            if let Some(reason) = guard(metadata.as_ref(), trimmed) {
                return Ok(RunContents::Skipped(reason));
            }
        }
        seen_content = true;

        let row = parse(line_number, trimmed)
            .with_context(|| format!("malformed run file {}", path.display()))?;
        rows.push(row);
    }

    Ok(RunContents::Rows(ParsedRun { metadata, rows }))
}

/// Warns when the metadata header names a different team or system than
/// the file name does.
pub fn check_metadata(run: &RunFile, metadata: Option<&RunMetadata>) {
    let Some(metadata) = metadata else {
        return;
    };
    let mismatched = |claimed: Option<&str>, derived: &str| {
        claimed.is_some_and(|claimed| !claimed.is_empty() && claimed != derived)
    };
    if mismatched(metadata.team_id.as_deref(), &run.team_id)
        || mismatched(metadata.system_id.as_deref(), &run.system_id)
    {
        warn!(
            run = %run.name,
            team_id = metadata.team_id.as_deref().unwrap_or_default(),
            system_id = metadata.system_id.as_deref().unwrap_or_default(),
            "run metadata disagrees with the run file name"
        );
    }
}

fn parse_metadata(comment: &str, path: &Path) -> Option<RunMetadata> {
    match serde_json::from_str::<RunMetadata>(comment.trim()) {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "ignoring run metadata line that is not JSON"
            );
            None
        }
    }
}

/// Scores every run on a rayon pool. A failing run is logged and recorded as
/// failed; its siblings keep going. Results come back ordered by run name.
pub fn process_runs<I, R, F>(
    items: Vec<(RunFile, I)>,
    jobs: Option<usize>,
    score: F,
) -> Result<Vec<RunResult<R>>>
where
    I: Send,
    R: Send,
    F: Fn(&RunFile, I) -> Result<RunOutcome<R>> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.unwrap_or(0))
        .build()
        .context("failed to build scoring thread pool")?;
    info!(
        runs = items.len(),
        threads = pool.current_num_threads(),
        "processing runs"
    );

    let mut results: Vec<RunResult<R>> = pool.install(|| {
        items
            .into_par_iter()
            .map(|(run, input)| {
                let outcome = match score(&run, input) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let message = format!("{err:#}");
                        error!(run = %run.name, error = %message, "failed to score run");
                        RunOutcome::Failed(message)
                    }
                };
                if let RunOutcome::Skipped(reason) = &outcome {
                    info!(run = %run.name, reason = %reason, "skipping run");
                }
                RunResult { run, outcome }
            })
            .collect()
    });

    results.sort_by(|a, b| a.run.name.cmp(&b.run.name));
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;
    use crate::scoring::assertion::{has_null_slot_columns, parse_ccr_row};

    const HEADER: &str = r#"#{"team_id": "teamA", "system_id": "sys1", "task_id": "kba-ccr-2013", "poc_email": "a@example.org", "run_info": {"num_rows": 2}}"#;
    const ROWS: &str = "teamA\tsys1\t1330560000-aa\thttp://example.org/E1\t500\t2\n\
                        # trailing comment\n\
                        \n\
                        teamA\tsys1\t1330560001-bb\thttp://example.org/E1\t900\t1\n";

    fn accept_all(_: Option<&RunMetadata>, _: &str) -> Option<String> {
        None
    }

    fn rows_of<T>(contents: RunContents<T>) -> ParsedRun<T> {
        match contents {
            RunContents::Rows(parsed) => parsed,
            RunContents::Skipped(reason) => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn reads_metadata_and_rows_with_line_numbers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("teamA-sys1");
        fs::write(&path, format!("{HEADER}\n{ROWS}")).expect("write run");

        let parsed = rows_of(read_run(&path, parse_ccr_row, accept_all).expect("reads"));
        let metadata = parsed.metadata.expect("metadata");
        assert_eq!(metadata.task_id.as_deref(), Some("kba-ccr-2013"));
        assert!(metadata.extra.contains_key("run_info"));

        let lines: Vec<usize> = parsed.rows.iter().map(|row| row.line).collect();
        assert_eq!(lines, vec![2, 5]);
    }

    #[test]
    fn gzip_runs_read_like_plain_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("teamA-sys1.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(ROWS.as_bytes()).expect("compress");
        fs::write(&path, encoder.finish().expect("finish")).expect("write run");

        let parsed = rows_of(read_run(&path, parse_ccr_row, accept_all).expect("reads"));
        assert!(parsed.metadata.is_none());
        assert_eq!(parsed.rows.len(), 2);
    }

    #[test]
    fn unparseable_metadata_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("teamA-sys1");
        fs::write(&path, format!("# submitted by hand\n{ROWS}")).expect("write run");

        let parsed = rows_of(read_run(&path, parse_ccr_row, accept_all).expect("reads"));
        assert!(parsed.metadata.is_none());
        assert_eq!(parsed.rows.len(), 2);
    }

    #[test]
    fn malformed_rows_fail_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("teamA-sys1");
        fs::write(&path, "teamA\tsys1\t1330560000-aa\tE1\t500\n").expect("write run");

        let err = read_run(&path, parse_ccr_row, accept_all).expect_err("column count");
        assert!(format!("{err:#}").contains("expected 6 or 11 columns"));
    }

    #[test]
    fn guard_sees_the_first_data_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("teamA-sys1");
        fs::write(
            &path,
            "teamA\tsys1\t1330560000-aa\tE1\t500\t2\t1\tNULL\tNULL\tNULL\tNULL\n",
        )
        .expect("write run");

        let contents = read_run(&path, parse_ccr_row, |_, first_row| {
            has_null_slot_columns(first_row).then(|| "null slots".to_string())
        })
        .expect("reads");
        assert!(matches!(contents, RunContents::Skipped(reason) if reason == "null slots"));
    }

    #[test]
    fn metadata_check_tolerates_missing_or_matching_headers() {
        let run = RunFile {
            path: PathBuf::from("teamA-sys1"),
            name: "teamA-sys1".to_string(),
            team_id: "teamA".to_string(),
            system_id: "sys1".to_string(),
        };
        let metadata = RunMetadata {
            team_id: Some("teamA".to_string()),
            system_id: Some("sys2".to_string()),
            ..RunMetadata::default()
        };
        check_metadata(&run, None);
        check_metadata(&run, Some(&metadata));
    }

    #[test]
    fn discovers_runs_sorted_with_team_and_system() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("zteam-b.gz"), b"").expect("write");
        fs::write(dir.path().join("ateam-run-2"), b"").expect("write");
        fs::write(dir.path().join(".hidden"), b"").expect("write");
        fs::create_dir(dir.path().join("overviews")).expect("mkdir");

        let runs = discover_runs(dir.path()).expect("discovers");
        let names: Vec<&str> = runs.iter().map(|run| run.name.as_str()).collect();
        assert_eq!(names, vec!["ateam-run-2", "zteam-b"]);
        assert_eq!(runs[0].team_id, "ateam");
        assert_eq!(runs[0].system_id, "run-2");
    }

    #[test]
    fn empty_run_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(discover_runs(dir.path()).is_err());
    }

    #[test]
    fn one_failing_run_does_not_stop_its_siblings() {
        let runs: Vec<(RunFile, u32)> = ["b-2", "a-1", "c-3"]
            .iter()
            .zip([2, 1, 3])
            .map(|(name, value)| {
                (
                    RunFile {
                        path: PathBuf::from(name),
                        name: name.to_string(),
                        team_id: String::new(),
                        system_id: String::new(),
                    },
                    value,
                )
            })
            .collect();

        let results = process_runs(runs, Some(2), |_, value| {
            if value == 2 {
                bail!("broken run");
            }
            Ok(RunOutcome::Scored(value * 10))
        })
        .expect("pool builds");

        let names: Vec<&str> = results.iter().map(|r| r.run.name.as_str()).collect();
        assert_eq!(names, vec!["a-1", "b-2", "c-3"]);
        assert!(matches!(results[0].outcome, RunOutcome::Scored(10)));
        assert!(matches!(&results[1].outcome, RunOutcome::Failed(message) if message.contains("broken run")));
        assert!(matches!(results[2].outcome, RunOutcome::Scored(30)));
    }
}
