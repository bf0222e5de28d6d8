use thiserror::Error;

/// Failures raised by the scoring core.
///
/// Configuration and input errors abort the current run. The last three
/// variants are internal consistency violations: they mean the truth index or
/// the matrix bookkeeping is wrong, never that the submission is.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("cutoff step must be a positive integer, got {0}")]
    InvalidCutoffStep(u32),

    #[error("found no true positives given the filters ({context})")]
    NoPositives { context: String },

    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: usize,
        expected: String,
        found: usize,
    },

    #[error("line {line}: confidence {value} outside 1..=1000")]
    ConfidenceOutOfRange { line: usize, value: String },

    #[error("line {line}: rating {value} outside -1..=2")]
    RatingOutOfRange { line: usize, value: String },

    #[error("line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("truth data: {0}")]
    MalformedTruth(String),

    #[error("failed to read input")]
    Io(#[from] std::io::Error),

    #[error("failed to parse tab-separated truth data")]
    Csv(#[from] csv::Error),

    #[error("failed to parse JSON truth data")]
    Json(#[from] serde_json::Error),

    #[error(
        "{mode}: entity {entity} at cutoff {cutoff} has TP={true_positives} but only {known_positives} known positives"
    )]
    TruePositivesExceedKnown {
        mode: String,
        entity: String,
        cutoff: u32,
        true_positives: u64,
        known_positives: u64,
    },

    #[error(
        "{metric}={value} outside [0, 1] for {entity} at cutoff {cutoff} (TP={tp} FP={fp} FN={fn_count})"
    )]
    MetricOutOfRange {
        metric: &'static str,
        value: f64,
        entity: String,
        cutoff: u32,
        tp: u64,
        fp: u64,
        fn_count: u64,
    },

    #[error("{mode}: no zeroed confusion cell for entity {entity} at cutoff {cutoff}")]
    MissingCell {
        mode: String,
        entity: String,
        cutoff: u32,
    },
}
