use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::scoring::InclusionThreshold;

#[derive(Parser, Debug)]
#[command(
    name = "kba-scorer",
    version,
    about = "Scores TREC KBA run submissions against assessor truth data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cumulative citation recommendation: document relevance per entity.
    Ccr(CcrArgs),
    /// Streaming slot filling: DOCS, OVERLAP, FILL and DATE_HOUR cascade.
    Ssf(SsfArgs),
}

impl Cli {
    pub fn debug_requested(&self) -> bool {
        match &self.command {
            Commands::Ccr(args) => args.common.debug,
            Commands::Ssf(args) => args.common.debug,
        }
    }
}

/// Flags shared by both tasks.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Directory containing run submission files (plain or .gz).
    pub run_dir: PathBuf,

    /// Truth data file.
    pub truth_path: PathBuf,

    #[arg(long, default_value = "scores")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 50)]
    pub cutoff_step: u32,

    /// Worker threads for scoring runs; defaults to the number of CPUs.
    #[arg(long)]
    pub jobs: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub skip_entities_without_positives: bool,

    #[arg(long, default_value_t = false)]
    pub reject_twitter: bool,

    #[arg(long, default_value_t = false)]
    pub reject_wikipedia: bool,

    /// Limit entities to this topic group (needs --topics-path).
    #[arg(long)]
    pub group: Option<String>,

    /// Limit entities to this entity type (needs --topics-path).
    #[arg(long)]
    pub entity_type: Option<String>,

    #[arg(long)]
    pub topics_path: Option<PathBuf>,

    /// File with one accepted entity id per line.
    #[arg(long)]
    pub restrict: Option<PathBuf>,

    /// Log per-entity assertion diagnostics.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CcrArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long, value_enum, default_value_t = Inclusion::Vital)]
    pub inclusion: Inclusion,

    /// Any judgment at or above the threshold makes a pair positive.
    #[arg(long, default_value_t = false)]
    pub any_up: bool,

    /// Count unjudged (document, entity) pairs as negatives.
    #[arg(long, default_value_t = false)]
    pub unannotated_is_true_negative: bool,

    #[arg(long, default_value_t = 100)]
    pub min_len_clean_visible: u64,

    /// Drop entities with fewer positive truth labels than this (default 1).
    #[arg(long, num_args = 0..=1, default_missing_value = "1")]
    pub require_positives: Option<u64>,

    /// Include documents from the training time range.
    #[arg(long, default_value_t = false)]
    pub include_training: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SsfArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long, value_enum, default_value_t = Inclusion::Neutral)]
    pub inclusion: Inclusion,

    /// Leave assertions on documents without truth out of the DOCS matrix
    /// instead of counting them as negatives.
    #[arg(long, default_value_t = false)]
    pub exclude_unjudged: bool,

    /// Score a single slot type.
    #[arg(long)]
    pub slot_type: Option<String>,

    /// Restrict truth to (document, entity, slot_type) keys some run asserted.
    #[arg(long, default_value_t = false)]
    pub pooled_only: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Inclusion {
    Vital,
    Useful,
    Neutral,
}

impl From<Inclusion> for InclusionThreshold {
    fn from(value: Inclusion) -> Self {
        match value {
            Inclusion::Vital => InclusionThreshold::VitalOnly,
            Inclusion::Useful => InclusionThreshold::VitalUseful,
            Inclusion::Neutral => InclusionThreshold::VitalUsefulNeutral,
        }
    }
}
