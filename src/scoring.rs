//! Scoring core: truth loading, assertion dedup, confusion matrices over a
//! cutoff ladder, and the metric compiler. Nothing in here touches the
//! filesystem; commands hand in readers and parsed rows.

pub mod aggregate;
pub mod assertion;
pub mod ccr;
pub mod config;
pub mod confusion;
pub mod dedup;
pub mod error;
pub mod metrics;
pub mod ssf;

#[cfg(test)]
mod tests;

pub use aggregate::{AverageKind, CompiledScores, MaxScores, Score, compile};
pub use assertion::{Assertion, SlotAssertion};
pub use ccr::{CcrTruth, score_ccr_run};
pub use config::{InclusionThreshold, MergePolicy, ScoringConfig};
pub use confusion::{ConfusionMatrix, Counts};
pub use error::ScoreError;
pub use ssf::{Mode, SsfTruth, score_ssf_run};
