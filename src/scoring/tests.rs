use super::*;
use crate::scoring::assertion::parse_ccr_row;

const E1: &str = "http://example.org/E1";
const DOC: &str = "1000000000-aaaa0000000000000000000000000000";

fn run_rows() -> Vec<Assertion> {
    [
        format!("run1\tteamA\t{DOC}\t{E1}\t400\t2"),
        format!("run1\tteamA\t{DOC}\t{E1}\t600\t2"),
    ]
    .iter()
    .enumerate()
    .map(|(index, raw)| parse_ccr_row(index + 1, raw).expect("row parses"))
    .collect()
}

fn truth_tsv() -> String {
    format!("#assessor\tstream_id\ttarget_id\tconf\trating\n0\tassessor1\t{DOC}\t{E1}\t1000\t2\n")
}

fn training_config() -> ScoringConfig {
    let mut config = ScoringConfig::new(50).expect("valid step");
    config.include_training = true;
    config
}

#[test]
fn duplicate_rows_keep_the_most_confident_assertion() {
    let config = training_config();
    let truth = CcrTruth::from_reader(truth_tsv().as_bytes(), &config, |_| false)
        .expect("truth loads");

    let scored = score_ccr_run(run_rows(), &truth, &config).expect("run scores");
    assert_eq!(scored.scored_assertions, 1);

    let at_500 = scored.matrix.get(E1, 500).expect("cell");
    assert_eq!((at_500.tp, at_500.fp), (1, 0));

    let at_700 = scored.matrix.get(E1, 700).expect("cell");
    assert_eq!((at_700.tp, at_700.fn_count), (0, 1));

    let compiled = compile(scored.matrix).expect("compiles");
    let best = compiled.max_for(E1).expect("entity scores");
    assert_eq!(best.max_f, 1.0);
    assert_eq!(best.cutoff_at_max_f, 0);
    assert_eq!(
        compiled.max_for(AverageKind::Macro.name()).map(|m| m.max_f),
        Some(1.0)
    );
}

#[test]
fn training_range_documents_are_ignored_by_default() {
    let config = ScoringConfig::new(50).expect("valid step");
    let error = CcrTruth::from_reader(truth_tsv().as_bytes(), &config, |_| false)
        .expect_err("only training-range truth");
    assert!(matches!(error, ScoreError::NoPositives { .. }));
}

#[test]
fn truth_without_positives_is_fatal() {
    let config = training_config();
    let negative_only =
        format!("0\tassessor1\t{DOC}\t{E1}\t1000\t0\n0\tassessor2\t{DOC}\t{E1}\t1000\t-1\n");
    let error = CcrTruth::from_reader(negative_only.as_bytes(), &config, |_| false)
        .expect_err("no positives");
    assert!(matches!(error, ScoreError::NoPositives { .. }));

    let rejected = CcrTruth::from_reader(truth_tsv().as_bytes(), &config, |entity| {
        entity == E1
    })
    .expect_err("every entity rejected");
    assert!(matches!(rejected, ScoreError::NoPositives { .. }));
}

#[test]
fn rescoring_the_same_run_is_bit_for_bit_identical() {
    let config = training_config();
    let truth = CcrTruth::from_reader(truth_tsv().as_bytes(), &config, |_| false)
        .expect("truth loads");

    let first = compile(score_ccr_run(run_rows(), &truth, &config).expect("scores").matrix)
        .expect("compiles");
    let second = compile(score_ccr_run(run_rows(), &truth, &config).expect("scores").matrix)
        .expect("compiles");

    assert_eq!(first.summed, second.summed);
    assert_eq!(first.entity_scores, second.entity_scores);
    assert_eq!(first.averages, second.averages);
    assert_eq!(first.max_scores, second.max_scores);
}
