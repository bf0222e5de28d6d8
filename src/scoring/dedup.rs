//! Collapses a run's assertion stream to one record per evaluation key.
//!
//! Winner order: higher confidence, then higher self-reported rating, then the
//! earlier line in the run file. The line tie-break is explicit so the result
//! never depends on how the stream happened to be buffered.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::assertion::{Assertion, SlotAssertion};

pub trait Ranked {
    fn assertion(&self) -> &Assertion;
}

impl Ranked for Assertion {
    fn assertion(&self) -> &Assertion {
        self
    }
}

impl Ranked for SlotAssertion {
    fn assertion(&self) -> &Assertion {
        &self.assertion
    }
}

impl<T: Ranked> Ranked for &T {
    fn assertion(&self) -> &Assertion {
        (**self).assertion()
    }
}

/// `Greater` means `left` should be kept over `right`.
pub fn rank<T: Ranked>(left: &T, right: &T) -> Ordering {
    let left = left.assertion();
    let right = right.assertion();
    left.confidence
        .cmp(&right.confidence)
        .then(left.rating.cmp(&right.rating))
        .then(right.line.cmp(&left.line))
}

/// Keep the best record per key; output is ordered by line.
pub fn collapse_by_key<T, K, F>(records: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    T: Ranked,
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut best: BTreeMap<K, T> = BTreeMap::new();
    for record in records {
        let record_key = key(&record);
        let incumbent_holds = best
            .get(&record_key)
            .is_some_and(|incumbent| rank(&record, incumbent) != Ordering::Greater);
        if !incumbent_holds {
            best.insert(record_key, record);
        }
    }

    let mut winners: Vec<T> = best.into_values().collect();
    winners.sort_by_key(|record| record.assertion().line);
    winners
}

/// Row-level admission applied before any key collapsing.
#[derive(Debug)]
pub struct RowFilter<'a> {
    pub min_rating: i8,
    /// When set, rows for entities outside this set are dropped.
    pub entities_with_positives: Option<&'a BTreeSet<String>>,
    pub below_rating: usize,
    pub without_positives: usize,
}

impl<'a> RowFilter<'a> {
    pub fn new(min_rating: i8, entities_with_positives: Option<&'a BTreeSet<String>>) -> Self {
        Self {
            min_rating,
            entities_with_positives,
            below_rating: 0,
            without_positives: 0,
        }
    }

    pub fn admits(&mut self, assertion: &Assertion) -> bool {
        if assertion.rating < self.min_rating {
            self.below_rating += 1;
            debug!(
                line = assertion.line,
                rating = assertion.rating,
                min_rating = self.min_rating,
                "skipping row below rating threshold"
            );
            return false;
        }

        if let Some(known) = self.entities_with_positives {
            if !known.contains(&assertion.entity_id) {
                self.without_positives += 1;
                debug!(
                    line = assertion.line,
                    entity = %assertion.entity_id,
                    "skipping row for entity without known positives"
                );
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assertion(line: usize, doc: &str, confidence: u32, rating: i8) -> Assertion {
        Assertion {
            line,
            document_id: doc.to_string(),
            entity_id: "http://example.org/E1".to_string(),
            confidence,
            rating,
        }
    }

    fn doc_key(record: &Assertion) -> (String, String) {
        (record.document_id.clone(), record.entity_id.clone())
    }

    #[test]
    fn higher_confidence_wins() {
        let rows = vec![assertion(1, "d1", 400, 2), assertion(2, "d1", 600, 1)];
        let kept = collapse_by_key(rows, doc_key);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 600);
    }

    #[test]
    fn rating_breaks_confidence_ties() {
        let rows = vec![assertion(1, "d1", 500, 1), assertion(2, "d1", 500, 2)];
        let kept = collapse_by_key(rows, doc_key);
        assert_eq!(kept[0].line, 2);
    }

    #[test]
    fn earlier_line_wins_exact_ties_regardless_of_input_order() {
        let forward = vec![assertion(4, "d1", 500, 2), assertion(9, "d1", 500, 2)];
        let reversed = vec![assertion(9, "d1", 500, 2), assertion(4, "d1", 500, 2)];
        assert_eq!(collapse_by_key(forward, doc_key)[0].line, 4);
        assert_eq!(collapse_by_key(reversed, doc_key)[0].line, 4);
    }

    #[test]
    fn output_is_ordered_by_line() {
        let rows = vec![
            assertion(7, "d2", 100, 2),
            assertion(3, "d1", 100, 2),
            assertion(5, "d3", 100, 2),
        ];
        let lines: Vec<usize> = collapse_by_key(rows, doc_key)
            .iter()
            .map(|row| row.line)
            .collect();
        assert_eq!(lines, vec![3, 5, 7]);
    }

    #[test]
    fn row_filter_drops_low_ratings_and_unknown_entities() {
        let known: BTreeSet<String> = ["http://example.org/E1".to_string()].into();
        let mut filter = RowFilter::new(2, Some(&known));

        assert!(filter.admits(&assertion(1, "d1", 500, 2)));
        assert!(!filter.admits(&assertion(2, "d1", 500, 1)));

        let mut other = assertion(3, "d1", 500, 2);
        other.entity_id = "http://example.org/E2".to_string();
        assert!(!filter.admits(&other));

        assert_eq!(filter.below_rating, 1);
        assert_eq!(filter.without_positives, 1);
    }
}
