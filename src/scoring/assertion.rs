use super::error::ScoreError;

pub const CCR_COLUMNS: usize = 6;
pub const SSF_COLUMNS: usize = 11;

/// One row of a run submission, reduced to the fields every task scores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// 1-based line number in the run file; the final dedup tie-break.
    pub line: usize,
    pub document_id: String,
    pub entity_id: String,
    pub confidence: u32,
    pub rating: i8,
}

impl Assertion {
    pub fn document_timestamp(&self) -> Option<i64> {
        document_timestamp(&self.document_id)
    }
}

/// Inclusive byte offsets of a slot fill inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    /// Overlap test against an assessor span. Spans more than ten times the
    /// assessor's length never match, so a run cannot claim a whole document.
    pub fn overlaps_truth(&self, truth: &ByteRange) -> bool {
        let intersects = self.start <= truth.end && self.end >= truth.start;
        intersects && self.len() <= truth.len().saturating_mul(10)
    }
}

/// An SSF row: a slot fill substantiated by a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssertion {
    pub assertion: Assertion,
    pub contains_mention: bool,
    pub date_hour: String,
    pub slot_type: String,
    pub equivalence_id: String,
    pub byte_range: ByteRange,
}

pub fn document_timestamp(document_id: &str) -> Option<i64> {
    document_id
        .split('-')
        .next()
        .and_then(|prefix| prefix.parse::<i64>().ok())
}

/// True when the slot columns of an 11-column row are `NULL`, which is how
/// CCR submissions fill the SSF-only columns.
pub fn has_null_slot_columns(line: &str) -> bool {
    line.split_whitespace().skip(CCR_COLUMNS).any(|column| column == "NULL")
}

pub fn parse_ccr_row(line: usize, raw: &str) -> Result<Assertion, ScoreError> {
    let columns: Vec<&str> = raw.split_whitespace().collect();
    if columns.len() != CCR_COLUMNS && columns.len() != SSF_COLUMNS {
        return Err(ScoreError::ColumnCount {
            line,
            expected: format!("{CCR_COLUMNS} or {SSF_COLUMNS}"),
            found: columns.len(),
        });
    }
    parse_common(line, &columns)
}

pub fn parse_ssf_row(line: usize, raw: &str) -> Result<SlotAssertion, ScoreError> {
    let columns: Vec<&str> = raw.split_whitespace().collect();
    if columns.len() != SSF_COLUMNS {
        return Err(ScoreError::ColumnCount {
            line,
            expected: SSF_COLUMNS.to_string(),
            found: columns.len(),
        });
    }

    let assertion = parse_common(line, &columns)?;
    let contains_mention = match columns[6] {
        "0" => false,
        "1" => true,
        other => {
            return Err(ScoreError::MalformedRow {
                line,
                reason: format!("contains_mention must be 0 or 1, got {other:?}"),
            });
        }
    };

    Ok(SlotAssertion {
        assertion,
        contains_mention,
        date_hour: columns[7].to_string(),
        slot_type: columns[8].to_string(),
        equivalence_id: columns[9].to_string(),
        byte_range: parse_byte_range(line, columns[10])?,
    })
}

fn parse_common(line: usize, columns: &[&str]) -> Result<Assertion, ScoreError> {
    let raw_confidence = columns[4];
    let confidence = raw_confidence
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(|value| value.trunc())
        .filter(|value| (1.0..=1000.0).contains(value))
        .map(|value| value as u32)
        .ok_or_else(|| ScoreError::ConfidenceOutOfRange {
            line,
            value: raw_confidence.to_string(),
        })?;

    let raw_rating = columns[5];
    let rating = raw_rating
        .parse::<i8>()
        .ok()
        .filter(|value| (-1..=2).contains(value))
        .ok_or_else(|| ScoreError::RatingOutOfRange {
            line,
            value: raw_rating.to_string(),
        })?;

    Ok(Assertion {
        line,
        document_id: columns[2].to_string(),
        entity_id: columns[3].to_string(),
        confidence,
        rating,
    })
}

fn parse_byte_range(line: usize, raw: &str) -> Result<ByteRange, ScoreError> {
    let malformed = || ScoreError::MalformedRow {
        line,
        reason: format!("byte range must look like start-end, got {raw:?}"),
    };

    let (start, end) = raw.split_once('-').ok_or_else(malformed)?;
    let start = start.parse::<u64>().map_err(|_| malformed())?;
    let end = end.parse::<u64>().map_err(|_| malformed())?;
    if start > end {
        return Err(malformed());
    }
    Ok(ByteRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSF_ROW: &str = "run1\tteamA\t1330560000-abcdef\thttp://example.org/E1\t750\t2\t1\t2012-03-01-05\tFounded\tfill-7\t10-24";

    #[test]
    fn parses_ssf_row_with_all_slot_columns() {
        let row = parse_ssf_row(3, SSF_ROW).expect("row should parse");
        assert_eq!(row.assertion.line, 3);
        assert_eq!(row.assertion.document_id, "1330560000-abcdef");
        assert_eq!(row.assertion.confidence, 750);
        assert_eq!(row.assertion.rating, 2);
        assert!(row.contains_mention);
        assert_eq!(row.slot_type, "Founded");
        assert_eq!(row.equivalence_id, "fill-7");
        assert_eq!(row.byte_range, ByteRange::new(10, 24));
    }

    #[test]
    fn ccr_confidence_accepts_float_and_truncates() {
        let row = parse_ccr_row(1, "r t 1330560000-aa http://example.org/E1 999.9 1")
            .expect("row should parse");
        assert_eq!(row.confidence, 999);
    }

    #[test]
    fn out_of_range_values_are_fatal() {
        let zero = parse_ccr_row(1, "r t 1330560000-aa http://example.org/E1 0 1");
        assert!(matches!(zero, Err(ScoreError::ConfidenceOutOfRange { .. })));

        let too_big = parse_ccr_row(1, "r t 1330560000-aa http://example.org/E1 1001 1");
        assert!(matches!(too_big, Err(ScoreError::ConfidenceOutOfRange { .. })));

        let rating = parse_ccr_row(1, "r t 1330560000-aa http://example.org/E1 500 3");
        assert!(matches!(rating, Err(ScoreError::RatingOutOfRange { .. })));
    }

    #[test]
    fn wrong_column_count_is_fatal() {
        let error = parse_ssf_row(9, "r t 1330560000-aa http://example.org/E1 500 1")
            .expect_err("six columns is not an SSF row");
        assert!(matches!(error, ScoreError::ColumnCount { line: 9, found: 6, .. }));
    }

    #[test]
    fn overlap_requires_intersection_and_sane_length() {
        let truth = ByteRange::new(100, 109);
        assert!(ByteRange::new(105, 120).overlaps_truth(&truth));
        assert!(ByteRange::new(109, 109).overlaps_truth(&truth));
        assert!(!ByteRange::new(110, 120).overlaps_truth(&truth));
        // 10 bytes of truth admit at most 100 asserted bytes.
        assert!(ByteRange::new(50, 149).overlaps_truth(&truth));
        assert!(!ByteRange::new(50, 150).overlaps_truth(&truth));
    }

    #[test]
    fn document_timestamp_reads_epoch_prefix() {
        assert_eq!(document_timestamp("1330560000-abcdef"), Some(1_330_560_000));
        assert_eq!(document_timestamp("not-a-stream-id"), None);
    }

    #[test]
    fn null_slot_columns_mark_ccr_rows() {
        assert!(has_null_slot_columns(
            "r t 1330560000-aa http://example.org/E1 500 1 NULL NULL NULL NULL NULL"
        ));
        assert!(!has_null_slot_columns(SSF_ROW));
    }
}
