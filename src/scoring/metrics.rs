//! Metric primitives over confusion-matrix counts.
//!
//! Every function here is total: empty denominators yield `0.0` rather than
//! `NaN`, so callers can range-check results without special cases.

/// Lower clamp on normalized utility used by the TREC 2002 filtering track.
pub const DEFAULT_MIN_NORMALIZED_UTILITY: f64 = -0.5;

pub fn precision(tp: u64, fp: u64) -> f64 {
    if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    }
}

pub fn recall(tp: u64, fn_count: u64) -> f64 {
    if tp + fn_count > 0 {
        tp as f64 / (tp + fn_count) as f64
    } else {
        0.0
    }
}

pub fn fscore(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

/// Scaled utility, see <http://trec.nist.gov/pubs/trec11/papers/OVER.FILTERING.pdf>.
///
/// `min_nu` must be negative; the result lies in `[0, 1]`.
pub fn scaled_utility(tp: u64, fp: u64, fn_count: u64, min_nu: f64) -> f64 {
    if tp + fn_count == 0 {
        return 0.0;
    }

    let utility = 2.0 * tp as f64 - fp as f64;
    let max_utility = 2.0 * (tp + fn_count) as f64;
    let normalized = utility / max_utility;

    let scaled = (normalized.max(min_nu) - min_nu) / (1.0 - min_nu);
    scaled.clamp(0.0, 1.0)
}

/// Sorted-midpoint median; `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|left, right| left.total_cmp(right));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
