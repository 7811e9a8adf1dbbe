//! Price filtering and trimmed-median aggregation.
//!
//! Raw candidates contain extraction noise (item counts, dates, shipping
//! fees) and outlier listings (bundles, mispriced items). The aggregator drops
//! anything outside the query's bounds, trims both tails of what remains and
//! reports the median.

use serde::{Deserialize, Serialize};

use crate::extract::RawCandidate;

/// Below this many in-range samples no trimming is done.
pub const MIN_TRIM_SAMPLES: usize = 10;

/// Default share (percent) of samples trimmed from each end.
pub const DEFAULT_TRIM_PERCENT: u32 = 10;

/// Inclusive price range for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub min: i64,
    pub max: i64,
}

impl PriceBounds {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, amount: i64) -> bool {
        self.min <= amount && amount <= self.max
    }
}

impl Default for PriceBounds {
    fn default() -> Self {
        Self {
            min: 1_000,
            max: 200_000,
        }
    }
}

/// Rounding applied when the median falls between two samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MedianRounding {
    /// x.5 rounds up: median of 10 and 11 is 11.
    #[default]
    HalfUp,
    /// x.5 rounds to the even neighbour: median of 10 and 11 is 10.
    HalfEven,
    /// Integer division: median of 10 and 11 is 10.
    Floor,
}

/// How candidates are reduced to statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationPolicy {
    pub trim_percent: u32,
    pub rounding: MedianRounding,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            trim_percent: DEFAULT_TRIM_PERCENT,
            rounding: MedianRounding::default(),
        }
    }
}

/// Summary statistics over the trimmed in-range samples.
///
/// All statistics are `None` exactly when `count == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub median: Option<i64>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub count: usize,
}

impl AggregationResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Filter, trim and summarize candidates.
pub fn aggregate(
    candidates: &[RawCandidate],
    bounds: PriceBounds,
    policy: AggregationPolicy,
) -> AggregationResult {
    let mut samples: Vec<i64> = candidates
        .iter()
        .map(|c| c.amount)
        .filter(|amount| bounds.contains(*amount))
        .collect();
    samples.sort_unstable();

    let trimmed = trim_outliers(&samples, policy.trim_percent);

    match (trimmed.first(), trimmed.last()) {
        (Some(&min), Some(&max)) => AggregationResult {
            median: median(trimmed, policy.rounding),
            min: Some(min),
            max: Some(max),
            count: trimmed.len(),
        },
        _ => AggregationResult::empty(),
    }
}

/// Drop `floor(n * percent / 100)` samples from each end of a sorted slice,
/// once it holds at least [`MIN_TRIM_SAMPLES`] samples.
pub fn trim_outliers(sorted: &[i64], percent: u32) -> &[i64] {
    let n = sorted.len();
    if n < MIN_TRIM_SAMPLES {
        return sorted;
    }
    let k = n * percent as usize / 100;
    if 2 * k >= n {
        return &sorted[n..];
    }
    &sorted[k..n - k]
}

/// Median of a sorted slice; `None` when empty.
pub fn median(sorted: &[i64], rounding: MedianRounding) -> Option<i64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        return Some(sorted[n / 2]);
    }

    let sum = sorted[n / 2 - 1] as i128 + sorted[n / 2] as i128;
    let floor = sum.div_euclid(2);
    let halfway = sum.rem_euclid(2) == 1;
    let value = match rounding {
        MedianRounding::Floor => floor,
        MedianRounding::HalfUp if halfway => floor + 1,
        MedianRounding::HalfEven if halfway && floor % 2 != 0 => floor + 1,
        _ => floor,
    };
    Some(value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::CandidateSource;

    fn candidates(amounts: impl IntoIterator<Item = i64>) -> Vec<RawCandidate> {
        amounts
            .into_iter()
            .map(|amount| RawCandidate::new(amount, CandidateSource::Json))
            .collect()
    }

    fn wide() -> PriceBounds {
        PriceBounds::new(i64::MIN, i64::MAX)
    }

    #[test]
    fn test_empty_input() {
        let result = aggregate(&[], PriceBounds::default(), AggregationPolicy::default());
        assert_eq!(result.count, 0);
        assert_eq!(result.median, None);
        assert_eq!(result.min, None);
        assert_eq!(result.max, None);
        assert!(result.is_empty());
    }

    #[test]
    fn test_trim_drops_tenth_from_each_end() {
        for n in 10..=57usize {
            let sorted: Vec<i64> = (0..n as i64).collect();
            let trimmed = trim_outliers(&sorted, DEFAULT_TRIM_PERCENT);
            let k = n / 10;
            assert_eq!(trimmed.len(), n - 2 * k, "n = {}", n);
            assert_eq!(trimmed[0], k as i64, "n = {}", n);
        }
    }

    #[test]
    fn test_no_trim_below_ten() {
        for n in 0..10usize {
            let sorted: Vec<i64> = (0..n as i64).collect();
            assert_eq!(trim_outliers(&sorted, DEFAULT_TRIM_PERCENT), &sorted[..]);
        }
    }

    #[test]
    fn test_one_to_twenty() {
        let sorted: Vec<i64> = (1..=20).collect();
        let trimmed = trim_outliers(&sorted, DEFAULT_TRIM_PERCENT);
        assert_eq!(trimmed, &(3..=18).collect::<Vec<i64>>()[..]);

        assert_eq!(median(trimmed, MedianRounding::HalfUp), Some(11));
        assert_eq!(median(trimmed, MedianRounding::HalfEven), Some(10));
        assert_eq!(median(trimmed, MedianRounding::Floor), Some(10));

        let result = aggregate(&candidates(1..=20), wide(), AggregationPolicy::default());
        assert_eq!(
            result,
            AggregationResult {
                median: Some(11),
                min: Some(3),
                max: Some(18),
                count: 16,
            }
        );
    }

    #[test]
    fn test_half_even_rounds_up_to_even() {
        assert_eq!(median(&[11, 12], MedianRounding::HalfEven), Some(12));
        assert_eq!(median(&[11, 12], MedianRounding::HalfUp), Some(12));
        assert_eq!(median(&[11, 12], MedianRounding::Floor), Some(11));
        // Exact means are unaffected by rounding
        assert_eq!(median(&[10, 12], MedianRounding::HalfEven), Some(11));
    }

    #[test]
    fn test_odd_count_takes_middle() {
        assert_eq!(median(&[1, 5, 100], MedianRounding::Floor), Some(5));
        assert_eq!(median(&[7], MedianRounding::HalfUp), Some(7));
        assert_eq!(median(&[], MedianRounding::HalfUp), None);
    }

    #[test]
    fn test_bounds_are_inclusive_and_applied_before_trim() {
        let bounds = PriceBounds::new(5_000, 50_000);
        let result = aggregate(
            &candidates([4_999, 5_000, 12_000, 50_000, 50_001, 3]),
            bounds,
            AggregationPolicy::default(),
        );
        assert_eq!(result.count, 3);
        assert_eq!(result.min, Some(5_000));
        assert_eq!(result.max, Some(50_000));
        assert_eq!(result.median, Some(12_000));
    }

    #[test]
    fn test_all_out_of_range_is_empty() {
        let result = aggregate(
            &candidates([1, 2, 3]),
            PriceBounds::default(),
            AggregationPolicy::default(),
        );
        assert_eq!(result, AggregationResult::empty());
    }

    #[test]
    fn test_unsorted_input_is_sorted_first() {
        let result = aggregate(
            &candidates([30_000, 10_000, 20_000, 40_000]),
            PriceBounds::default(),
            AggregationPolicy::default(),
        );
        assert_eq!(result.min, Some(10_000));
        assert_eq!(result.max, Some(40_000));
        assert_eq!(result.median, Some(25_000));
    }

    #[test]
    fn test_custom_trim_percent() {
        let sorted: Vec<i64> = (1..=20).collect();
        assert_eq!(trim_outliers(&sorted, 25).len(), 10);
        assert_eq!(trim_outliers(&sorted, 0).len(), 20);
    }
}
