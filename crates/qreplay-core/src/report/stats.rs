use serde::Serialize;

/// Average and tail percentiles of one metric within a bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Distribution {
    pub average: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Distribution {
    /// `None` for an empty sample set. Sorts `samples` in place.
    pub fn from_samples(samples: &mut [f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(f64::total_cmp);
        let average = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Self {
            average,
            p95: percentile(samples, 95.0),
            p99: percentile(samples, 99.0),
        })
    }
}

/// Percentile of sorted, non-empty data, interpolating linearly between the
/// two nearest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
