//! Per-cell running state (§4.F).
//!
//! Arithmetic/geometric/harmonic mean and `best_fit.linear` are streamable:
//! a retain/evict only touches a handful of running sums. Percentile is not
//! — order statistics need the samples themselves — so it keeps a bounded,
//! sorted sample buffer and degrades to "stale, recompute on next query"
//! once that buffer would have to grow past its cap.

use crate::stats;
use pbars_schema::Technique;
use std::collections::BTreeMap;

/// Above this many retained samples a percentile cell stops trying to stay
/// exact in memory and instead marks itself stale, relying on
/// [`crate::engine::PredictorEngine`] to rebuild it from the durable store.
pub const PERCENTILE_BUFFER_CAP: usize = 4096;

/// The median of the retained `n` (iteration count) values, reusing the
/// `distinct_n` histogram a [`Accumulator::BestFitLinear`] already keeps.
fn median_of_retained(distinct_n: &BTreeMap<u64, u32>) -> Option<f64> {
    let sorted_ns: Vec<f64> = distinct_n
        .iter()
        .flat_map(|(&bits, &count)| std::iter::repeat(f64::from_bits(bits)).take(count as usize))
        .collect();
    stats::percentile(&sorted_ns, 50)
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    ArithmeticMean {
        sum: f64,
        count: u64,
    },
    GeometricMean {
        sum_ln: f64,
        count: u64,
    },
    HarmonicMean {
        sum_recip: f64,
        count: u64,
    },
    BestFitLinear {
        sum_n: f64,
        sum_t: f64,
        sum_n2: f64,
        sum_nt: f64,
        count: u64,
        /// Tracks how many pairs share each `n`, so the fit can tell whether
        /// it still has fewer than two distinct `n` values after a removal.
        distinct_n: BTreeMap<u64, u32>,
    },
    Percentile {
        percentile: u8,
        samples: Vec<f64>,
        stale: bool,
    },
}

impl Accumulator {
    #[must_use]
    pub fn new(technique: Technique) -> Self {
        match technique {
            Technique::ArithmeticMean => Self::ArithmeticMean { sum: 0.0, count: 0 },
            Technique::GeometricMean => Self::GeometricMean { sum_ln: 0.0, count: 0 },
            Technique::HarmonicMean => Self::HarmonicMean {
                sum_recip: 0.0,
                count: 0,
            },
            Technique::BestFitLinear => Self::BestFitLinear {
                sum_n: 0.0,
                sum_t: 0.0,
                sum_n2: 0.0,
                sum_nt: 0.0,
                count: 0,
                distinct_n: BTreeMap::new(),
            },
            Technique::Percentile(p) => Self::Percentile {
                percentile: p,
                samples: Vec::new(),
                stale: false,
            },
        }
    }

    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Percentile { stale: true, .. })
    }

    pub fn mark_stale(&mut self) {
        if let Self::Percentile { stale, .. } = self {
            *stale = true;
        }
    }

    /// Adds a single duration sample. No-op on [`Self::BestFitLinear`],
    /// which takes `(n, t)` pairs through [`Self::add_pair`] instead.
    pub fn add(&mut self, sample: f64) {
        match self {
            Self::ArithmeticMean { sum, count } => {
                *sum += sample;
                *count += 1;
            }
            Self::GeometricMean { sum_ln, count } => {
                if sample > 0.0 {
                    *sum_ln += sample.ln();
                    *count += 1;
                }
            }
            Self::HarmonicMean { sum_recip, count } => {
                if sample > 0.0 {
                    *sum_recip += 1.0 / sample;
                    *count += 1;
                }
            }
            Self::Percentile { samples, stale, .. } => {
                if *stale || samples.len() >= PERCENTILE_BUFFER_CAP {
                    *stale = true;
                    return;
                }
                let idx = samples.partition_point(|v| *v <= sample);
                samples.insert(idx, sample);
            }
            Self::BestFitLinear { .. } => {}
        }
    }

    /// Undoes a previous [`Self::add`] of the same `sample` (§4.F eviction).
    pub fn remove(&mut self, sample: f64) {
        match self {
            Self::ArithmeticMean { sum, count } => {
                *sum -= sample;
                *count = count.saturating_sub(1);
            }
            Self::GeometricMean { sum_ln, count } => {
                if sample > 0.0 {
                    *sum_ln -= sample.ln();
                    *count = count.saturating_sub(1);
                }
            }
            Self::HarmonicMean { sum_recip, count } => {
                if sample > 0.0 {
                    *sum_recip -= 1.0 / sample;
                    *count = count.saturating_sub(1);
                }
            }
            Self::Percentile { samples, stale, .. } => {
                if *stale {
                    return;
                }
                if let Ok(idx) = samples.binary_search_by(|v| v.partial_cmp(&sample).unwrap()) {
                    samples.remove(idx);
                }
            }
            Self::BestFitLinear { .. } => {}
        }
    }

    pub fn add_pair(&mut self, n: f64, t: f64) {
        if let Self::BestFitLinear {
            sum_n,
            sum_t,
            sum_n2,
            sum_nt,
            count,
            distinct_n,
        } = self
        {
            *sum_n += n;
            *sum_t += t;
            *sum_n2 += n * n;
            *sum_nt += n * t;
            *count += 1;
            *distinct_n.entry(n.to_bits()).or_insert(0) += 1;
        }
    }

    pub fn remove_pair(&mut self, n: f64, t: f64) {
        if let Self::BestFitLinear {
            sum_n,
            sum_t,
            sum_n2,
            sum_nt,
            count,
            distinct_n,
        } = self
        {
            *sum_n -= n;
            *sum_t -= t;
            *sum_n2 -= n * n;
            *sum_nt -= n * t;
            *count = count.saturating_sub(1);
            if let Some(seen) = distinct_n.get_mut(&n.to_bits()) {
                *seen -= 1;
                if *seen == 0 {
                    distinct_n.remove(&n.to_bits());
                }
            }
        }
    }

    /// Replaces a stale percentile buffer with a freshly scanned sample set,
    /// capping it the same way incremental inserts are capped.
    pub fn rebuild_percentile(&mut self, mut fresh_samples: Vec<f64>) {
        if let Self::Percentile { samples, stale, .. } = self {
            fresh_samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
            fresh_samples.truncate(PERCENTILE_BUFFER_CAP);
            *samples = fresh_samples;
            *stale = false;
        }
    }

    #[must_use]
    pub fn estimate(&self) -> Option<f64> {
        match self {
            Self::ArithmeticMean { sum, count } => {
                (*count > 0).then_some(*sum / *count as f64)
            }
            Self::GeometricMean { sum_ln, count } => {
                (*count > 0).then(|| (*sum_ln / *count as f64).exp())
            }
            Self::HarmonicMean { sum_recip, count } => {
                (*count > 0 && *sum_recip != 0.0).then(|| *count as f64 / *sum_recip)
            }
            // Without a caller-supplied target iteration count, evaluate the
            // fitted line at the median of the retained iteration counts.
            Self::BestFitLinear { count, distinct_n, .. } => {
                if *count == 0 {
                    return None;
                }
                let median = median_of_retained(distinct_n)?;
                self.predict_at(median)
            }
            Self::Percentile { percentile, samples, .. } => stats::percentile(samples, *percentile),
        }
    }

    /// Predicts for a specific `n` (iteration count) using a fitted linear
    /// model, falling back to the accumulator's plain estimate for
    /// non-linear techniques.
    #[must_use]
    pub fn predict_at(&self, n: f64) -> Option<f64> {
        match self {
            Self::BestFitLinear {
                sum_n,
                sum_t,
                sum_n2,
                sum_nt,
                count,
                distinct_n,
            } => {
                if *count == 0 {
                    return None;
                }
                if distinct_n.len() < 2 {
                    return Some(*sum_t / *count as f64);
                }
                let c = *count as f64;
                let denom = c * sum_n2 - sum_n * sum_n;
                if denom == 0.0 {
                    return Some(*sum_t / c);
                }
                let slope = (c * sum_nt - sum_n * sum_t) / denom;
                let intercept = (sum_t - slope * sum_n) / c;
                Some(slope * n + intercept)
            }
            other => other.estimate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_mean_add_remove_round_trips() {
        let mut acc = Accumulator::new(Technique::ArithmeticMean);
        acc.add(10.0);
        acc.add(20.0);
        assert_eq!(acc.estimate(), Some(15.0));
        acc.remove(10.0);
        assert_eq!(acc.estimate(), Some(20.0));
    }

    #[test]
    fn percentile_marks_stale_past_cap() {
        let mut acc = Accumulator::new(Technique::Percentile(50));
        for i in 0..PERCENTILE_BUFFER_CAP {
            acc.add(i as f64);
        }
        assert!(!acc.is_stale());
        acc.add(999_999.0);
        assert!(acc.is_stale());
    }

    #[test]
    fn best_fit_linear_matches_closed_form_ols() {
        let mut acc = Accumulator::new(Technique::BestFitLinear);
        let pairs = [(1.0, 2.0), (2.0, 3.0), (3.0, 4.0), (4.0, 5.0)];
        for (n, t) in pairs {
            acc.add_pair(n, t);
        }
        let predicted = acc.predict_at(10.0).unwrap();
        let (slope, intercept) = stats::ols(&pairs).unwrap();
        assert!((predicted - (slope * 10.0 + intercept)).abs() < 1e-9);
    }

    #[test]
    fn best_fit_linear_degenerates_with_one_distinct_n() {
        let mut acc = Accumulator::new(Technique::BestFitLinear);
        acc.add_pair(5.0, 10.0);
        acc.add_pair(5.0, 20.0);
        assert_eq!(acc.estimate(), Some(15.0));
    }

    #[test]
    fn best_fit_linear_estimate_evaluates_at_median_n() {
        let mut acc = Accumulator::new(Technique::BestFitLinear);
        let pairs = [(1.0, 2.0), (2.0, 3.0), (3.0, 4.0), (4.0, 5.0)];
        for (n, t) in pairs {
            acc.add_pair(n, t);
        }
        let median = median_of_retained(match &acc {
            Accumulator::BestFitLinear { distinct_n, .. } => distinct_n,
            _ => unreachable!(),
        })
        .unwrap();
        assert_eq!(median, 2.0);
        assert_eq!(acc.estimate(), acc.predict_at(median));
    }
}
