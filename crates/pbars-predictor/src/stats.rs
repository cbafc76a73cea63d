//! Pure closed-form estimators (§4.F). Kept free of any storage concerns so
//! the round-trip laws in §8 can be checked directly against them — an
//! incremental [`crate::accumulator::Accumulator`] must always agree with
//! the corresponding function here when fed the same samples.

/// `a = Σtᵢ/m`. `None` on an empty slice — zero samples is an undefined
/// prediction, not a synthesized zero (§8 boundary behavior).
#[must_use]
pub fn arithmetic_mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// `a = exp(Σ ln tᵢ / m)`, rejecting non-positive samples.
#[must_use]
pub fn geometric_mean(samples: &[f64]) -> Option<f64> {
    let accepted: Vec<f64> = samples.iter().copied().filter(|&t| t > 0.0).collect();
    if accepted.is_empty() {
        return None;
    }
    let sum_ln: f64 = accepted.iter().map(|t| t.ln()).sum();
    Some((sum_ln / accepted.len() as f64).exp())
}

/// `a = m / Σ(1/tᵢ)`, rejecting non-positive samples.
#[must_use]
pub fn harmonic_mean(samples: &[f64]) -> Option<f64> {
    let accepted: Vec<f64> = samples.iter().copied().filter(|&t| t > 0.0).collect();
    if accepted.is_empty() {
        return None;
    }
    let sum_recip: f64 = accepted.iter().map(|t| 1.0 / t).sum();
    Some(accepted.len() as f64 / sum_recip)
}

/// The smallest value in `sorted_samples` such that the fraction of samples
/// `<= it` is `>= p / 100`. `sorted_samples` must already be sorted
/// ascending; `p = 0` returns the minimum, `p = 100` the maximum.
#[must_use]
pub fn percentile(sorted_samples: &[f64], p: u8) -> Option<f64> {
    if sorted_samples.is_empty() {
        return None;
    }
    let m = sorted_samples.len();
    let threshold = f64::from(p) / 100.0;
    for (i, value) in sorted_samples.iter().enumerate() {
        let fraction_le = (i + 1) as f64 / m as f64;
        if fraction_le >= threshold {
            return Some(*value);
        }
    }
    sorted_samples.last().copied()
}

/// Ordinary least squares on `(n, t)` pairs. Requires at least two *distinct*
/// `n` values; otherwise the fit degenerates to `(slope = 0, intercept =
/// arithmetic_mean(t))` per §8's boundary behavior, so `predicted = a*n + b`
/// still collapses to the plain mean regardless of `n`.
#[must_use]
pub fn ols(pairs: &[(f64, f64)]) -> Option<(f64, f64)> {
    if pairs.is_empty() {
        return None;
    }
    let count = pairs.len() as f64;
    let distinct_n = pairs
        .iter()
        .map(|(n, _)| n.to_bits())
        .collect::<std::collections::HashSet<_>>()
        .len();

    if distinct_n < 2 {
        let mean_t = pairs.iter().map(|(_, t)| t).sum::<f64>() / count;
        return Some((0.0, mean_t));
    }

    let sum_n: f64 = pairs.iter().map(|(n, _)| n).sum();
    let sum_t: f64 = pairs.iter().map(|(_, t)| t).sum();
    let sum_n2: f64 = pairs.iter().map(|(n, _)| n * n).sum();
    let sum_nt: f64 = pairs.iter().map(|(n, t)| n * t).sum();

    let denom = count * sum_n2 - sum_n * sum_n;
    let slope = (count * sum_nt - sum_n * sum_t) / denom;
    let intercept = (sum_t - slope * sum_n) / count;
    Some((slope, intercept))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_mean_of_empty_is_none() {
        assert_eq!(arithmetic_mean(&[]), None);
    }

    #[test]
    fn means_agree_on_a_single_sample() {
        assert_eq!(arithmetic_mean(&[4.0]), Some(4.0));
        assert_eq!(geometric_mean(&[4.0]), Some(4.0));
        assert_eq!(harmonic_mean(&[4.0]), Some(4.0));
    }

    #[test]
    fn percentile_boundaries() {
        let samples: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(percentile(&samples, 0), Some(1.0));
        assert_eq!(percentile(&samples, 100), Some(10.0));
        assert_eq!(percentile(&samples, 90), Some(9.0));
    }

    #[test]
    fn ols_recovers_exact_line() {
        let pairs = [(1.0, 2.0), (2.0, 3.0), (3.0, 4.0), (4.0, 5.0)];
        let (slope, intercept) = ols(&pairs).unwrap();
        assert!((slope - 1.0).abs() < 1e-9);
        assert!((intercept - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ols_degenerates_to_mean_without_distinct_n() {
        let pairs = [(3.0, 10.0), (3.0, 20.0), (3.0, 30.0)];
        let (slope, intercept) = ols(&pairs).unwrap();
        assert_eq!(slope, 0.0);
        assert_eq!(intercept, 20.0);
    }

    proptest::proptest! {
        #[test]
        fn percentile_is_monotonic_in_p(samples in proptest::collection::vec(1.0f64..1000.0, 1..50)) {
            let mut sorted = samples;
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mut last = f64::MIN;
            for p in (0..=100u8).step_by(10) {
                let value = percentile(&sorted, p).unwrap();
                proptest::prop_assert!(value >= last);
                last = value;
            }
        }
    }
}
