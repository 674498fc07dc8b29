// NaN-aware numeric helpers
// Reductions, smoothing kernels and the normal CDF used by the temporal prior

/// Mean of the finite values, NaN when there are none
pub fn nanmean(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
        if v.is_finite() {
            sum += v;
            count += 1;
        }
    }

    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Population standard deviation of the finite values, NaN when there are none
pub fn nanstd(values: &[f64]) -> f64 {
    let mean = nanmean(values);
    if mean.is_nan() {
        return f64::NAN;
    }

    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for &v in values {
        if v.is_finite() {
            sum_sq += (v - mean) * (v - mean);
            count += 1;
        }
    }

    (sum_sq / count as f64).sqrt()
}

/// Median of the finite values, NaN when there are none
pub fn nanmedian(values: &[f64]) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    median_sorted(&finite)
}

/// Median of an already sorted slice
pub fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Error function, Abramowitz & Stegun 7.1.26 (|error| < 1.5e-7)
pub fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));

    sign * (1.0 - poly * (-x * x).exp())
}

/// Cumulative normal distribution at `x`
/// A non-positive `sd` degenerates to a step at `mean`
pub fn normal_cdf(x: f64, mean: f64, sd: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if sd <= 0.0 || !sd.is_finite() {
        return if x >= mean { 1.0 } else { 0.0 };
    }
    0.5 * (1.0 + erf((x - mean) / (sd * std::f64::consts::SQRT_2)))
}

/// Normalized convolution kernel, centered on its middle element
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Vec<f64>,
}

impl Kernel {
    /// Boxcar of `window_len` frames (forced odd so it stays centered)
    pub fn flat(window_len: usize) -> Self {
        let len = if window_len % 2 == 0 { window_len + 1 } else { window_len };
        Kernel::from_weights(vec![1.0; len.max(1)])
    }

    /// Gaussian with the given full width at half maximum, in frames
    pub fn gaussian(fwhm: f64) -> Self {
        if !(fwhm > 0.0) {
            return Kernel::from_weights(vec![1.0]);
        }

        let sigma = fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
        let half = (3.0 * sigma).ceil() as isize;
        let weights = (-half..=half)
            .map(|k| (-(k as f64).powi(2) / (2.0 * sigma * sigma)).exp())
            .collect();

        Kernel::from_weights(weights)
    }

    fn from_weights(weights: Vec<f64>) -> Self {
        let total: f64 = weights.iter().sum();
        Kernel {
            weights: weights.into_iter().map(|w| w / total).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Convolve `values`, skipping non-finite neighbors and renormalizing.
    /// Non-finite samples stay NaN in the output.
    pub fn smooth(&self, values: &[f64]) -> Vec<f64> {
        let half = (self.weights.len() / 2) as isize;
        let n = values.len() as isize;

        (0..n)
            .map(|t| {
                if !values[t as usize].is_finite() {
                    return f64::NAN;
                }

                let mut acc = 0.0;
                let mut norm = 0.0;
                for (k, w) in self.weights.iter().enumerate() {
                    let idx = t + k as isize - half;
                    if idx < 0 || idx >= n {
                        continue;
                    }
                    let v = values[idx as usize];
                    if v.is_finite() {
                        acc += w * v;
                        norm += w;
                    }
                }
                acc / norm
            })
            .collect()
    }
}

/// Trailing moving max over `window` samples ending at each index.
/// NaN samples stay NaN; NaNs inside the window are otherwise ignored.
pub fn rolling_max(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return values.to_vec();
    }

    (0..values.len())
        .map(|t| {
            if values[t].is_nan() {
                return f64::NAN;
            }
            let start = (t + 1).saturating_sub(window);
            values[start..=t]
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .fold(f64::NEG_INFINITY, f64::max)
        })
        .collect()
}

/// Stable `ln(sum(exp(x)))`; NEG_INFINITY for an empty or all -inf input
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max.is_nan() {
        return f64::NAN;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_reductions_skip_nan() {
        let values = [1.0, f64::NAN, 3.0, 5.0];
        assert!((nanmean(&values) - 3.0).abs() < 1e-12);
        assert!((nanmedian(&values) - 3.0).abs() < 1e-12);
        assert!((nanstd(&values) - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_nan_reductions_all_nan() {
        let values = [f64::NAN, f64::NAN];
        assert!(nanmean(&values).is_nan());
        assert!(nanmedian(&values).is_nan());
        assert!(nanstd(&values).is_nan());
    }

    #[test]
    fn test_median_even_length() {
        assert_eq!(median_sorted(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.0, 0.0, 1.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96, 0.0, 1.0) - 0.975).abs() < 1e-3);
        assert!(normal_cdf(-10.0, 0.0, 1.0) < 1e-6);
        assert_eq!(normal_cdf(0.2, 0.1, 0.0), 1.0);
    }

    #[test]
    fn test_gaussian_kernel_normalized_and_symmetric() {
        let kernel = Kernel::gaussian(4.0);
        let total: f64 = kernel.weights().iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(kernel.len() % 2, 1);

        let w = kernel.weights();
        for i in 0..w.len() / 2 {
            assert!((w[i] - w[w.len() - 1 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_smooth_preserves_constant_and_nan() {
        let kernel = Kernel::flat(3);
        let out = kernel.smooth(&[2.0, 2.0, f64::NAN, 2.0, 2.0]);
        assert_eq!(out[0], 2.0);
        assert_eq!(out[1], 2.0);
        assert!(out[2].is_nan());
        assert_eq!(out[4], 2.0);
    }

    #[test]
    fn test_rolling_max_trailing() {
        let out = rolling_max(&[0.0, 1.0, 0.0, 0.0, 0.5, f64::NAN, 0.0], 3);
        assert_eq!(out[..5], [0.0, 1.0, 1.0, 1.0, 0.5]);
        assert!(out[5].is_nan());
        assert_eq!(out[6], 0.5);
    }

    #[test]
    fn test_logsumexp() {
        let v = [0.0f64.ln(), 1.0f64.ln(), 3.0f64.ln()];
        assert!((logsumexp(&v) - 4.0f64.ln()).abs() < 1e-12);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
    }
}
