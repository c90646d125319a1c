//! Reconstruction quality measures: root mean square error,
//! largest absolute error, and peak signal to noise ratio.

use crate::math::kahan_sum;
use rayon::prelude::*;

const STRIDE: usize = 4096;

/// Error measures between an original array and its reconstruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStats {
    pub rmse: f64,

    /// The largest absolute pointwise difference.
    pub linfty: f64,

    /// `-10 log10(mse / range^2)` in decibel, with the range taken
    /// from the original array.
    pub psnr: f64,

    pub original_min: f64,
    pub original_max: f64,
}

/// Compare a reconstruction against its original.
///
/// Squared differences accumulate per 4096-wide stride with compensated
/// summation, and the stride sums reduce with compensated summation
/// again, so the result does not depend on the stride partitioning.
///
/// # Panics
/// Panics when the arrays are empty or differ in length.
pub fn error_stats(original: &[f64], reconstructed: &[f64]) -> ErrorStats {
    assert_eq!(original.len(), reconstructed.len());
    assert!(!original.is_empty());

    let per_stride: Vec<(f64, f64)> = original
        .par_chunks(STRIDE)
        .zip(reconstructed.par_chunks(STRIDE))
        .map(|(original_stride, reconstructed_stride)| {
            let mut largest = 0.0_f64;
            let squares: Vec<f64> = original_stride.iter()
                .zip(reconstructed_stride)
                .map(|(&before, &after)| {
                    let difference = (before - after).abs();
                    largest = largest.max(difference);
                    difference * difference
                })
                .collect();
            (kahan_sum(&squares), largest)
        })
        .collect();

    let stride_sums: Vec<f64> = per_stride.iter().map(|&(sum, _)| sum).collect();
    let linfty = per_stride.iter().fold(0.0_f64, |max, &(_, largest)| max.max(largest));

    let mean_squared = kahan_sum(&stride_sums) / original.len() as f64;
    let rmse = mean_squared.sqrt();

    let original_min = original.iter().fold(f64::INFINITY, |min, &value| min.min(value));
    let original_max = original.iter().fold(f64::NEG_INFINITY, |max, &value| max.max(value));
    let range = original_max - original_min;
    let psnr = -10.0 * (mean_squared / (range * range)).log10();

    ErrorStats { rmse, linfty, psnr, original_min, original_max }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identical_arrays_have_no_error() {
        let values: Vec<f64> = (0 .. 10_000).map(|index| (index as f64 * 0.01).sin()).collect();
        let stats = error_stats(&values, &values);

        assert_eq!(stats.rmse, 0.0);
        assert_eq!(stats.linfty, 0.0);
        assert!(stats.psnr.is_infinite());
    }

    #[test]
    fn known_offset() {
        let original = vec![0.0; 8192];
        let reconstructed = vec![0.25; 8192];

        // a pure offset has rmse equal to linfty
        let stats = error_stats(&original, &reconstructed);
        assert!((stats.rmse - 0.25).abs() < 1e-12);
        assert_eq!(stats.linfty, 0.25);
    }

    #[test]
    fn psnr_matches_hand_computation() {
        let original: Vec<f64> = (0 .. 4096).map(|index| (index % 256) as f64).collect();
        let reconstructed: Vec<f64> = original.iter().map(|&value| value + 1.0).collect();

        let stats = error_stats(&original, &reconstructed);
        let expected = -10.0 * (1.0_f64 / (255.0 * 255.0)).log10();
        assert!((stats.psnr - expected).abs() < 1e-9);
        assert_eq!(stats.original_min, 0.0);
        assert_eq!(stats.original_max, 255.0);
    }
}
