//! The scalar tuning merit.
//!
//! Lower is better. The score folds together the integrated reflection
//! intensities, the point symmetry of the Fourier-filtered lattice and its
//! contrast over the clean part of the frame; each of those grows as the
//! aberrations shrink, so the optimizer minimizes the reciprocal.

use ndarray::{s, Array2};
use rustfft::num_complex::Complex;

use crate::dirt::dirt_fraction;
use crate::error::{TuneError, TuneResult};
use crate::fourier::{fft2_real, fftshift, ifft2, ifftshift};
use crate::frame::Frame;
use crate::peaks::{PeakLocator, PeakSet};
use crate::registration::correlate;

/// Tunables for [`MeritEvaluator`].
#[derive(Debug, Clone)]
pub struct MeritConfig {
    /// Dirt fraction above which evaluation aborts.
    pub dirt_limit: f64,
    /// Half size of the Gaussian windows cut around each reflection.
    pub filter_radius: usize,
    /// Score substituted for recoverable evaluation failures.
    pub worst_score: f64,
}

impl Default for MeritConfig {
    fn default() -> Self {
        Self {
            dirt_limit: 0.5,
            filter_radius: 7,
            worst_score: 1e5,
        }
    }
}

/// Scores frames for the optimizer.
#[derive(Debug, Clone, Default)]
pub struct MeritEvaluator {
    locator: PeakLocator,
    config: MeritConfig,
}

impl MeritEvaluator {
    pub fn new(locator: PeakLocator, config: MeritConfig) -> Self {
        Self { locator, config }
    }

    pub fn config(&self) -> &MeritConfig {
        &self.config
    }

    /// Full merit of one frame given its dirt mask.
    ///
    /// Fails with [`TuneError::DirtExceeded`] when the mask covers more than
    /// the configured limit; that error is fatal to a tuning run.
    pub fn evaluate(&self, frame: &Frame, mask: &Array2<u8>) -> TuneResult<f64> {
        let fraction = dirt_fraction(mask);
        if fraction > self.config.dirt_limit {
            return Err(TuneError::DirtExceeded {
                fraction,
                limit: self.config.dirt_limit,
            });
        }

        let peaks = self.locator.find_peaks(frame, true)?;
        let intensity_sum = peaks.intensity_sum();

        let filtered = self.fourier_filter(frame, &peaks);
        let (symmetry, contrast) = self.symmetry_terms(frame, &filtered, mask, fraction)?;

        let score = 1.0 / (intensity_sum / 1e6 + symmetry + contrast);
        if score.is_finite() {
            log::debug!(
                "merit {score:.6} (intensities {intensity_sum:.1}, symmetry {symmetry:.4}, \
                 contrast {contrast:.4})"
            );
            Ok(score)
        } else {
            Err(TuneError::NonFiniteMerit)
        }
    }

    /// Like [`evaluate`](Self::evaluate), but recoverable failures (no
    /// reflections, no credible symmetry correlation) collapse to the
    /// configured worst score instead of an error.
    pub fn evaluate_or_worst(&self, frame: &Frame, mask: &Array2<u8>) -> TuneResult<f64> {
        match self.evaluate(frame, mask) {
            Ok(score) => Ok(score),
            Err(TuneError::PeakSearchExhausted { .. }) | Err(TuneError::NoCorrelation { .. }) => {
                Ok(self.config.worst_score)
            }
            Err(other) => Err(other),
        }
    }

    /// Reconstruct the lattice from Gaussian windows around the located
    /// reflections in the complex spectrum.
    pub fn fourier_filter(&self, frame: &Frame, peaks: &PeakSet) -> Array2<f64> {
        let spectrum = fftshift(&fft2_real(&frame.data));
        let (h, w) = spectrum.dim();
        let radius = self.config.filter_radius as isize;
        let sigma = self.config.filter_radius as f64 / 2.0;

        let mut masked = Array2::from_elem((h, w), Complex::new(0.0, 0.0));
        for peak in peaks.iter_found() {
            let (pr, pc) = (peak.row as isize, peak.col as isize);
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let (row, col) = (pr + dy, pc + dx);
                    if row < 0 || col < 0 || row >= h as isize || col >= w as isize {
                        continue;
                    }
                    let weight =
                        (-0.5 * ((dy * dy + dx * dx) as f64) / (sigma * sigma)).exp();
                    masked[[row as usize, col as usize]] +=
                        spectrum[[row as usize, col as usize]] * weight;
                }
            }
        }
        ifft2(&ifftshift(&masked)).mapv(|v| v.re)
    }

    /// Symmetry and contrast terms over the clean part of the frame.
    fn symmetry_terms(
        &self,
        frame: &Frame,
        filtered: &Array2<f64>,
        mask: &Array2<u8>,
        dirt: f64,
    ) -> TuneResult<(f64, f64)> {
        // point mirror: flip both axes
        let mirrored = filtered.slice(s![..;-1, ..;-1]).to_owned();
        let symmetry = correlate(filtered, &mirrored, false)?.peak * (1.0 - dirt);

        let mut clean_sum = 0.0;
        let mut clean_count = 0usize;
        for (value, &flag) in frame.data.iter().zip(mask.iter()) {
            if flag == 0 {
                clean_sum += value;
                clean_count += 1;
            }
        }
        if clean_count == 0 {
            return Err(TuneError::NonFiniteMerit);
        }
        let clean_mean = clean_sum / clean_count as f64;

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for (value, &flag) in filtered.iter().zip(mask.iter()) {
            if flag == 0 {
                sum += value;
                sum_sq += value * value;
            }
        }
        let mean = sum / clean_count as f64;
        let variance = sum_sq / clean_count as f64 - mean * mean;
        let contrast = variance / (clean_mean * clean_mean) * 50.0;

        Ok((symmetry, contrast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peaks::Peak;
    use ndarray::Array2;

    fn lattice_frame(size: usize, period: f64) -> Frame {
        let data = Array2::from_shape_fn((size, size), |(row, col)| {
            let phase = 2.0 * std::f64::consts::PI / period;
            10.0 + (phase * row as f64).cos() * (phase * col as f64).cos()
        });
        Frame::new(data, 4.0)
    }

    fn clean_mask(size: usize) -> Array2<u8> {
        Array2::zeros((size, size))
    }

    #[test]
    fn test_dirt_gate_aborts() {
        let frame = lattice_frame(64, 8.0);
        let mask = Array2::from_elem((64, 64), 1u8);
        let evaluator = MeritEvaluator::default();
        match evaluator.evaluate(&frame, &mask) {
            Err(TuneError::DirtExceeded { fraction, limit }) => {
                assert_eq!(fraction, 1.0);
                assert_eq!(limit, 0.5);
            }
            other => panic!("expected DirtExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_dirt_gate_propagates_through_or_worst() {
        let frame = lattice_frame(64, 8.0);
        let mask = Array2::from_elem((64, 64), 1u8);
        let evaluator = MeritEvaluator::default();
        assert!(matches!(
            evaluator.evaluate_or_worst(&frame, &mask),
            Err(TuneError::DirtExceeded { .. })
        ));
    }

    #[test]
    fn test_featureless_frame_scores_worst() {
        let frame = Frame::new(Array2::from_elem((128, 128), 5.0), 4.0);
        let evaluator = MeritEvaluator::default();
        let score = evaluator
            .evaluate_or_worst(&frame, &clean_mask(128))
            .unwrap();
        assert_eq!(score, evaluator.config().worst_score);
    }

    #[test]
    fn test_fourier_filter_keeps_only_selected_bands() {
        // single cosine: spectrum has two conjugate reflections
        let size = 64usize;
        let frame = Frame::new(
            Array2::from_shape_fn((size, size), |(_, col)| {
                (2.0 * std::f64::consts::PI * col as f64 * 8.0 / size as f64).cos()
            }),
            4.0,
        );
        let center = size / 2;
        let mut first = [Peak::default(); 6];
        first[0] = Peak { row: center, col: center + 8, height: 1.0, integrated: 1.0 };
        first[1] = Peak { row: center, col: center - 8, height: 1.0, integrated: 1.0 };
        let peaks = PeakSet { first, second: None };

        let evaluator = MeritEvaluator::default();
        let filtered = evaluator.fourier_filter(&frame, &peaks);
        // reconstruction tracks the original cosine closely
        let mut max_err = 0.0f64;
        for (a, b) in filtered.iter().zip(frame.data.iter()) {
            max_err = max_err.max((a - b).abs());
        }
        assert!(max_err < 0.2, "max reconstruction error {max_err}");
    }
}
