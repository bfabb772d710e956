//! Contamination detection.
//!
//! Contamination ("dirt") shows up as bright, extended patches that drown the
//! lattice signal. Detection is a blur, a global threshold and a wide box
//! blur that removes isolated noise pixels from the mask. The threshold
//! itself is calibrated per frame by sweeping candidates and watching how
//! fast the masked area collapses.

use ndarray::Array2;

use crate::error::{TuneError, TuneResult};
use crate::filters::{gaussian_blur, uniform_blur};
use crate::frame::Frame;

/// Tunables for [`DirtDetector`].
#[derive(Debug, Clone)]
pub struct DirtDetectorConfig {
    /// Pre-threshold Gaussian smoothing; zero disables it.
    pub gaussian_sigma: f64,
    /// Edge length of the de-noising box blur, coerced up to odd.
    pub uniform_diameter: usize,
    /// Number of candidate thresholds swept during calibration.
    pub sweep_candidates: usize,
}

impl Default for DirtDetectorConfig {
    fn default() -> Self {
        Self {
            gaussian_sigma: 3.0,
            uniform_diameter: 59,
            sweep_candidates: 30,
        }
    }
}

/// Classifies contaminated pixels in a frame.
#[derive(Debug, Clone, Default)]
pub struct DirtDetector {
    config: DirtDetectorConfig,
}

impl DirtDetector {
    pub fn new(config: DirtDetectorConfig) -> Self {
        Self { config }
    }

    /// Binary dirt mask (1 = contaminated) for a fixed intensity threshold.
    pub fn detect_at(&self, frame: &Frame, threshold: f64) -> Array2<u8> {
        let smoothed = if self.config.gaussian_sigma > 0.0 {
            gaussian_blur(&frame.data, self.config.gaussian_sigma)
        } else {
            frame.data.clone()
        };
        let binary = smoothed.mapv(|v| if v > threshold { 1.0 } else { 0.0 });
        let averaged = uniform_blur(&binary, self.config.uniform_diameter);
        averaged.mapv(|v| if v >= 0.5 { 1u8 } else { 0u8 })
    }

    /// Calibrate a threshold for this frame, then build the mask with it.
    pub fn detect(&self, frame: &Frame) -> TuneResult<Array2<u8>> {
        let threshold = self.find_threshold(frame)?;
        Ok(self.detect_at(frame, threshold))
    }

    /// Sweep candidate thresholds over `[0, 2 * mean]` and pick one from the
    /// collapse profile of the masked area.
    ///
    /// The masked fraction starts near 1 and falls towards 0 as the
    /// threshold rises. A fast collapse means the frame is essentially
    /// clean, so the returned threshold sits safely above the collapse
    /// point. A slow collapse means real contamination; the threshold is
    /// placed slightly below the midpoint of the collapse interval so
    /// faint dirt is not missed.
    pub fn find_threshold(&self, frame: &Frame) -> TuneResult<f64> {
        let candidates = self.config.sweep_candidates.max(2);
        let upper = 2.0 * frame.mean();
        let step = upper / (candidates - 1) as f64;
        let pixel_count = (frame.shape().0 * frame.shape().1) as f64;

        let mut collapse_start = None;
        let mut collapse_end = None;
        for i in 0..candidates {
            let threshold = step * i as f64;
            let mask = self.detect_at(frame, threshold);
            let fraction = mask.iter().map(|&v| v as f64).sum::<f64>() / pixel_count;
            if fraction < 0.99 && collapse_start.is_none() {
                collapse_start = Some(threshold);
            }
            if fraction < 0.01 {
                collapse_end = Some(threshold);
                break;
            }
        }

        match (collapse_start, collapse_end) {
            (Some(start), Some(end)) => {
                let threshold = if end - start < 3.0 * step {
                    end * 1.25
                } else {
                    (end + start) * 0.45
                };
                log::debug!(
                    "dirt threshold calibrated to {threshold:.4} (collapse {start:.4}..{end:.4})"
                );
                Ok(threshold)
            }
            _ => Err(TuneError::InsufficientData),
        }
    }
}

/// Fraction of pixels a mask marks as dirt.
pub fn dirt_fraction(mask: &Array2<u8>) -> f64 {
    let total = mask.len() as f64;
    if total == 0.0 {
        return 0.0;
    }
    mask.iter().map(|&v| v as f64).sum::<f64>() / total
}
