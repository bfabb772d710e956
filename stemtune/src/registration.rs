//! Image registration by Fourier cross-correlation.
//!
//! Both inputs are standardized to zero mean and unit variance, so the
//! correlation surface is a Pearson coefficient per candidate shift and the
//! peak height is directly comparable across frames.

use ndarray::Array2;
use rustfft::num_complex::Complex;

use crate::error::{TuneError, TuneResult};
use crate::fourier::{fft2, fftshift, ifft2};

/// Result of correlating a moved image against a reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    /// Row displacement of the moved image, positive is downwards.
    pub dy: isize,
    /// Column displacement of the moved image, positive is rightwards.
    pub dx: isize,
    /// Pearson correlation at the peak, in `[-1, 1]` up to rounding.
    pub peak: f64,
}

impl Correlation {
    /// Displacement direction in degrees, measured counterclockwise from
    /// the positive x axis in image coordinates (y grows downwards).
    pub fn angle_deg(&self) -> f64 {
        (-(self.dy as f64)).atan2(self.dx as f64).to_degrees()
    }

    /// Displacement magnitude in pixels.
    pub fn distance(&self) -> f64 {
        (self.dy as f64).hypot(self.dx as f64)
    }
}

fn standardize(image: &Array2<f64>, window: bool) -> Array2<f64> {
    let mut out = image.clone();
    if window {
        let (h, w) = out.dim();
        let row_window = hamming(h);
        let col_window = hamming(w);
        for row in 0..h {
            for col in 0..w {
                out[[row, col]] *= row_window[row] * col_window[col];
            }
        }
    }
    let mean = out.mean().unwrap_or(0.0);
    let var = out.mapv(|v| (v - mean) * (v - mean)).mean().unwrap_or(0.0);
    let std = var.sqrt();
    if std > 0.0 {
        out.mapv_inplace(|v| (v - mean) / std);
    } else {
        out.mapv_inplace(|v| v - mean);
    }
    out
}

fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Cross-correlate `moved` against `reference` and locate the displacement.
///
/// Fails with [`TuneError::NoCorrelation`] when the correlation maximum does
/// not clear the surface mean by three standard deviations, which is what
/// happens on frames that share no structure.
pub fn correlate(
    reference: &Array2<f64>,
    moved: &Array2<f64>,
    window: bool,
) -> TuneResult<Correlation> {
    if reference.dim() != moved.dim() {
        return Err(TuneError::ShapeMismatch);
    }
    let (h, w) = reference.dim();
    let n = (h * w) as f64;

    let ref_z = standardize(reference, window);
    let mov_z = standardize(moved, window);

    let ref_spectrum = fft2(&ref_z.mapv(|v| Complex::new(v, 0.0)));
    let mov_spectrum = fft2(&mov_z.mapv(|v| Complex::new(v, 0.0)));
    let cross = ndarray::Zip::from(&mov_spectrum)
        .and(&ref_spectrum)
        .map_collect(|m, r| m * r.conj());
    // ifft2 yields the raw correlation sum; dividing by N makes it Pearson
    let surface = fftshift(&ifft2(&cross).mapv(|v| v.re / n));

    let mut peak = f64::NEG_INFINITY;
    let mut peak_pos = (0usize, 0usize);
    for ((row, col), &value) in surface.indexed_iter() {
        if value > peak {
            peak = value;
            peak_pos = (row, col);
        }
    }
    let mean = surface.mean().unwrap_or(0.0);
    let var = surface.mapv(|v| (v - mean) * (v - mean)).mean().unwrap_or(0.0);
    let floor = mean + 3.0 * var.sqrt();
    if peak <= floor {
        return Err(TuneError::NoCorrelation { peak, floor });
    }

    Ok(Correlation {
        dy: peak_pos.0 as isize - (h / 2) as isize,
        dx: peak_pos.1 as isize - (w / 2) as isize,
        peak,
    })
}

/// Displacement `(dy, dx)` of `moved` relative to `reference`.
pub fn shift(
    reference: &Array2<f64>,
    moved: &Array2<f64>,
    window: bool,
) -> TuneResult<(isize, isize)> {
    let correlation = correlate(reference, moved, window)?;
    Ok((correlation.dy, correlation.dx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::fourier::roll;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_image(h: usize, w: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((h, w), |_| rng.gen_range(0.0..100.0))
    }

    #[test]
    fn test_recovers_cyclic_shift() {
        let reference = random_image(64, 64, 7);
        // content moved 5 rows down, 9 columns right
        let moved = roll(&reference, 5, 9);
        let found = correlate(&reference, &moved, false).unwrap();
        assert_eq!((found.dy, found.dx), (5, 9));
        assert_relative_eq!(found.peak, 1.0, max_relative = 1e-6);
    }

    #[test]
    fn test_recovers_negative_shift() {
        let reference = random_image(48, 64, 11);
        let moved = roll(&reference, 48 - 3, 64 - 7);
        let (dy, dx) = shift(&reference, &moved, false).unwrap();
        assert_eq!((dy, dx), (-3, -7));
    }

    #[test]
    fn test_windowed_shift_still_found() {
        let reference = random_image(64, 64, 3);
        let moved = roll(&reference, 2, 62);
        let found = correlate(&reference, &moved, true).unwrap();
        assert_eq!((found.dy, found.dx), (2, -2));
    }

    #[test]
    fn test_featureless_image_is_rejected() {
        // a constant frame carries no structure to register against
        let a = random_image(64, 64, 1);
        let b = Array2::from_elem((64, 64), 5.0);
        match correlate(&a, &b, false) {
            Err(TuneError::NoCorrelation { peak, floor }) => {
                assert!(peak <= floor);
            }
            other => panic!("expected NoCorrelation, got {other:?}"),
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let a = random_image(32, 32, 1);
        let b = random_image(32, 48, 1);
        assert!(matches!(
            correlate(&a, &b, false),
            Err(TuneError::ShapeMismatch)
        ));
    }

    #[test]
    fn test_angle_and_distance() {
        let c = Correlation { dy: -3, dx: 3, peak: 1.0 };
        assert_relative_eq!(c.angle_deg(), 45.0, epsilon = 1e-12);
        assert_relative_eq!(c.distance(), 3.0 * std::f64::consts::SQRT_2, epsilon = 1e-12);
    }
}
