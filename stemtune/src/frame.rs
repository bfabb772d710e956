//! Acquired image frames and their physical scale.

use ndarray::Array2;

/// A single acquired (or simulated) intensity frame together with the
/// physical field of view it covers.
///
/// The tuning core never mutates a frame in place; every processing stage
/// works on copies or derived arrays. Intensities are real and non-negative.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Intensity samples, indexed `[row, col]`.
    pub data: Array2<f64>,
    /// Physical edge length of the scanned area in nanometres.
    pub fov_nm: f64,
}

impl Frame {
    /// Wrap an intensity array with its field of view.
    pub fn new(data: Array2<f64>, fov_nm: f64) -> Self {
        debug_assert!(fov_nm > 0.0, "field of view must be positive");
        Self { data, fov_nm }
    }

    /// Frame dimensions as `(height, width)`.
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Array center `(row, col)` using integer division, the convention
    /// shared by the Fourier-domain code in this crate.
    pub fn center(&self) -> (usize, usize) {
        let (h, w) = self.data.dim();
        (h / 2, w / 2)
    }

    /// Mean intensity over the whole frame.
    pub fn mean(&self) -> f64 {
        self.data.mean().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_uses_integer_division() {
        let frame = Frame::new(Array2::zeros((5, 8)), 4.0);
        assert_eq!(frame.center(), (2, 4));
        let frame = Frame::new(Array2::zeros((6, 6)), 4.0);
        assert_eq!(frame.center(), (3, 3));
    }

    #[test]
    fn test_mean() {
        let frame = Frame::new(Array2::from_elem((4, 4), 2.5), 4.0);
        assert_eq!(frame.mean(), 2.5);
    }
}
