//! Spatial-domain smoothing filters.
//!
//! Both filters are separable and use reflected boundary handling, so a
//! constant image passes through unchanged.

use ndarray::Array2;

/// Reflect an out-of-range index back into `0..len` (boundary mirrored
/// about the edge samples, `scipy`-style `reflect`).
fn reflect(idx: isize, len: usize) -> usize {
    let len = len as isize;
    let mut i = idx;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= len {
            i = 2 * len - i - 1;
        } else {
            return i as usize;
        }
    }
}

fn convolve_rows(image: &Array2<f64>, kernel: &[f64]) -> Array2<f64> {
    let (h, w) = image.dim();
    let radius = (kernel.len() / 2) as isize;
    let mut out = Array2::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut acc = 0.0;
            for (t, k) in kernel.iter().enumerate() {
                let src = reflect(col as isize + t as isize - radius, w);
                acc += image[[row, src]] * k;
            }
            out[[row, col]] = acc;
        }
    }
    out
}

fn convolve_cols(image: &Array2<f64>, kernel: &[f64]) -> Array2<f64> {
    let (h, w) = image.dim();
    let radius = (kernel.len() / 2) as isize;
    let mut out = Array2::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut acc = 0.0;
            for (t, k) in kernel.iter().enumerate() {
                let src = reflect(row as isize + t as isize - radius, h);
                acc += image[[src, col]] * k;
            }
            out[[row, col]] = acc;
        }
    }
    out
}

/// Gaussian blur with kernel radius `ceil(3 sigma)`, normalized to unit sum.
pub fn gaussian_blur(image: &Array2<f64>, sigma: f64) -> Array2<f64> {
    if sigma <= 0.0 {
        return image.clone();
    }
    let radius = (3.0 * sigma).ceil() as usize;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    for i in 0..=(2 * radius) {
        let x = i as f64 - radius as f64;
        kernel.push((-x * x / (2.0 * sigma * sigma)).exp());
    }
    let sum: f64 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    convolve_cols(&convolve_rows(image, &kernel), &kernel)
}

/// Box blur over a square window of edge `diameter` (coerced up to odd).
pub fn uniform_blur(image: &Array2<f64>, diameter: usize) -> Array2<f64> {
    let diameter = if diameter % 2 == 0 { diameter + 1 } else { diameter };
    let kernel = vec![1.0 / diameter as f64; diameter];
    convolve_cols(&convolve_rows(image, &kernel), &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_image_is_invariant() {
        let image = Array2::from_elem((16, 16), 3.0);
        let blurred = gaussian_blur(&image, 2.0);
        for &v in blurred.iter() {
            assert_relative_eq!(v, 3.0, max_relative = 1e-12);
        }
        let boxed = uniform_blur(&image, 5);
        for &v in boxed.iter() {
            assert_relative_eq!(v, 3.0, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_blur_preserves_total_mass_up_to_reflection() {
        // With reflected boundaries a centered impulse keeps unit mass.
        let mut image = Array2::zeros((21, 21));
        image[[10, 10]] = 1.0;
        let blurred = gaussian_blur(&image, 1.5);
        assert_relative_eq!(blurred.sum(), 1.0, max_relative = 1e-9);
        assert!(blurred[[10, 10]] < 1.0);
        assert!(blurred[[10, 10]] > blurred[[10, 12]]);
    }

    #[test]
    fn test_uniform_blur_coerces_even_diameter() {
        let mut image = Array2::zeros((9, 9));
        image[[4, 4]] = 25.0;
        // diameter 4 is coerced to 5, so the impulse spreads to 1.0 per pixel
        let blurred = uniform_blur(&image, 4);
        assert_relative_eq!(blurred[[4, 4]], 1.0, max_relative = 1e-12);
        assert_relative_eq!(blurred[[2, 2]], 1.0, max_relative = 1e-12);
        assert_relative_eq!(blurred[[1, 4]], 0.0, max_relative = 1e-12);
    }

    #[test]
    fn test_zero_sigma_is_identity() {
        let mut image = Array2::zeros((4, 4));
        image[[1, 2]] = 7.0;
        let out = gaussian_blur(&image, 0.0);
        assert_eq!(out, image);
    }
}
