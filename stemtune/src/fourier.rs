//! Two-dimensional FFT helpers built on `rustfft`.
//!
//! Transforms are unnormalized on the forward pass; the inverse divides by
//! the element count so `ifft2(fft2(x)) == x`.

use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Forward 2D FFT, rows then columns.
pub fn fft2(input: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    transform2(input, rustfft::FftDirection::Forward)
}

/// Inverse 2D FFT, scaled by `1/(h*w)`.
pub fn ifft2(input: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    let (h, w) = input.dim();
    let mut out = transform2(input, rustfft::FftDirection::Inverse);
    let scale = 1.0 / (h * w) as f64;
    out.mapv_inplace(|v| v * scale);
    out
}

/// Forward 2D FFT of a real image.
pub fn fft2_real(input: &Array2<f64>) -> Array2<Complex<f64>> {
    fft2(&input.mapv(|v| Complex::new(v, 0.0)))
}

fn transform2(
    input: &Array2<Complex<f64>>,
    direction: rustfft::FftDirection,
) -> Array2<Complex<f64>> {
    let (h, w) = input.dim();
    let mut planner = FftPlanner::new();
    let row_fft = planner.plan_fft(w, direction);
    let col_fft = planner.plan_fft(h, direction);

    // Copy into standard layout so rows are contiguous regardless of the
    // caller's memory order (e.g. mirrored views keep reversed strides).
    let mut out = input.as_standard_layout().into_owned();
    for mut row in out.rows_mut() {
        let slice = row
            .as_slice_mut()
            .unwrap_or_else(|| unreachable!("rows of an owned row-major array are contiguous"));
        row_fft.process(slice);
    }

    let mut column = vec![Complex::new(0.0, 0.0); h];
    for col in 0..w {
        for row in 0..h {
            column[row] = out[[row, col]];
        }
        col_fft.process(&mut column);
        for row in 0..h {
            out[[row, col]] = column[row];
        }
    }
    out
}

/// Cyclically shift an array by `(dy, dx)` (positive moves content down/right).
pub fn roll<T: Clone>(input: &Array2<T>, dy: usize, dx: usize) -> Array2<T> {
    let (h, w) = input.dim();
    let mut out = input.clone();
    for row in 0..h {
        for col in 0..w {
            out[[(row + dy) % h, (col + dx) % w]] = input[[row, col]].clone();
        }
    }
    out
}

/// Move the zero-frequency sample to the array center.
pub fn fftshift<T: Clone>(input: &Array2<T>) -> Array2<T> {
    let (h, w) = input.dim();
    roll(input, h / 2, w / 2)
}

/// Inverse of [`fftshift`], exact for odd dimensions too.
pub fn ifftshift<T: Clone>(input: &Array2<T>) -> Array2<T> {
    let (h, w) = input.dim();
    roll(input, h - h / 2, w - w / 2)
}

/// FFT sample frequencies for `n` samples at spacing `d`, `numpy` ordering.
pub fn fft_frequencies(n: usize, d: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(n);
    let step = 1.0 / (n as f64 * d);
    let split = (n as isize + 1) / 2;
    for i in 0..n as isize {
        let k = if i < split { i } else { i - n as isize };
        out.push(k as f64 * step);
    }
    out
}

/// FFT-based 2D convolution returning the `same`-sized central region.
pub fn convolve_same(image: &Array2<f64>, kernel: &Array2<f64>) -> Array2<f64> {
    let (h, w) = image.dim();
    let (kh, kw) = kernel.dim();
    let (fh, fw) = (h + kh - 1, w + kw - 1);

    let mut a = Array2::from_elem((fh, fw), Complex::new(0.0, 0.0));
    for row in 0..h {
        for col in 0..w {
            a[[row, col]] = Complex::new(image[[row, col]], 0.0);
        }
    }
    let mut b = Array2::from_elem((fh, fw), Complex::new(0.0, 0.0));
    for row in 0..kh {
        for col in 0..kw {
            b[[row, col]] = Complex::new(kernel[[row, col]], 0.0);
        }
    }

    let product = &fft2(&a) * &fft2(&b);
    let full = ifft2(&product);

    let (oy, ox) = ((kh - 1) / 2, (kw - 1) / 2);
    let mut out = Array2::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            out[[row, col]] = full[[row + oy, col + ox]].re;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fft_round_trip() {
        let mut image = Array2::zeros((8, 6));
        image[[2, 3]] = 1.0;
        image[[5, 1]] = -2.5;
        let restored = ifft2(&fft2_real(&image));
        for row in 0..8 {
            for col in 0..6 {
                assert_relative_eq!(restored[[row, col]].re, image[[row, col]], epsilon = 1e-12);
                assert_relative_eq!(restored[[row, col]].im, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_fftshift_moves_dc_to_center() {
        let mut image = Array2::zeros((8, 8));
        image[[0, 0]] = 1.0;
        let shifted = fftshift(&image);
        assert_eq!(shifted[[4, 4]], 1.0);
        assert_eq!(ifftshift(&shifted), image);
    }

    #[test]
    fn test_ifftshift_inverts_fftshift_for_odd_sizes() {
        let mut image = Array2::zeros((5, 7));
        image[[1, 2]] = 3.0;
        image[[4, 6]] = -1.0;
        assert_eq!(ifftshift(&fftshift(&image)), image);
    }

    #[test]
    fn test_fft_frequencies_ordering() {
        let freqs = fft_frequencies(4, 1.0);
        assert_eq!(freqs, vec![0.0, 0.25, -0.5, -0.25]);
        let freqs = fft_frequencies(5, 0.5);
        assert_relative_eq!(freqs[2], 0.8, epsilon = 1e-12);
        assert_relative_eq!(freqs[3], -0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_convolve_same_identity_kernel() {
        let mut image = Array2::zeros((10, 10));
        image[[3, 7]] = 2.0;
        image[[6, 2]] = 5.0;
        let mut kernel = Array2::zeros((3, 3));
        kernel[[1, 1]] = 1.0;
        let out = convolve_same(&image, &kernel);
        for row in 0..10 {
            for col in 0..10 {
                assert_relative_eq!(out[[row, col]], image[[row, col]], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_convolve_same_spreads_impulse() {
        let mut image = Array2::zeros((9, 9));
        image[[4, 4]] = 1.0;
        let kernel = Array2::from_elem((3, 3), 1.0 / 9.0);
        let out = convolve_same(&image, &kernel);
        assert_relative_eq!(out[[4, 4]], 1.0 / 9.0, epsilon = 1e-10);
        assert_relative_eq!(out[[3, 5]], 1.0 / 9.0, epsilon = 1e-10);
        assert_relative_eq!(out[[2, 4]], 0.0, epsilon = 1e-10);
    }
}
