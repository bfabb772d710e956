//! Hexagonal reflection search in the Fourier magnitude.
//!
//! Graphene shows six first-order reflections at radius `fov / 0.213 nm` in
//! the centered Fourier magnitude and six second-order reflections, rotated
//! 30 degrees, at `fov / 0.123 nm`. The locator conditions the magnitude
//! (central blanking, scan-streak subtraction, low-frequency attenuation),
//! then anchors one credible reflection and predicts the remaining five by
//! 60 degree rotational symmetry.

use ndarray::Array2;

use crate::error::{TuneError, TuneResult};
use crate::fit::{fit_hyperbola, gaussian2d, Hyperbola};
use crate::fourier::{fft2_real, fftshift};
use crate::frame::Frame;

/// First-order graphene lattice spacing in nm.
pub const FIRST_ORDER_SPACING_NM: f64 = 0.213;
/// Second-order graphene lattice spacing in nm.
pub const SECOND_ORDER_SPACING_NM: f64 = 0.123;

const SENTINEL: f64 = -1.0;

/// A located reflection in the centered Fourier magnitude.
///
/// A zeroed peak means "not found at this position"; the anchor peak is
/// always found, the other five may individually be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Peak {
    pub row: usize,
    pub col: usize,
    /// Conditioned magnitude at the maximum.
    pub height: f64,
    /// Raw magnitude integrated over a disk around the maximum.
    pub integrated: f64,
}

impl Peak {
    /// Whether this slot holds an actual reflection.
    pub fn is_found(&self) -> bool {
        self.height > 0.0
    }
}

/// The reflections found in one frame.
#[derive(Debug, Clone)]
pub struct PeakSet {
    /// First-order ring, anchor first, then counterclockwise.
    pub first: [Peak; 6],
    /// Second-order ring, when it was requested.
    pub second: Option<[Peak; 6]>,
}

impl PeakSet {
    /// Number of reflections actually located across both rings.
    pub fn found_count(&self) -> usize {
        let firsts = self.first.iter().filter(|p| p.is_found()).count();
        let seconds = self
            .second
            .iter()
            .flatten()
            .filter(|p| p.is_found())
            .count();
        firsts + seconds
    }

    /// Sum of integrated raw intensities over all located reflections.
    pub fn intensity_sum(&self) -> f64 {
        let firsts: f64 = self
            .first
            .iter()
            .filter(|p| p.is_found())
            .map(|p| p.integrated)
            .sum();
        let seconds: f64 = self
            .second
            .iter()
            .flatten()
            .filter(|p| p.is_found())
            .map(|p| p.integrated)
            .sum();
        firsts + seconds
    }

    /// All found reflections, first order then second order.
    pub fn iter_found(&self) -> impl Iterator<Item = &Peak> {
        self.first
            .iter()
            .chain(self.second.iter().flatten())
            .filter(|p| p.is_found())
    }
}

/// Tunables for [`PeakLocator`].
#[derive(Debug, Clone)]
pub struct PeakLocatorConfig {
    /// Half thickness of the scan-streak bands that get fitted and removed.
    pub half_line_thickness: usize,
    /// Half size of the window searched around each predicted position.
    pub position_tolerance: usize,
    /// Disk radius for integrating raw intensity around a maximum.
    pub integration_radius: usize,
}

impl Default for PeakLocatorConfig {
    fn default() -> Self {
        Self {
            half_line_thickness: 3,
            position_tolerance: 5,
            integration_radius: 5,
        }
    }
}

/// Finds the hexagonal reflection pattern in a frame.
#[derive(Debug, Clone, Default)]
pub struct PeakLocator {
    config: PeakLocatorConfig,
}

impl PeakLocator {
    pub fn new(config: PeakLocatorConfig) -> Self {
        Self { config }
    }

    /// Locate first-order (and optionally second-order) reflections.
    pub fn find_peaks(&self, frame: &Frame, second_order: bool) -> TuneResult<PeakSet> {
        let magnitude = fftshift(&fft2_real(&frame.data).mapv(|v| v.norm()));
        self.find_in_magnitude(&magnitude, frame.fov_nm, second_order)
    }

    /// Same search on an already centered magnitude array.
    pub fn find_in_magnitude(
        &self,
        magnitude: &Array2<f64>,
        fov_nm: f64,
        second_order: bool,
    ) -> TuneResult<PeakSet> {
        let raw = magnitude.clone();
        let mut fft = magnitude.clone();
        let (h, w) = fft.dim();
        let center = ((h / 2) as isize, (w / 2) as isize);

        let first_radius = fov_nm / FIRST_ORDER_SPACING_NM;
        let second_radius = fov_nm / SECOND_ORDER_SPACING_NM;

        // keep first and second order search windows from overlapping
        let ring_gap = (second_radius - first_radius) / std::f64::consts::SQRT_2 - 1.0;
        let mut tolerance = self.config.position_tolerance as isize;
        if tolerance as f64 > ring_gap {
            tolerance = ring_gap.round().max(1.0) as isize;
        }

        blank_disk(&mut fft, center, (first_radius / 2.0).round() as isize);

        let max_half_line = (first_radius / 2.0).round() as isize - 1;
        let half_line = (self.config.half_line_thickness as isize)
            .min(max_half_line)
            .max(0);

        let valid_mean = mean_above_sentinel(&fft);
        self.subtract_scan_streaks(&mut fft, center, half_line, valid_mean);
        attenuate_center(&mut fft, center, first_radius);

        let max_attempts = ((h as f64).sqrt().ceil() as usize).max(1);
        for _ in 0..max_attempts {
            let anchor = match self.pick_anchor(&mut fft, center, first_radius, tolerance) {
                Some(candidate) => candidate,
                // nothing positive left to anchor on
                None => break,
            };
            let Some(anchor) = anchor else {
                // candidate rejected and blanked, try the next maximum
                continue;
            };

            let anchor_peak = Peak {
                row: anchor.0 as usize,
                col: anchor.1 as usize,
                height: anchor.2,
                integrated: integrate_disk(&raw, anchor.0, anchor.1, self.config.integration_radius),
            };

            let Some(first) =
                self.collect_ring(&fft, &raw, center, anchor_peak, tolerance, 0.0, 1.0, 5.0)?
            else {
                // a predicted window fell off the frame, discard this anchor
                blank_window(&mut fft, (anchor.0, anchor.1), tolerance);
                continue;
            };

            let second = if second_order {
                let mut tol2 = ((tolerance as f64) * 3.0_f64.sqrt()).round() as isize;
                if tol2 as f64 >= ring_gap {
                    tol2 = ring_gap.round().max(1.0) as isize;
                }
                let scale = FIRST_ORDER_SPACING_NM / SECOND_ORDER_SPACING_NM;
                let Some(ring) = self.collect_ring(
                    &fft,
                    &raw,
                    center,
                    anchor_peak,
                    tol2,
                    30.0,
                    scale,
                    4.0,
                )?
                else {
                    blank_window(&mut fft, (anchor.0, anchor.1), tolerance);
                    continue;
                };
                Some(ring)
            } else {
                None
            };

            let mut first = first;
            first[0] = anchor_peak;
            return Ok(PeakSet { first, second });
        }

        Err(TuneError::PeakSearchExhausted {
            attempts: max_attempts,
        })
    }

    /// Pick the next anchor candidate: `None` means the surface is spent,
    /// `Some(None)` means the candidate was rejected and blanked.
    #[allow(clippy::type_complexity)]
    fn pick_anchor(
        &self,
        fft: &mut Array2<f64>,
        center: (isize, isize),
        first_radius: f64,
        tolerance: isize,
    ) -> Option<Option<(isize, isize, f64)>> {
        let (row, col, value) = argmax(fft);
        if value <= 0.0 {
            return None;
        }
        let pos = (row as isize, col as isize);

        let Some(stats) = window_stats(fft, pos, tolerance) else {
            // window clipped by the frame edge, not a usable anchor
            blank_window(fft, pos, tolerance);
            return Some(None);
        };
        if value < stats.mean + 6.0 * stats.std {
            blank_window(fft, pos, tolerance);
            return Some(None);
        }

        let dy = (pos.0 - center.0) as f64;
        let dx = (pos.1 - center.1) as f64;
        let radius = dy.hypot(dx);
        if radius < first_radius * 0.6667 || radius > first_radius * 1.5 {
            blank_window(fft, pos, tolerance);
            return Some(None);
        }

        Some(Some((pos.0, pos.1, value)))
    }

    /// Predict the remaining ring positions from the anchor by rotation and
    /// collect whatever clears the significance bar. `Ok(None)` signals a
    /// predicted window outside the frame.
    #[allow(clippy::too_many_arguments)]
    fn collect_ring(
        &self,
        fft: &Array2<f64>,
        raw: &Array2<f64>,
        center: (isize, isize),
        anchor: Peak,
        tolerance: isize,
        angle_offset_deg: f64,
        radial_scale: f64,
        sigma_bar: f64,
    ) -> TuneResult<Option<[Peak; 6]>> {
        let mut ring = [Peak::default(); 6];
        let start = if angle_offset_deg == 0.0 && radial_scale == 1.0 {
            1
        } else {
            0
        };
        let dy = (anchor.row as isize - center.0) as f64 * radial_scale;
        let dx = (anchor.col as isize - center.1) as f64 * radial_scale;

        for (i, slot) in ring.iter_mut().enumerate().skip(start) {
            let angle = (i as f64 * 60.0 + angle_offset_deg).to_radians();
            let (sin, cos) = angle.sin_cos();
            let pred_row = (cos * dy - sin * dx + center.0 as f64).round() as isize;
            let pred_col = (sin * dy + cos * dx + center.1 as f64).round() as isize;

            let Some(stats) = window_stats(fft, (pred_row, pred_col), tolerance) else {
                return Ok(None);
            };
            if stats.max > stats.mean + sigma_bar * stats.std {
                let row = (pred_row + stats.argmax.0 - tolerance) as usize;
                let col = (pred_col + stats.argmax.1 - tolerance) as usize;
                *slot = Peak {
                    row,
                    col,
                    height: stats.max,
                    integrated: integrate_disk(raw, row as isize, col as isize, self.config.integration_radius),
                };
            }
        }
        Ok(Some(ring))
    }

    /// Fit each scan-streak band with a symmetric hyperbola and subtract the
    /// fitted profile, lifted by 1.5 times the background mean.
    fn subtract_scan_streaks(
        &self,
        fft: &mut Array2<f64>,
        center: (isize, isize),
        half_line: isize,
        valid_mean: f64,
    ) {
        let (h, w) = fft.dim();
        let mut cross = Array2::zeros((h, w));
        for i in -half_line..=half_line {
            let band_row = (center.0 + i) as usize;
            let band_col = (center.1 + i) as usize;

            let horizontal: Vec<(isize, f64)> = (0..w)
                .filter(|&c| fft[[band_row, c]] > SENTINEL)
                .map(|c| (c as isize - center.1, fft[[band_row, c]]))
                .collect();
            if let Some(profile) = fit_streak(&horizontal) {
                for &(x, _) in &horizontal {
                    let col = (x + center.1) as usize;
                    cross[[band_row, col]] = profile.eval(x as f64) - 1.5 * valid_mean;
                }
            }

            let vertical: Vec<(isize, f64)> = (0..h)
                .filter(|&r| fft[[r, band_col]] > SENTINEL)
                .map(|r| (r as isize - center.0, fft[[r, band_col]]))
                .collect();
            if let Some(profile) = fit_streak(&vertical) {
                for &(y, _) in &vertical {
                    let row = (y + center.0) as usize;
                    cross[[row, band_col]] = profile.eval(y as f64) - 1.5 * valid_mean;
                }
            }
        }
        *fft -= &cross;
    }
}

/// Estimate and fit one streak profile; `None` when the band is degenerate.
fn fit_streak(samples: &[(isize, f64)]) -> Option<Hyperbola> {
    let n = samples.len();
    if n < 20 {
        return None;
    }
    let idx60 = (n as f64 * 0.6) as usize;
    let idx70 = (n as f64 * 0.7) as usize;
    let m60 = window_mean(samples, idx60)?;
    let m70 = window_mean(samples, idx70)?;
    let x60 = samples[idx60].0 as f64;
    let denom = (m60 - m70) * 2.0 * x60;
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    let initial = Hyperbola {
        a: 1.0 / denom,
        offset: 0.0,
    };

    // fit only the first (negative frequency) half of the band
    let half = n / 2;
    let xs: Vec<f64> = samples[..half].iter().map(|&(x, _)| x as f64).collect();
    let ys: Vec<f64> = samples[..half].iter().map(|&(_, y)| y).collect();
    match fit_hyperbola(&xs, &ys, initial) {
        Ok(fitted) => Some(fitted),
        Err(_) => Some(initial),
    }
}

fn window_mean(samples: &[(isize, f64)], idx: usize) -> Option<f64> {
    if idx < 3 || idx + 4 > samples.len() {
        return None;
    }
    let window = &samples[idx - 3..idx + 4];
    Some(window.iter().map(|&(_, y)| y).sum::<f64>() / window.len() as f64)
}

fn mean_above_sentinel(fft: &Array2<f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in fft.iter() {
        if v > SENTINEL {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn blank_disk(fft: &mut Array2<f64>, center: (isize, isize), radius: isize) {
    let (h, w) = fft.dim();
    for row in (center.0 - radius).max(0)..=(center.0 + radius).min(h as isize - 1) {
        for col in (center.1 - radius).max(0)..=(center.1 + radius).min(w as isize - 1) {
            let dy = (row - center.0) as f64;
            let dx = (col - center.1) as f64;
            if dy.hypot(dx) <= radius as f64 {
                fft[[row as usize, col as usize]] = SENTINEL;
            }
        }
    }
}

/// Multiply an inverted Gaussian ring onto the center so low frequencies
/// cannot outshine the lattice reflections.
fn attenuate_center(fft: &mut Array2<f64>, center: (isize, isize), first_radius: f64) {
    let (h, w) = fft.dim();
    let sigma = 0.75 * first_radius;
    let extent = 4 * first_radius as isize;
    let attenuate = |fft: &mut Array2<f64>, row: isize, col: isize| {
        let dy = (row - center.0) as f64;
        let dx = (col - center.1) as f64;
        let factor = gaussian2d(dy, dx, -1.0, sigma, 1.0);
        fft[[row as usize, col as usize]] *= factor;
    };
    if extent < center.0 && extent < center.1 {
        for row in center.0 - extent..=center.0 + extent {
            for col in center.1 - extent..=center.1 + extent {
                attenuate(fft, row, col);
            }
        }
    } else {
        for row in 0..h as isize {
            for col in 0..w as isize {
                attenuate(fft, row, col);
            }
        }
    }
}

fn blank_window(fft: &mut Array2<f64>, pos: (isize, isize), tolerance: isize) {
    let (h, w) = fft.dim();
    for row in (pos.0 - tolerance).max(0)..=(pos.0 + tolerance).min(h as isize - 1) {
        for col in (pos.1 - tolerance).max(0)..=(pos.1 + tolerance).min(w as isize - 1) {
            fft[[row as usize, col as usize]] = 0.0;
        }
    }
}

struct WindowStats {
    mean: f64,
    std: f64,
    max: f64,
    /// Offset of the maximum within the window.
    argmax: (isize, isize),
}

/// Statistics over the full square window; `None` when any part of it falls
/// outside the array.
fn window_stats(fft: &Array2<f64>, pos: (isize, isize), tolerance: isize) -> Option<WindowStats> {
    let (h, w) = fft.dim();
    if pos.0 - tolerance < 0
        || pos.1 - tolerance < 0
        || pos.0 + tolerance >= h as isize
        || pos.1 + tolerance >= w as isize
    {
        return None;
    }
    let mut sum = 0.0;
    let mut max = f64::NEG_INFINITY;
    let mut argmax = (0, 0);
    let mut values = Vec::with_capacity(((2 * tolerance + 1) * (2 * tolerance + 1)) as usize);
    for dy in -tolerance..=tolerance {
        for dx in -tolerance..=tolerance {
            let v = fft[[(pos.0 + dy) as usize, (pos.1 + dx) as usize]];
            sum += v;
            values.push(v);
            if v > max {
                max = v;
                argmax = (dy + tolerance, dx + tolerance);
            }
        }
    }
    let mean = sum / values.len() as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    Some(WindowStats {
        mean,
        std: var.sqrt(),
        max,
        argmax,
    })
}

/// Sum raw magnitude over a disk, clipped at the array edges.
fn integrate_disk(raw: &Array2<f64>, row: isize, col: isize, radius: usize) -> f64 {
    let (h, w) = raw.dim();
    let radius = radius as isize;
    let mut sum = 0.0;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if (dy * dy + dx * dx) as f64 > (radius * radius) as f64 {
                continue;
            }
            let (r, c) = (row + dy, col + dx);
            if r >= 0 && c >= 0 && r < h as isize && c < w as isize {
                sum += raw[[r as usize, c as usize]];
            }
        }
    }
    sum
}

fn argmax(fft: &Array2<f64>) -> (usize, usize, f64) {
    let mut best = (0, 0, f64::NEG_INFINITY);
    for ((row, col), &value) in fft.indexed_iter() {
        if value > best.2 {
            best = (row, col, value);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Centered synthetic magnitude with six bumps on the first-order ring.
    fn hex_magnitude(size: usize, fov_nm: f64, angle0_deg: f64, amplitude: f64) -> Array2<f64> {
        let mut fft = Array2::from_elem((size, size), 1.0);
        let center = (size / 2) as f64;
        let radius = fov_nm / FIRST_ORDER_SPACING_NM;
        for i in 0..6 {
            let angle = (angle0_deg + i as f64 * 60.0).to_radians();
            let row = (center + radius * angle.sin()).round() as usize;
            let col = (center + radius * angle.cos()).round() as usize;
            fft[[row, col]] = amplitude;
        }
        fft
    }

    #[test]
    fn test_finds_all_six_first_order_peaks() {
        let fft = hex_magnitude(256, 4.0, 13.0, 500.0);
        let locator = PeakLocator::default();
        let peaks = locator.find_in_magnitude(&fft, 4.0, false).unwrap();
        assert_eq!(peaks.first.iter().filter(|p| p.is_found()).count(), 6);
        assert!(peaks.second.is_none());

        let radius = 4.0 / FIRST_ORDER_SPACING_NM;
        for peak in &peaks.first {
            let dy = peak.row as f64 - 128.0;
            let dx = peak.col as f64 - 128.0;
            assert_relative_eq!(dy.hypot(dx), radius, max_relative = 0.08);
        }
    }

    #[test]
    fn test_peaks_are_sixty_degrees_apart() {
        let fft = hex_magnitude(256, 4.0, 7.0, 500.0);
        let locator = PeakLocator::default();
        let peaks = locator.find_in_magnitude(&fft, 4.0, false).unwrap();
        let mut angles: Vec<f64> = peaks
            .first
            .iter()
            .map(|p| {
                let dy = p.row as f64 - 128.0;
                let dx = p.col as f64 - 128.0;
                dy.atan2(dx).to_degrees().rem_euclid(360.0)
            })
            .collect();
        angles.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for pair in angles.windows(2) {
            assert_relative_eq!(pair[1] - pair[0], 60.0, epsilon = 3.0);
        }
    }

    #[test]
    fn test_featureless_magnitude_exhausts_search() {
        let fft = Array2::from_elem((128, 128), 1.0);
        let locator = PeakLocator::default();
        match locator.find_in_magnitude(&fft, 4.0, false) {
            Err(TuneError::PeakSearchExhausted { attempts }) => {
                // budget is ceil(sqrt(height))
                assert_eq!(attempts, 12);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_off_ring_maximum_is_rejected() {
        // one bright outlier far outside the ring plus a valid hexagon
        let mut fft = hex_magnitude(256, 4.0, 0.0, 500.0);
        fft[[20, 20]] = 5000.0;
        let locator = PeakLocator::default();
        let peaks = locator.find_in_magnitude(&fft, 4.0, false).unwrap();
        for peak in peaks.first.iter().filter(|p| p.is_found()) {
            assert!(peak.row != 20 || peak.col != 20);
        }
    }

    #[test]
    fn test_integrate_disk_clips_at_edges() {
        let raw = Array2::from_elem((10, 10), 1.0);
        let inner = integrate_disk(&raw, 5, 5, 2);
        let corner = integrate_disk(&raw, 0, 0, 2);
        assert!(corner < inner);
        assert_relative_eq!(inner, 13.0, epsilon = 1e-12);
    }

    #[test]
    fn test_window_stats_rejects_clipped_windows() {
        let fft = Array2::from_elem((32, 32), 1.0);
        assert!(window_stats(&fft, (2, 16), 5).is_none());
        assert!(window_stats(&fft, (16, 16), 5).is_some());
    }
}
