//! Small nonlinear fits used by the Fourier peak search.

use crate::error::{TuneError, TuneResult};

/// Symmetric decay profile `|1 / (a * x)| + offset`.
///
/// Models the horizontal and vertical streaks a scan raster leaves in the
/// Fourier magnitude, so they can be subtracted before peak picking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperbola {
    pub a: f64,
    pub offset: f64,
}

impl Hyperbola {
    /// Evaluate the profile at distance `x` from the streak center.
    pub fn eval(&self, x: f64) -> f64 {
        if x == 0.0 {
            f64::INFINITY
        } else {
            (1.0 / (self.a * x)).abs() + self.offset
        }
    }
}

/// Fit a [`Hyperbola`] to `(x, y)` samples by damped Gauss-Newton,
/// starting from `initial`.
///
/// Samples at `x == 0` are skipped. The profile is even in `a`, so the sign
/// is not identifiable; the fitted `a` is always reported positive. Returns
/// [`TuneError::FitDiverged`] when the parameters leave the finite range or
/// `a` collapses to zero.
pub fn fit_hyperbola(
    xs: &[f64],
    ys: &[f64],
    initial: Hyperbola,
) -> TuneResult<Hyperbola> {
    debug_assert_eq!(xs.len(), ys.len());
    let mut a = initial.a.abs();
    let mut offset = initial.offset;
    if !a.is_finite() || a == 0.0 {
        return Err(TuneError::FitDiverged);
    }

    let residual_sum = |a: f64, c: f64| -> f64 {
        xs.iter()
            .zip(ys)
            .filter(|(x, _)| **x != 0.0)
            .map(|(x, y)| {
                let r = (1.0 / (a * x)).abs() + c - y;
                r * r
            })
            .sum()
    };

    let mut lambda = 1e-3;
    let mut best = residual_sum(a, offset);
    for _ in 0..60 {
        // normal equations for the 2x2 Jacobian system
        let (mut jaa, mut jac, mut jcc) = (0.0, 0.0, 0.0);
        let (mut ga, mut gc) = (0.0, 0.0);
        for (x, y) in xs.iter().zip(ys) {
            if *x == 0.0 {
                continue;
            }
            let model = (1.0 / (a * x)).abs() + offset;
            let r = model - y;
            let da = -(1.0 / (a * x)).abs() / a;
            let dc = 1.0;
            jaa += da * da;
            jac += da * dc;
            jcc += dc * dc;
            ga += da * r;
            gc += dc * r;
        }

        let det = (jaa + lambda * jaa) * (jcc + lambda * jcc) - jac * jac;
        if det.abs() < 1e-300 {
            break;
        }
        let step_a = -((jcc + lambda * jcc) * ga - jac * gc) / det;
        let step_c = -((jaa + lambda * jaa) * gc - jac * ga) / det;

        // a step crossing zero lands on the mirrored, equal-residual branch
        let (trial_a, trial_c) = ((a + step_a).abs(), offset + step_c);
        if !trial_a.is_finite() || !trial_c.is_finite() || trial_a == 0.0 {
            return Err(TuneError::FitDiverged);
        }
        let trial_sum = residual_sum(trial_a, trial_c);
        if trial_sum < best {
            a = trial_a;
            offset = trial_c;
            if (best - trial_sum) < 1e-12 * best.max(1e-12) {
                best = trial_sum;
                break;
            }
            best = trial_sum;
            lambda = (lambda * 0.5).max(1e-12);
        } else {
            lambda *= 4.0;
            if lambda > 1e8 {
                break;
            }
        }
    }

    if a.is_finite() && offset.is_finite() && a != 0.0 {
        Ok(Hyperbola { a, offset })
    } else {
        Err(TuneError::FitDiverged)
    }
}

/// Isotropic 2D Gaussian bump `amplitude * exp(-r^2 / (2 sigma^2)) + offset`.
pub fn gaussian2d(dy: f64, dx: f64, amplitude: f64, sigma: f64, offset: f64) -> f64 {
    amplitude * (-(dy * dy + dx * dx) / (2.0 * sigma * sigma)).exp() + offset
}
