//! Synthetic graphene image source.
//!
//! Renders a delta-function graphene lattice, convolves it with the probe
//! profile derived from the current aberration state and adds Poisson shot
//! noise. The probe phase error follows the aberration function in Kirkland,
//! "Advanced Computing in Electron Microscopy", 2nd ed., p. 18, truncated
//! after threefold astigmatism.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use rustfft::num_complex::Complex;

use crate::aberrations::{Aberration, AberrationVector};
use crate::error::{TuneError, TuneResult};
use crate::fourier::{convolve_same, fft_frequencies, fftshift, ifft2};
use crate::frame::Frame;
use crate::source::{FrameSpec, ImageSource};

/// Electron wavelength at 60 keV in nm.
const LAMBDA_NM: f64 = 4.87e-3;
/// Graphene lattice constant in nm.
const LATTICE_CONSTANT_NM: f64 = 0.142;
/// Probe-forming aperture semi-angle in rad.
const APERTURE_RAD: f64 = 0.025;

/// A contamination blob blended into the rendered frame.
#[derive(Debug, Clone)]
pub struct DirtPatch {
    /// Center in fractional frame coordinates, `0.0 ..= 1.0`.
    pub center: (f64, f64),
    /// Blob sigma as a fraction of the frame edge.
    pub sigma: f64,
    /// Peak intensity in counts.
    pub intensity: f64,
}

/// Tunables for [`SimulatedImageSource`].
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Residual misalignment of the virtual instrument; the tuner is done
    /// when the applied correction cancels this.
    pub intrinsic: AberrationVector,
    /// Mean counts per atom before convolution.
    pub dose: f64,
    /// Lattice rotation against the scan axes in degrees.
    pub lattice_rotation_deg: f64,
    /// Optional contamination rendered into every frame.
    pub dirt: Option<DirtPatch>,
    /// Shot noise seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            intrinsic: AberrationVector::zero()
                .with(Aberration::EhtFocus, 2.0)
                .with(Aberration::C12a, 3.0)
                .with(Aberration::C12b, -1.0)
                .with(Aberration::C21a, 894.0)
                .with(Aberration::C21b, 211.0)
                .with(Aberration::C23a, -174.0)
                .with(Aberration::C23b, 142.0),
            dose: 300.0,
            lattice_rotation_deg: 10.0,
            dirt: None,
            seed: 0,
        }
    }
}

/// [`ImageSource`] producing rendered graphene frames.
pub struct SimulatedImageSource {
    config: SimulatorConfig,
    applied: AberrationVector,
    rng: StdRng,
    lattice_cache: Option<((usize, usize), u64, Array2<f64>)>,
}

impl SimulatedImageSource {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            applied: AberrationVector::zero(),
            rng,
            lattice_cache: None,
        }
    }

    /// Aberrations the tuner still has to cancel.
    pub fn residual(&self) -> AberrationVector {
        self.config.intrinsic.sum(&self.applied)
    }

    fn lattice(&mut self, spec: &FrameSpec) -> Array2<f64> {
        let key = (spec.size_pixels, spec.fov_nm.to_bits());
        if let Some((shape, fov_bits, cached)) = &self.lattice_cache {
            if *shape == key.0 && *fov_bits == key.1 {
                return cached.clone();
            }
        }
        let lattice = graphene_lattice(
            spec.size_pixels.0,
            spec.fov_nm,
            self.config.lattice_rotation_deg,
        );
        self.lattice_cache = Some((key.0, key.1, lattice.clone()));
        lattice
    }
}

impl ImageSource for SimulatedImageSource {
    fn apply(&mut self, vector: &AberrationVector) -> TuneResult<()> {
        self.applied = vector.clone();
        Ok(())
    }

    fn read(&self) -> TuneResult<AberrationVector> {
        Ok(self.applied.clone())
    }

    fn acquire(&mut self, spec: &FrameSpec) -> TuneResult<Frame> {
        let (h, w) = spec.size_pixels;
        if h != w || h < 8 {
            return Err(TuneError::Acquisition(format!(
                "simulator requires square frames of at least 8 pixels, got {h}x{w}"
            )));
        }

        let lattice = self.lattice(spec).mapv(|v| v * self.config.dose);
        let effective = self.residual();
        let psf = probe_profile(&effective, h, spec.fov_nm);
        let mut image = convolve_same(&lattice, &psf);

        if let Some(patch) = &self.config.dirt {
            let (cy, cx) = (patch.center.0 * h as f64, patch.center.1 * w as f64);
            let sigma = patch.sigma * h as f64;
            for ((row, col), value) in image.indexed_iter_mut() {
                let dy = row as f64 - cy;
                let dx = col as f64 - cx;
                *value += patch.intensity
                    * (-(dy * dy + dx * dx) / (2.0 * sigma * sigma)).exp();
            }
        }

        for value in image.iter_mut() {
            if *value > 0.0 {
                let poisson = Poisson::new(*value)
                    .map_err(|e| TuneError::Acquisition(format!("invalid shot noise rate: {e}")))?;
                *value = poisson.sample(&mut self.rng);
            } else {
                *value = 0.0;
            }
        }

        Ok(Frame::new(image, spec.fov_nm))
    }
}

/// Delta-function graphene lattice, one unit weight per atom distributed
/// bilinearly over four pixels.
///
/// The lattice is rendered on a canvas 20% larger than requested and cropped,
/// so atoms at the edges are not lost to the basis offset.
pub fn graphene_lattice(size_pixels: usize, fov_nm: f64, rotation_deg: f64) -> Array2<f64> {
    let canvas_size = (size_pixels as f64 * 1.2) as usize;
    let mut canvas = Array2::zeros((canvas_size, canvas_size));

    let basis_px = LATTICE_CONSTANT_NM * 3.0_f64.sqrt() * size_pixels as f64 / fov_nm;
    let rotation = rotation_deg.to_radians();
    let a1 = (rotation.cos() * basis_px, rotation.sin() * basis_px);
    let a2 = (
        (rotation + 2.0 * std::f64::consts::FRAC_PI_3).cos() * basis_px,
        (rotation + 2.0 * std::f64::consts::FRAC_PI_3).sin() * basis_px,
    );

    let reach = (2.4 * canvas_size as f64 / basis_px) as isize + 2;
    for n1 in -reach..=reach {
        for n2 in -reach..=reach {
            let cell = (
                n1 as f64 * a1.0 + n2 as f64 * a2.0,
                n1 as f64 * a1.1 + n2 as f64 * a2.1,
            );
            let atom_a = (
                cell.0 + a1.0 / 3.0 + a2.0 * 2.0 / 3.0,
                cell.1 + a1.1 / 3.0 + a2.1 * 2.0 / 3.0,
            );
            let atom_b = (
                cell.0 + a2.0 / 3.0 + a1.0 * 2.0 / 3.0,
                cell.1 + a2.1 / 3.0 + a1.1 * 2.0 / 3.0,
            );
            deposit_atom(&mut canvas, atom_a);
            deposit_atom(&mut canvas, atom_b);
        }
    }

    let start = (size_pixels as f64 * 0.1) as usize;
    canvas
        .slice(ndarray::s![start..start + size_pixels, start..start + size_pixels])
        .to_owned()
}

fn deposit_atom(canvas: &mut Array2<f64>, position: (f64, f64)) {
    let (h, w) = canvas.dim();
    let (y, x) = position;
    let (fy, fx) = (y.floor(), x.floor());
    let (ry, rx) = (y - fy, x - fx);
    let weights = [
        (0, 0, (1.0 - ry) * (1.0 - rx)),
        (0, 1, (1.0 - ry) * rx),
        (1, 1, ry * rx),
        (1, 0, ry * (1.0 - rx)),
    ];
    for (dy, dx, weight) in weights {
        let (row, col) = (fy as isize + dy, fx as isize + dx);
        if row >= 0 && col >= 0 && (row as usize) < h && (col as usize) < w {
            canvas[[row as usize, col as usize]] += weight;
        }
    }
}

/// Probe intensity profile for an aberration state, normalized to unit sum.
///
/// The profile is rendered at half the frame resolution, which keeps the
/// convolution kernel compact while covering the full aperture.
pub fn probe_profile(
    aberrations: &AberrationVector,
    size_pixels: usize,
    fov_nm: f64,
) -> Array2<f64> {
    let kernel_pixels = size_pixels / 2;
    let spacing = fov_nm / size_pixels as f64;
    let freqs = fftshift_vec(&fft_frequencies(kernel_pixels, spacing));

    let defocus = aberrations.get(Aberration::EhtFocus);
    let (c12_a, c12_b) = (
        aberrations.get(Aberration::C12a),
        aberrations.get(Aberration::C12b),
    );
    let (c21_a, c21_b) = (
        aberrations.get(Aberration::C21a),
        aberrations.get(Aberration::C21b),
    );
    let (c23_a, c23_b) = (
        aberrations.get(Aberration::C23a),
        aberrations.get(Aberration::C23b),
    );
    let c12 = c12_a.hypot(c12_b);
    let c21 = c21_a.hypot(c21_b);
    let c23 = c23_a.hypot(c23_b);
    let phi12 = c12_b.atan2(c12_a);
    let phi21 = c21_b.atan2(c21_a);
    let phi23 = c23_b.atan2(c23_a);

    let aperture_radius = (APERTURE_RAD / 2.0) * fov_nm / LAMBDA_NM;
    let center = (kernel_pixels / 2) as f64;

    let mut pupil = Array2::from_elem((kernel_pixels, kernel_pixels), Complex::new(0.0, 0.0));
    for ((row, col), value) in pupil.indexed_iter_mut() {
        let radius_px = (row as f64 - center).hypot(col as f64 - center);
        if radius_px > aperture_radius {
            continue;
        }
        let (ky, kx) = (freqs[row], freqs[col]);
        let k2 = kx * kx + ky * ky;
        let k3 = k2.sqrt().powi(3);
        let phi = ky.atan2(kx);
        let chi = (-defocus * k2
            + c12 * k2 * (2.0 * (phi - phi12)).cos()
            + (2.0 / 3.0) * c21 * LAMBDA_NM * k3 * (phi - phi21).cos()
            + (2.0 / 3.0) * c23 * LAMBDA_NM * k3 * (3.0 * (phi - phi23)).cos())
            * std::f64::consts::PI
            * LAMBDA_NM;
        *value = Complex::new(chi.cos(), chi.sin());
    }

    let mut profile = fftshift(&ifft2(&fftshift(&pupil))).mapv(|v| v.norm_sqr());
    let total = profile.sum();
    if total > 0.0 {
        profile.mapv_inplace(|v| v / total);
    }
    profile
}

fn fftshift_vec(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut out = values.to_vec();
    out.rotate_right(n / 2);
    out
}
