//! The seam between the tuning core and the instrument.
//!
//! The optimizer only ever talks to an [`ImageSource`]. On a real microscope
//! that is a corrector plus a scan engine; in tests and offline runs it is
//! the simulator.

use crate::aberrations::{Aberration, AberrationVector};
use crate::error::TuneResult;
use crate::frame::Frame;

/// Acquisition parameters for one frame.
#[derive(Debug, Clone)]
pub struct FrameSpec {
    /// Frame dimensions `(height, width)` in pixels.
    pub size_pixels: (usize, usize),
    /// Physical edge length of the scanned area in nanometres.
    pub fov_nm: f64,
    /// Dwell time per pixel in microseconds.
    pub pixel_time_us: f64,
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self {
            size_pixels: (512, 512),
            fov_nm: 4.0,
            pixel_time_us: 8.0,
        }
    }
}

/// A source of frames whose optics can be commanded.
///
/// `apply` always receives the full corrector vector, never a delta, so a
/// dropped or repeated command cannot leave the instrument in a state the
/// optimizer does not know about.
pub trait ImageSource {
    /// Drive the corrector to the given setting.
    fn apply(&mut self, vector: &AberrationVector) -> TuneResult<()>;

    /// Read back the current corrector setting.
    fn read(&self) -> TuneResult<AberrationVector>;

    /// Acquire one frame with the current setting.
    fn acquire(&mut self, spec: &FrameSpec) -> TuneResult<Frame>;
}

/// Low-level corrector control, one channel per parameter.
pub trait Corrector {
    fn set_control(&mut self, key: Aberration, value_nm: f64) -> TuneResult<()>;
    fn read_control(&self, key: Aberration) -> TuneResult<f64>;
}

/// A scan engine that records frames.
pub trait Scanner {
    fn record(&mut self, spec: &FrameSpec) -> TuneResult<Frame>;
}

/// [`ImageSource`] backed by real corrector and scanner handles.
pub struct HardwareImageSource<C, S> {
    corrector: C,
    scanner: S,
}

impl<C: Corrector, S: Scanner> HardwareImageSource<C, S> {
    pub fn new(corrector: C, scanner: S) -> Self {
        Self { corrector, scanner }
    }
}

impl<C: Corrector, S: Scanner> ImageSource for HardwareImageSource<C, S> {
    fn apply(&mut self, vector: &AberrationVector) -> TuneResult<()> {
        for (key, value) in vector.iter() {
            self.corrector.set_control(key, value)?;
        }
        Ok(())
    }

    fn read(&self) -> TuneResult<AberrationVector> {
        let mut vector = AberrationVector::zero();
        for key in Aberration::ALL {
            vector.set(key, self.corrector.read_control(key)?);
        }
        Ok(vector)
    }

    fn acquire(&mut self, spec: &FrameSpec) -> TuneResult<Frame> {
        self.scanner.record(spec)
    }
}
