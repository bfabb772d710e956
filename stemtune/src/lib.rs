//! Closed-loop aberration autotuning for scanning transmission electron
//! microscopy on 2D crystals.
//!
//! The crate scores atomic-resolution graphene frames through their Fourier
//! transform and drives corrector parameters to the score's minimum:
//!
//! * [`dirt`] flags contaminated regions so they cannot skew the score,
//! * [`peaks`] locates the hexagonal reflection pattern in the spectrum,
//! * [`registration`] measures point symmetry by cross-correlation,
//! * [`merit`] folds intensities, symmetry and contrast into one scalar,
//! * [`optimizer`] runs the per-parameter descent with rollback.
//!
//! Frames come from an [`source::ImageSource`], either real hardware behind
//! the [`source::Corrector`] and [`source::Scanner`] traits or the synthetic
//! [`simulate::SimulatedImageSource`].

pub mod aberrations;
pub mod dirt;
pub mod error;
pub mod filters;
pub mod fit;
pub mod fourier;
pub mod frame;
pub mod merit;
pub mod optimizer;
pub mod peaks;
pub mod registration;
pub mod simulate;
pub mod source;

pub use aberrations::{Aberration, AberrationVector, StepVector, TuningHistory};
pub use dirt::{DirtDetector, DirtDetectorConfig};
pub use error::{TuneError, TuneResult};
pub use frame::Frame;
pub use merit::{MeritConfig, MeritEvaluator};
pub use optimizer::{
    AberrationOptimizer, MeritPipeline, OptimizerConfig, TuningOutcome, TuningTarget,
};
pub use peaks::{Peak, PeakLocator, PeakLocatorConfig, PeakSet};
pub use registration::{correlate, shift, Correlation};
pub use simulate::{SimulatedImageSource, SimulatorConfig};
pub use source::{Corrector, FrameSpec, HardwareImageSource, ImageSource, Scanner};
