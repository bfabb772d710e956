use thiserror::Error;

/// Errors produced by the tuning core.
///
/// The first four variants are the expected, frequent outcomes on real
/// microscope data; callers are expected to match on them rather than treat
/// every failure the same way. Only [`TuneError::DirtExceeded`] is fatal to a
/// running optimization.
#[derive(Error, Debug)]
pub enum TuneError {
    /// Threshold calibration could not bracket the contamination level.
    /// The caller may retry with a manually chosen threshold.
    #[error("threshold sweep could not bracket contamination")]
    InsufficientData,

    /// No correlation peak statistically distinguishable from background.
    #[error("no credible correlation peak (max {peak:.4} <= floor {floor:.4})")]
    NoCorrelation {
        /// Maximum of the correlation surface.
        peak: f64,
        /// Significance floor (mean + 3 sigma) the maximum failed to clear.
        floor: f64,
    },

    /// The bounded Fourier peak search exhausted its retry budget.
    #[error("peak search exhausted after {attempts} attempts")]
    PeakSearchExhausted {
        /// Number of rejected candidates before giving up.
        attempts: usize,
    },

    /// Too much of the frame is contaminated to tune on. Fatal to an
    /// in-progress optimization; the optimizer rolls back before propagating.
    #[error("dirt coverage {:.0}% of frame exceeds limit {:.0}%", .fraction * 100.0, .limit * 100.0)]
    DirtExceeded {
        /// Fraction of pixels classified as dirt.
        fraction: f64,
        /// Configured abort limit.
        limit: f64,
    },

    /// The image source collaborator failed to deliver a frame.
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// A merit computation produced NaN or infinity.
    #[error("merit score is not finite")]
    NonFiniteMerit,

    /// Correlator inputs must have identical dimensions.
    #[error("input images have mismatched shapes")]
    ShapeMismatch,

    /// A nonlinear least-squares fit failed to converge.
    #[error("curve fit failed to converge")]
    FitDiverged,
}

/// Result alias used throughout the crate.
pub type TuneResult<T> = Result<T, TuneError>;
