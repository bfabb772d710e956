//! Corrector parameter vectors and the bookkeeping the optimizer needs.
//!
//! An [`AberrationVector`] is an explicit value object: there is no
//! process-wide corrector state anywhere in this crate. Exactly one running
//! optimizer session owns a vector, the matching [`StepVector`] and the
//! [`TuningHistory`] used for rollback.

use std::fmt;

/// The corrector parameters the tuner drives, up to threefold astigmatism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aberration {
    /// Defocus (EHT focus), nm.
    EhtFocus,
    /// Twofold astigmatism, a component, nm.
    C12a,
    /// Twofold astigmatism, b component, nm.
    C12b,
    /// Axial coma, a component, nm.
    C21a,
    /// Axial coma, b component, nm.
    C21b,
    /// Threefold astigmatism, a component, nm.
    C23a,
    /// Threefold astigmatism, b component, nm.
    C23b,
}

impl Aberration {
    /// All parameters in canonical tuning order.
    pub const ALL: [Aberration; 7] = [
        Aberration::EhtFocus,
        Aberration::C12a,
        Aberration::C12b,
        Aberration::C21a,
        Aberration::C21b,
        Aberration::C23a,
        Aberration::C23b,
    ];

    /// Corrector control name as exposed by the microscope software.
    pub fn control_name(&self) -> &'static str {
        match self {
            Aberration::EhtFocus => "EHTFocus",
            Aberration::C12a => "C12.a",
            Aberration::C12b => "C12.b",
            Aberration::C21a => "C21.a",
            Aberration::C21b => "C21.b",
            Aberration::C23a => "C23.a",
            Aberration::C23b => "C23.b",
        }
    }

    fn index(&self) -> usize {
        match self {
            Aberration::EhtFocus => 0,
            Aberration::C12a => 1,
            Aberration::C12b => 2,
            Aberration::C21a => 3,
            Aberration::C21b => 4,
            Aberration::C23a => 5,
            Aberration::C23b => 6,
        }
    }
}

impl fmt::Display for Aberration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.control_name())
    }
}

/// Full corrector setting, one value per [`Aberration`], in nanometres.
///
/// This is the single source of truth for "what correction is currently
/// applied"; trial states are expressed by building a modified copy and
/// handing it to the image source, never by mutating shared state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AberrationVector {
    values: [f64; 7],
}

impl AberrationVector {
    /// The all-zero correction.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Value for one parameter.
    pub fn get(&self, key: Aberration) -> f64 {
        self.values[key.index()]
    }

    /// Set one parameter in place.
    pub fn set(&mut self, key: Aberration, value_nm: f64) {
        self.values[key.index()] = value_nm;
    }

    /// Builder-style setter, handy for constructing test vectors.
    pub fn with(mut self, key: Aberration, value_nm: f64) -> Self {
        self.set(key, value_nm);
        self
    }

    /// Copy of this vector with `delta_nm` added to one parameter.
    pub fn with_delta(&self, key: Aberration, delta_nm: f64) -> Self {
        let mut out = self.clone();
        out.values[key.index()] += delta_nm;
        out
    }

    /// Component-wise sum, used by the simulator to combine the intrinsic
    /// misalignment with the applied correction.
    pub fn sum(&self, other: &AberrationVector) -> Self {
        let mut out = self.clone();
        for (v, o) in out.values.iter_mut().zip(other.values.iter()) {
            *v += o;
        }
        out
    }

    /// Iterate `(parameter, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Aberration, f64)> + '_ {
        Aberration::ALL.iter().map(move |&k| (k, self.get(k)))
    }

    /// Largest absolute component difference to another vector.
    pub fn max_abs_difference(&self, other: &AberrationVector) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for AberrationVector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value:.2}")?;
            first = false;
        }
        Ok(())
    }
}

/// Per-parameter search step sizes in nanometres, strictly positive.
///
/// Owned and mutated only by the optimizer: doubled while probing for an
/// improving direction, halved after each parameter is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct StepVector {
    values: [f64; 7],
}

impl StepVector {
    /// Build a step vector, rejecting non-positive or non-finite entries.
    pub fn new(values: [f64; 7]) -> Option<Self> {
        if values.iter().all(|v| v.is_finite() && *v > 0.0) {
            Some(Self { values })
        } else {
            None
        }
    }

    /// Uniform step for every parameter.
    pub fn uniform(step_nm: f64) -> Option<Self> {
        Self::new([step_nm; 7])
    }

    /// Default search steps: focus/twofold 2 nm, coma 300 nm, threefold 75 nm.
    pub fn default_search() -> Self {
        Self {
            values: [2.0, 2.0, 2.0, 300.0, 300.0, 75.0, 75.0],
        }
    }

    /// Current step for one parameter.
    pub fn get(&self, key: Aberration) -> f64 {
        self.values[key.index()]
    }

    /// Multiply one parameter's step by `factor` (must stay positive).
    pub fn scale(&mut self, key: Aberration, factor: f64) {
        let next = self.values[key.index()] * factor;
        debug_assert!(next.is_finite() && next > 0.0, "step must stay positive");
        self.values[key.index()] = next;
    }
}

/// Append-only record of corrector snapshots, one per completed parameter.
///
/// Used strictly for rolling back to the last known-good setting; the
/// optimizer never reads it forward.
#[derive(Debug, Clone, Default)]
pub struct TuningHistory {
    entries: Vec<AberrationVector>,
}

impl TuningHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot.
    pub fn push(&mut self, vector: AberrationVector) {
        self.entries.push(vector);
    }

    /// Most recent snapshot, if any parameter has completed.
    pub fn last(&self) -> Option<&AberrationVector> {
        self.entries.last()
    }

    /// Number of snapshots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no parameter has completed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
