//! Coordinate-descent tuning loop.
//!
//! Each pass works through the parameters one at a time: probe both
//! directions with a growing step until one of them beats the current score,
//! then walk that direction until the score stops falling. Steps are halved
//! between passes, changes that do not beat the best score seen so far are
//! rolled back, and a pass that improves nothing ends the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::aberrations::{Aberration, AberrationVector, StepVector, TuningHistory};
use crate::dirt::DirtDetector;
use crate::error::{TuneError, TuneResult};
use crate::merit::MeritEvaluator;
use crate::source::{FrameSpec, ImageSource};

/// Something the optimizer can drive and score.
///
/// `evaluate` applies the vector and returns the merit of a fresh frame;
/// lower is better. Implementations signal recoverable trouble through the
/// error taxonomy so the optimizer can decide what is fatal.
pub trait TuningTarget {
    fn apply(&mut self, vector: &AberrationVector) -> TuneResult<()>;
    fn evaluate(&mut self, vector: &AberrationVector) -> TuneResult<f64>;
}

/// The standard target: an image source scored through dirt detection and
/// the merit evaluator.
pub struct MeritPipeline<S> {
    source: S,
    spec: FrameSpec,
    dirt: DirtDetector,
    merit: MeritEvaluator,
    /// Fixed dirt threshold; `None` recalibrates per frame.
    dirt_threshold: Option<f64>,
}

impl<S: ImageSource> MeritPipeline<S> {
    pub fn new(source: S, spec: FrameSpec, dirt: DirtDetector, merit: MeritEvaluator) -> Self {
        Self {
            source,
            spec,
            dirt,
            merit,
            dirt_threshold: None,
        }
    }

    /// Use a fixed dirt threshold instead of per-frame calibration.
    pub fn with_dirt_threshold(mut self, threshold: f64) -> Self {
        self.dirt_threshold = Some(threshold);
        self
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

impl<S: ImageSource> TuningTarget for MeritPipeline<S> {
    fn apply(&mut self, vector: &AberrationVector) -> TuneResult<()> {
        self.source.apply(vector)
    }

    fn evaluate(&mut self, vector: &AberrationVector) -> TuneResult<f64> {
        self.source.apply(vector)?;
        let frame = self.source.acquire(&self.spec)?;
        let mask = match self.dirt_threshold {
            Some(threshold) => self.dirt.detect_at(&frame, threshold),
            None => self.dirt.detect(&frame)?,
        };
        self.merit.evaluate(&frame, &mask)
    }
}

/// Tunables for [`AberrationOptimizer`].
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Upper bound on full passes over the parameter list.
    pub max_passes: usize,
    /// Relative improvement between passes below which the run converges.
    pub min_improvement: f64,
    /// Probe step growth stops once the multiplier reaches this.
    pub max_step_multiplier: usize,
    /// Score substituted for failed probe evaluations.
    pub worst_score: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_passes: 11,
            min_improvement: 0.02,
            max_step_multiplier: 8,
            worst_score: 1e5,
        }
    }
}

/// Result of a tuning run.
#[derive(Debug, Clone)]
pub struct TuningOutcome {
    /// Final corrector setting, applied to the target.
    pub vector: AberrationVector,
    /// Merit at the final setting.
    pub best_score: f64,
    /// Completed passes.
    pub passes: usize,
    /// Snapshot after each completed parameter, for post-mortems.
    pub history: TuningHistory,
}

enum Trial {
    Score(f64),
    Failed,
}

/// Drives a [`TuningTarget`] to its merit minimum.
#[derive(Debug, Clone, Default)]
pub struct AberrationOptimizer {
    config: OptimizerConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl AberrationOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Install a flag that stops the run at the next safe point.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Run the descent over `keys`, starting from `initial`.
    ///
    /// On [`TuneError::DirtExceeded`] the target is restored to the last
    /// completed snapshot (or `initial`) before the error propagates; every
    /// other evaluation failure is treated as a bad trial and survived.
    /// Cancellation is polled after each trial and exits at the current
    /// accepted setting.
    pub fn run<T: TuningTarget>(
        &self,
        target: &mut T,
        initial: AberrationVector,
        keys: &[Aberration],
        steps: StepVector,
    ) -> TuneResult<TuningOutcome> {
        let mut steps = steps;
        let mut history = TuningHistory::new();
        let mut current_vec = initial.clone();
        let mut total: Vec<f64> = Vec::new();

        let mut current = match self.evaluate_guarded(target, &current_vec, &history, &initial)? {
            Trial::Score(score) => score,
            Trial::Failed => self.config.worst_score,
        };
        total.push(current);
        log::info!("starting merit {current:.6}");

        let mut passes = 0usize;
        while passes < self.config.max_passes {
            if self.cancelled() {
                log::info!("tuning cancelled");
                break;
            }
            if passes > 0 && total.len() < passes + 1 {
                log::info!("no further improvement, stopping");
                break;
            }
            if total.len() > 1 {
                let previous = total[total.len() - 2];
                let latest = total[total.len() - 1];
                let relative = ((previous - latest) / ((previous + latest) * 0.5)).abs();
                log::info!("improved merit by {:.1}%", relative * 100.0);
                if total.len() > 2 && relative < self.config.min_improvement {
                    log::info!("converged after {passes} passes");
                    break;
                }
            }
            log::info!("starting pass {}", passes + 1);

            let mut part: Vec<f64> = Vec::new();
            'keys: for &key in keys {
                if self.cancelled() {
                    break;
                }
                log::info!("tuning {key}");

                let mut multiplier = 1.0f64;
                let mut direction = None;
                while (multiplier as usize) < self.config.max_step_multiplier {
                    let plus_vec = current_vec.with_delta(key, steps.get(key) * multiplier);
                    let plus = self.probe(target, &plus_vec, &history, &initial)?;
                    if self.cancelled() {
                        target.apply(&current_vec)?;
                        if history.last() != Some(&current_vec) {
                            history.push(current_vec.clone());
                        }
                        break 'keys;
                    }
                    let minus_vec = current_vec.with_delta(key, -steps.get(key) * multiplier);
                    let minus = self.probe(target, &minus_vec, &history, &initial)?;
                    if self.cancelled() {
                        target.apply(&current_vec)?;
                        if history.last() != Some(&current_vec) {
                            history.push(current_vec.clone());
                        }
                        break 'keys;
                    }

                    if minus < plus && minus < current {
                        direction = Some(-1.0);
                        current = minus;
                        steps.scale(key, multiplier);
                        // the minus trial is the last one applied
                        current_vec = minus_vec;
                        break;
                    } else if plus < minus && plus < current {
                        direction = Some(1.0);
                        current = plus;
                        steps.scale(key, multiplier);
                        current_vec = plus_vec;
                        target.apply(&current_vec)?;
                        break;
                    } else {
                        target.apply(&current_vec)?;
                        log::info!("doubling step size for {key}");
                        multiplier *= 2.0;
                    }
                }
                let Some(direction) = direction else {
                    log::info!("no improving direction for {key}");
                    steps.scale(key, 0.5);
                    continue;
                };

                loop {
                    if self.cancelled() {
                        // accepted trials are already applied
                        if history.last() != Some(&current_vec) {
                            history.push(current_vec.clone());
                        }
                        break 'keys;
                    }
                    let trial_vec = current_vec.with_delta(key, direction * steps.get(key));
                    match self.evaluate_guarded(target, &trial_vec, &history, &initial)? {
                        Trial::Failed => {
                            target.apply(&current_vec)?;
                            break;
                        }
                        Trial::Score(score) if score >= current => {
                            target.apply(&current_vec)?;
                            part.push(current);
                            break;
                        }
                        Trial::Score(score) => {
                            current = score;
                            current_vec = trial_vec;
                        }
                    }
                }

                // keep the change only if it beats the best score seen so far
                let best_total = total.iter().cloned().fold(f64::INFINITY, f64::min);
                if current > best_total {
                    current_vec = history.last().cloned().unwrap_or_else(|| initial.clone());
                    if let Trial::Score(score) =
                        self.evaluate_guarded(target, &current_vec, &history, &initial)?
                    {
                        current = score;
                    }
                    log::info!("dismissed changes at {key}");
                }

                steps.scale(key, 0.5);
                history.push(current_vec.clone());
            }

            if !part.is_empty() {
                let best = part.iter().cloned().fold(f64::INFINITY, f64::min);
                log::info!("best merit of pass {}: {best:.6}", passes + 1);
                total.push(best);
            }
            passes += 1;
        }

        Ok(TuningOutcome {
            vector: current_vec,
            best_score: current,
            passes,
            history,
        })
    }

    /// Probe evaluation: failures count as the worst possible score.
    fn probe<T: TuningTarget>(
        &self,
        target: &mut T,
        vector: &AberrationVector,
        history: &TuningHistory,
        initial: &AberrationVector,
    ) -> TuneResult<f64> {
        match self.evaluate_guarded(target, vector, history, initial)? {
            Trial::Score(score) => Ok(score),
            Trial::Failed => Ok(self.config.worst_score),
        }
    }

    /// Evaluate one trial. Contamination aborts roll the target back to the
    /// last snapshot before propagating; everything else, acquisition
    /// hiccups included, is a survivable bad trial.
    fn evaluate_guarded<T: TuningTarget>(
        &self,
        target: &mut T,
        vector: &AberrationVector,
        history: &TuningHistory,
        initial: &AberrationVector,
    ) -> TuneResult<Trial> {
        match target.evaluate(vector) {
            Ok(score) if score.is_finite() => Ok(Trial::Score(score)),
            Ok(_) => Ok(Trial::Failed),
            Err(TuneError::DirtExceeded { fraction, limit }) => {
                let restore = history.last().cloned().unwrap_or_else(|| initial.clone());
                target.apply(&restore)?;
                log::warn!("aborting tuning, dirt coverage {:.0}% of frame", fraction * 100.0);
                Err(TuneError::DirtExceeded { fraction, limit })
            }
            Err(err) => {
                log::debug!("trial evaluation failed: {err}");
                Ok(Trial::Failed)
            }
        }
    }
}
