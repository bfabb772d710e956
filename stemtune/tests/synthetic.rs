//! End-to-end behavior on rendered graphene frames.

mod common;

use stemtune::{
    Aberration, AberrationOptimizer, AberrationVector, DirtDetector, MeritEvaluator,
    MeritPipeline, OptimizerConfig, PeakLocator, SimulatedImageSource, SimulatorConfig,
    StepVector, TuningTarget,
};
use stemtune::simulate::DirtPatch;
use stemtune::peaks::FIRST_ORDER_SPACING_NM;

#[test]
fn test_locates_lattice_reflections_on_clean_frame() {
    let frame = common::simulated_frame(
        256,
        SimulatorConfig {
            intrinsic: AberrationVector::zero(),
            seed: 5,
            ..SimulatorConfig::default()
        },
    );

    let locator = PeakLocator::default();
    let peaks = locator.find_peaks(&frame, false).unwrap();
    let found = peaks.first.iter().filter(|p| p.is_found()).count();
    assert!(found >= 5, "only {found} first-order reflections found");

    // reflections sit on the ring at fov / lattice spacing
    let expected_radius = frame.fov_nm / FIRST_ORDER_SPACING_NM;
    let center = (frame.shape().0 / 2) as f64;
    for peak in peaks.first.iter().filter(|p| p.is_found()) {
        let radius = (peak.row as f64 - center).hypot(peak.col as f64 - center);
        assert!(
            (radius - expected_radius).abs() / expected_radius < 0.12,
            "reflection at radius {radius}, expected near {expected_radius}"
        );
    }
}

#[test]
fn test_merit_prefers_the_sharper_frame() {
    let sharp = common::simulated_frame(
        128,
        SimulatorConfig {
            intrinsic: AberrationVector::zero(),
            seed: 9,
            ..SimulatorConfig::default()
        },
    );
    let blurred = common::simulated_frame(
        128,
        SimulatorConfig {
            intrinsic: AberrationVector::zero()
                .with(Aberration::EhtFocus, 12.0)
                .with(Aberration::C12a, 8.0),
            seed: 9,
            ..SimulatorConfig::default()
        },
    );

    let evaluator = MeritEvaluator::default();
    let mask = common::clean_mask(128);
    let sharp_score = evaluator.evaluate_or_worst(&sharp, &mask).unwrap();
    let blurred_score = evaluator.evaluate_or_worst(&blurred, &mask).unwrap();
    assert!(
        sharp_score < blurred_score,
        "sharp {sharp_score} should beat blurred {blurred_score}"
    );
}

#[test]
fn test_merit_degrades_along_a_defocus_ladder() {
    let evaluator = MeritEvaluator::default();
    let mask = common::clean_mask(128);
    let mut scores = Vec::new();
    for defocus in [0.0, 10.0, 20.0] {
        let frame = common::simulated_frame(
            128,
            SimulatorConfig {
                intrinsic: AberrationVector::zero().with(Aberration::EhtFocus, defocus),
                seed: 21,
                ..SimulatorConfig::default()
            },
        );
        scores.push(evaluator.evaluate_or_worst(&frame, &mask).unwrap());
    }
    for pair in scores.windows(2) {
        assert!(pair[0] <= pair[1], "merit ordering broken: {scores:?}");
    }
    assert!(scores[0] < scores[2], "no spread across the ladder: {scores:?}");
}

#[test]
fn test_dirt_detector_flags_simulated_contamination() {
    let frame = common::simulated_frame(
        128,
        SimulatorConfig {
            intrinsic: AberrationVector::zero(),
            // calibration sweeps thresholds up to twice the frame mean, so
            // the patch must stay moderately brighter than the lattice
            dirt: Some(DirtPatch {
                center: (0.3, 0.3),
                sigma: 0.12,
                intensity: 12.0,
            }),
            seed: 2,
            ..SimulatorConfig::default()
        },
    );

    let detector = DirtDetector::default();
    let mask = detector.detect(&frame).unwrap();
    let fraction = stemtune::dirt::dirt_fraction(&mask);
    assert!(
        fraction > 0.02 && fraction < 0.5,
        "unexpected dirt coverage {fraction}"
    );
    // the patch center is flagged, the far corner is not
    assert_eq!(mask[[38, 38]], 1);
    assert_eq!(mask[[110, 110]], 0);
}

#[test]
fn test_tuning_session_improves_mild_aberrations() {
    let config = SimulatorConfig {
        intrinsic: AberrationVector::zero()
            .with(Aberration::EhtFocus, 4.0)
            .with(Aberration::C12a, 3.0)
            .with(Aberration::C12b, -2.0),
        seed: 17,
        ..SimulatorConfig::default()
    };
    let source = SimulatedImageSource::new(config);
    let mut pipeline = MeritPipeline::new(
        source,
        common::spec(128),
        DirtDetector::default(),
        MeritEvaluator::new(PeakLocator::default(), Default::default()),
    )
    .with_dirt_threshold(f64::INFINITY);

    // merit of the untuned instrument, for the improvement check below
    let start_score = pipeline.evaluate(&AberrationVector::zero()).unwrap();

    let config = OptimizerConfig::default();
    let max_passes = config.max_passes;
    let optimizer = AberrationOptimizer::new(config);
    let keys = [Aberration::EhtFocus, Aberration::C12a, Aberration::C12b];
    let outcome = optimizer
        .run(
            &mut pipeline,
            AberrationVector::zero(),
            &keys,
            StepVector::default_search(),
        )
        .unwrap();

    assert!(outcome.best_score.is_finite());
    assert!(
        outcome.best_score < 1e5,
        "tuner never scored a usable frame"
    );
    assert!(
        outcome.best_score < start_score,
        "merit did not improve: start {start_score}, final {}",
        outcome.best_score
    );
    // the run ends on the relative-improvement criterion, not the pass cap
    assert!(
        outcome.passes < max_passes,
        "run only stopped at the pass cap"
    );

    // the residual misalignment did not get worse along any tuned axis
    let residual = pipeline.into_source().residual();
    let initial_residual = 4.0f64.hypot(3.0).hypot(2.0);
    let final_residual = residual
        .get(Aberration::EhtFocus)
        .hypot(residual.get(Aberration::C12a))
        .hypot(residual.get(Aberration::C12b));
    // allow one probe step of slack for shot noise between frames
    assert!(
        final_residual <= initial_residual + 2.0,
        "residual grew from {initial_residual} to {final_residual}"
    );
}
