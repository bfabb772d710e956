//! Simulated autotuning harness
//!
//! Runs the tuning stack against the synthetic graphene source, without any
//! microscope attached.
//!
//! # Usage
//!
//! ```bash
//! # Full simulated tuning session
//! cargo run --release --bin stemtune-harness -- tune
//!
//! # Session on smaller frames with a different noise seed
//! cargo run --release --bin stemtune-harness -- tune -i 128 --seed 7
//!
//! # Reflection search on one rendered frame
//! cargo run --release --bin stemtune-harness -- peaks -i 256
//!
//! # Dirt threshold calibration on a contaminated frame
//! cargo run --release --bin stemtune-harness -- dirt
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use stemtune::simulate::DirtPatch;
use stemtune::{
    Aberration, AberrationOptimizer, AberrationVector, DirtDetector, FrameSpec, ImageSource,
    MeritEvaluator, MeritPipeline, OptimizerConfig, PeakLocator, SimulatedImageSource,
    SimulatorConfig, StepVector,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full tuning session against the simulator
    Tune {
        /// Frame edge length in pixels
        #[arg(short, long, default_value = "256")]
        image_size: usize,

        /// Field of view in nm
        #[arg(short, long, default_value = "4.0")]
        fov: f64,

        /// Mean counts per atom
        #[arg(short, long, default_value = "300.0")]
        dose: f64,

        /// Shot noise seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Maximum number of tuning passes
        #[arg(long, default_value = "11")]
        max_passes: usize,
    },

    /// Locate lattice reflections on one rendered frame
    Peaks {
        /// Frame edge length in pixels
        #[arg(short, long, default_value = "256")]
        image_size: usize,

        /// Field of view in nm
        #[arg(short, long, default_value = "4.0")]
        fov: f64,

        /// Also search the second-order ring
        #[arg(long)]
        second_order: bool,
    },

    /// Calibrate a dirt threshold on a contaminated frame
    Dirt {
        /// Frame edge length in pixels
        #[arg(short, long, default_value = "256")]
        image_size: usize,

        /// Peak contamination intensity in counts
        #[arg(long, default_value = "12.0")]
        intensity: f64,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Tune {
            image_size,
            fov,
            dose,
            seed,
            max_passes,
        } => run_tune(image_size, fov, dose, seed, max_passes),
        Commands::Peaks {
            image_size,
            fov,
            second_order,
        } => run_peaks(image_size, fov, second_order),
        Commands::Dirt {
            image_size,
            intensity,
        } => run_dirt(image_size, intensity),
    }
}

fn frame_spec(image_size: usize, fov: f64) -> FrameSpec {
    FrameSpec {
        size_pixels: (image_size, image_size),
        fov_nm: fov,
        pixel_time_us: 8.0,
    }
}

fn run_tune(image_size: usize, fov: f64, dose: f64, seed: u64, max_passes: usize) -> anyhow::Result<()> {
    let config = SimulatorConfig {
        dose,
        seed,
        ..SimulatorConfig::default()
    };
    let intrinsic = config.intrinsic.clone();
    println!("intrinsic misalignment: {intrinsic}");

    let source = SimulatedImageSource::new(config);
    let mut pipeline = MeritPipeline::new(
        source,
        frame_spec(image_size, fov),
        DirtDetector::default(),
        MeritEvaluator::default(),
    );

    let optimizer = AberrationOptimizer::new(OptimizerConfig {
        max_passes,
        ..OptimizerConfig::default()
    });
    let outcome = optimizer
        .run(
            &mut pipeline,
            AberrationVector::zero(),
            &Aberration::ALL,
            StepVector::default_search(),
        )
        .context("tuning session failed")?;

    println!("finished after {} passes", outcome.passes);
    println!("final merit: {:.6}", outcome.best_score);
    println!("applied correction: {}", outcome.vector);
    println!("residual: {}", pipeline.into_source().residual());
    Ok(())
}

fn run_peaks(image_size: usize, fov: f64, second_order: bool) -> anyhow::Result<()> {
    let mut source = SimulatedImageSource::new(SimulatorConfig {
        intrinsic: AberrationVector::zero(),
        ..SimulatorConfig::default()
    });
    let frame = source
        .acquire(&frame_spec(image_size, fov))
        .context("rendering frame")?;

    let peaks = PeakLocator::default()
        .find_peaks(&frame, second_order)
        .context("locating reflections")?;

    println!("found {} reflections", peaks.found_count());
    for (i, peak) in peaks.first.iter().enumerate() {
        if peak.is_found() {
            println!(
                "  first order {i}: ({}, {}) height {:.1} integrated {:.1}",
                peak.row, peak.col, peak.height, peak.integrated
            );
        }
    }
    if let Some(second) = &peaks.second {
        for (i, peak) in second.iter().enumerate() {
            if peak.is_found() {
                println!(
                    "  second order {i}: ({}, {}) height {:.1} integrated {:.1}",
                    peak.row, peak.col, peak.height, peak.integrated
                );
            }
        }
    }
    Ok(())
}

fn run_dirt(image_size: usize, intensity: f64) -> anyhow::Result<()> {
    let mut source = SimulatedImageSource::new(SimulatorConfig {
        intrinsic: AberrationVector::zero(),
        dirt: Some(DirtPatch {
            center: (0.3, 0.3),
            sigma: 0.12,
            intensity,
        }),
        ..SimulatorConfig::default()
    });
    let frame = source
        .acquire(&frame_spec(image_size, 4.0))
        .context("rendering frame")?;

    let detector = DirtDetector::default();
    let threshold = detector
        .find_threshold(&frame)
        .context("calibrating dirt threshold")?;
    let mask = detector.detect_at(&frame, threshold);
    let fraction = stemtune::dirt::dirt_fraction(&mask);

    println!("calibrated threshold: {threshold:.3}");
    println!("dirt coverage: {:.1}%", fraction * 100.0);
    Ok(())
}
