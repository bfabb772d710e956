use ndarray::Array2;
use stemtune::{Frame, FrameSpec, ImageSource, SimulatedImageSource, SimulatorConfig};

/// Square frame spec at the given size, default field of view.
pub fn spec(size: usize) -> FrameSpec {
    FrameSpec {
        size_pixels: (size, size),
        fov_nm: 4.0,
        pixel_time_us: 8.0,
    }
}

/// Render one simulated frame with the given residual aberrations.
pub fn simulated_frame(size: usize, config: SimulatorConfig) -> Frame {
    let mut source = SimulatedImageSource::new(config);
    source
        .acquire(&spec(size))
        .expect("simulated acquisition should succeed")
}

/// All-clean dirt mask.
pub fn clean_mask(size: usize) -> Array2<u8> {
    Array2::zeros((size, size))
}
