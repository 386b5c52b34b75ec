//! Startup calibration: exposure, dark value, and the spot-grid geometry.

pub mod dark;
pub mod exposure;
pub mod grid;

pub use dark::calibrate_dark_value;
pub use exposure::{calibrate_exposure, ExposureResult};
pub use grid::calibrate_grid;
