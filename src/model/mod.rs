//! General linear model estimation and contrasts
//!
//! - `estimate`: voxel-wise least squares fit, design-driven loading and
//!   normalization
//! - `smoothness`: FWHM of the standardized residuals
//! - `contrast`: t and approximate z maps of a contrast

pub mod contrast;
pub mod estimate;
pub mod smoothness;

pub use contrast::{t_map, z_map};
pub use estimate::{estimate, estimate_design, estimate_with_progress, EstimationParams, GlmFit};
pub use smoothness::autocorrelation_estimate;
