//! SPM-core: statistical parametric mapping for neuroimaging
//!
//! This crate fits voxel-wise general linear models to image series and
//! makes inferences on the resulting statistic maps with Random Field Theory.
//!
//! # Modules
//! - `design`: group/subject/condition designs, covariates, fMRI regressors
//! - `model`: GLM estimation, residual smoothness, t/z contrast maps
//! - `stats`: statistic ↔ p conversions, RFT geometry, statistic maps
//! - `conjunction`: pooling several statistic maps
//! - `threshold`: height/extent thresholding and cluster reports
//! - `volume`: image-layer adapter (volumes, masks, loaders)

// Core modules
pub mod error;
pub mod linalg;
pub mod progress;
pub mod volume;

// Statistics
pub mod stats;

// Design and estimation
pub mod design;
pub mod model;

// Inference on statistic maps
pub mod conjunction;
pub mod threshold;

pub use error::{Result, SpmError};
pub use progress::CancelToken;
pub use volume::{MemoryLoader, Volume, VolumeLoader};
