//! Design matrix construction
//!
//! - `spec`: group/subject/condition hierarchy and observation cells
//! - `column`: typed column descriptors and estimability codes
//! - `builder`: the `Empty → ModelDefined → MatrixBuilt → Estimated` builder
//! - `matrix`: the materialized matrix and contrast validation
//! - `hrf`: block paradigms, HRF convolution and cosine drift basis
//! - `normalization`: global signal normalization and covariate scopes
//! - `persist`: JSON snapshots

pub mod builder;
pub mod column;
pub mod hrf;
pub mod matrix;
pub mod normalization;
pub mod persist;
pub mod spec;

pub use builder::{CovariateOptions, DesignBuilder, DesignState};
pub use column::{ColumnInfo, ColumnKind, Estimability};
pub use hrf::{BlockParadigm, HrfParams};
pub use matrix::DesignMatrix;
pub use normalization::{CovariateScope, GlobalSignal, Normalization};
pub use persist::DesignSnapshot;
pub use spec::{CellKey, DesignSpec, ModelShape, KEY_DELIMITER};
