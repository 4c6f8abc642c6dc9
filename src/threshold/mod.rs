//! Thresholding of statistic maps
//!
//! - `labeling`: connected components with 6/18/26 connectivity
//! - `report`: height/extent thresholding, cluster table, threshold modes

pub mod labeling;
pub mod report;

pub use labeling::{label_components, Connectivity};
pub use report::{
    statistic_threshold, threshold, Cluster, LabelAtlas, SearchRegion, ThresholdMode, ThresholdParams,
    ThresholdResult,
};
