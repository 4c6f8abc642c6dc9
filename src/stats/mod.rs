//! Statistical inference primitives
//!
//! - `conversion`: statistic ↔ p-value conversions and Bonferroni correction
//! - `rft`: Random Field Theory geometry (EC densities, resel counts, cluster
//!   and voxel-level p-values)
//! - `map`: statistic maps tagged with their distribution family

pub mod conversion;
pub mod map;
pub mod rft;

pub use conversion::{
    bonferroni_corrected, bonferroni_uncorrected, p_to_t, p_to_z, t_to_p, t_to_z, z_to_p, z_to_t,
    StatField,
};
pub use map::StatMap;
pub use rft::{
    cluster_pvalue_to_extent, ec_densities, expected_clusters, expected_voxels, extent_to_cluster_pvalue,
    resel_count, resel_count_with_progress, statistic_to_voxel_corrected_pvalue,
    voxel_corrected_pvalue_to_statistic, NewtonParams, ReselCounts,
};
