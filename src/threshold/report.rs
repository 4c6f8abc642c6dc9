//! Height and extent thresholding with a cluster table
//!
//! A statistic map is binarized at a height threshold, split into connected
//! clusters, and clusters smaller than the extent threshold are dropped.
//! Surviving clusters are reported with their peak, extent, optional atlas
//! overlap and, when the search region geometry is known, RFT p-values.

use std::collections::BTreeMap;
use std::str::FromStr;

use log::{debug, info};

use super::labeling::{label_components, Connectivity};
use crate::error::{invalid, Result, SpmError};
use crate::stats::conversion::{bonferroni_uncorrected, StatField};
use crate::stats::rft::{
    expected_clusters, expected_voxels, extent_to_cluster_pvalue, statistic_to_voxel_corrected_pvalue,
    voxel_corrected_pvalue_to_statistic, NewtonParams, ReselCounts,
};
use crate::stats::StatMap;

/// Multiple-comparison handling when turning a p-value into a height threshold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdMode {
    Uncorrected,
    Bonferroni,
    /// Family-wise error through Random Field Theory
    Fwe,
}

impl FromStr for ThresholdMode {
    type Err = SpmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uncorrected" | "none" => Ok(ThresholdMode::Uncorrected),
            "bonferroni" => Ok(ThresholdMode::Bonferroni),
            "fwe" | "rft" => Ok(ThresholdMode::Fwe),
            _ => Err(invalid(format!("unknown threshold mode '{}'", s))),
        }
    }
}

/// Statistic threshold for a p-value under `mode`
///
/// # Arguments
/// * `p` - Desired p-value in (0, 1)
/// * `mode` - Correction mode
/// * `field` - Statistic family
/// * `mask_voxels` - Number of voxels searched (Bonferroni)
/// * `resels` - Resel counts of the search region (FWE)
pub fn statistic_threshold(
    p: f64,
    mode: ThresholdMode,
    field: StatField,
    mask_voxels: usize,
    resels: Option<&ReselCounts>,
) -> Result<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(invalid(format!("p-value must lie in (0, 1), got {}", p)));
    }
    let u = match mode {
        ThresholdMode::Uncorrected => field.statistic(p),
        ThresholdMode::Bonferroni => {
            if mask_voxels == 0 {
                return Err(invalid("Bonferroni threshold over an empty search region"));
            }
            field.statistic(bonferroni_uncorrected(p, mask_voxels))
        }
        ThresholdMode::Fwe => {
            let resels = resels.ok_or_else(|| invalid("FWE threshold requires resel counts"))?;
            voxel_corrected_pvalue_to_statistic(p, field, resels, &NewtonParams::default())?
        }
    };
    debug!("{:?} threshold for p = {}: {:.4}", mode, p, u);
    Ok(u)
}

/// Height and extent thresholds
#[derive(Clone, Debug)]
pub struct ThresholdParams {
    /// Voxels with statistic `>=` this value are suprathreshold
    pub statistic: f64,
    /// Minimum cluster size in voxels
    pub extent: usize,
    pub connectivity: Connectivity,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            statistic: 3.09,
            extent: 0,
            connectivity: Connectivity::Faces,
        }
    }
}

/// Integer label image on the map's lattice; label 0 is background
#[derive(Clone, Debug)]
pub struct LabelAtlas {
    pub name: String,
    pub labels: Vec<u32>,
}

/// Resel counts and voxel count of the search region
#[derive(Clone, Copy, Debug)]
pub struct SearchRegion {
    pub resels: ReselCounts,
    pub n_voxels: usize,
}

/// One surviving cluster
#[derive(Clone, Debug)]
pub struct Cluster {
    /// Voxel index `(i, j, k)` of the peak
    pub peak: (usize, usize, usize),
    /// World coordinate of the peak in mm
    pub peak_world: (f64, f64, f64),
    pub peak_value: f64,
    /// Number of voxels
    pub extent: usize,
    /// Per atlas, fraction of the cluster's voxels carrying each foreground label
    pub label_overlap: Vec<BTreeMap<u32, f64>>,
    /// Voxel-level corrected p-value of the peak
    pub peak_p_corrected: Option<f64>,
    pub cluster_p_uncorrected: Option<f64>,
    pub cluster_p_corrected: Option<f64>,
}

/// Thresholded map restricted to surviving clusters, plus the cluster table
#[derive(Clone, Debug)]
pub struct ThresholdResult {
    pub map: StatMap,
    /// Clusters sorted by descending peak value
    pub clusters: Vec<Cluster>,
}

/// Threshold `map` by height and extent and report the surviving clusters
pub fn threshold(
    map: &StatMap,
    params: &ThresholdParams,
    atlases: &[LabelAtlas],
    region: Option<&SearchRegion>,
) -> Result<ThresholdResult> {
    map.check_shape()?;
    let (nx, ny, nz) = map.dims;
    if let Some(a) = atlases.iter().find(|a| a.labels.len() != map.n_voxels()) {
        return Err(invalid(format!(
            "atlas '{}' has {} voxels, map has {}",
            a.name,
            a.labels.len(),
            map.n_voxels()
        )));
    }

    let supra: Vec<u8> = map
        .data
        .iter()
        .map(|&v| if v >= params.statistic { 1 } else { 0 })
        .collect();
    let (labels, sizes) = label_components(&supra, nx, ny, nz, params.connectivity);
    let keep: Vec<bool> = sizes.iter().map(|&s| s >= params.extent.max(1)).collect();

    // peak index per component, first voxel in scan order wins ties
    let mut peaks: Vec<Option<usize>> = vec![None; sizes.len()];
    let mut overlap: Vec<Vec<BTreeMap<u32, usize>>> = vec![vec![BTreeMap::new(); atlases.len()]; sizes.len()];
    let mut data = vec![0.0; map.n_voxels()];
    for (idx, &label) in labels.iter().enumerate() {
        if label == 0 || !keep[label as usize - 1] {
            continue;
        }
        let c = label as usize - 1;
        data[idx] = map.data[idx];
        match peaks[c] {
            Some(p) if map.data[p] >= map.data[idx] => {}
            _ => peaks[c] = Some(idx),
        }
        for (a, atlas) in atlases.iter().enumerate() {
            let l = atlas.labels[idx];
            if l != 0 {
                *overlap[c][a].entry(l).or_insert(0) += 1;
            }
        }
    }

    let mut clusters = Vec::new();
    for (c, peak) in peaks.into_iter().enumerate() {
        let Some(p) = peak else {
            continue;
        };
        let extent = sizes[c];
        let (i, j, k) = (p % nx, (p / nx) % ny, p / (nx * ny));
        let peak_value = map.data[p];
        let (peak_p_corrected, cluster_p_uncorrected, cluster_p_corrected) = match region {
            Some(r) => {
                let ev = expected_voxels(params.statistic, map.field, r.n_voxels);
                let ec = expected_clusters(params.statistic, map.field, &r.resels);
                (
                    Some(statistic_to_voxel_corrected_pvalue(peak_value, map.field, &r.resels)),
                    Some(extent_to_cluster_pvalue(extent as f64, ev, ec, false)),
                    Some(extent_to_cluster_pvalue(extent as f64, ev, ec, true)),
                )
            }
            None => (None, None, None),
        };
        clusters.push(Cluster {
            peak: (i, j, k),
            peak_world: map.world(i, j, k),
            peak_value,
            extent,
            label_overlap: overlap[c]
                .iter()
                .map(|counts| counts.iter().map(|(&l, &n)| (l, n as f64 / extent as f64)).collect())
                .collect(),
            peak_p_corrected,
            cluster_p_uncorrected,
            cluster_p_corrected,
        });
    }
    clusters.sort_by(|a, b| b.peak_value.total_cmp(&a.peak_value));

    info!(
        "threshold {:.3} / {} voxels: {} of {} clusters survive",
        params.statistic,
        params.extent,
        clusters.len(),
        sizes.len()
    );
    Ok(ThresholdResult { map: map.with_data(data, map.field), clusters })
}
