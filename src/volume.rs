//! Image-layer adapter
//!
//! The SPM core never reads or writes image files itself. It consumes flat
//! voxel buffers with their lattice geometry, plus a few summary statistics
//! used by signal normalization. Buffers use Fortran (column-major) order to
//! match the NIfTI convention: `index = x + y*nx + z*nx*ny`.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{invalid, Result, SpmError};

/// Index into a 3D array (Fortran/column-major order)
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// A scalar 3D volume borrowed from the image layer
#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    /// Voxel values, Fortran order
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub spacing: (f64, f64, f64),
    /// World coordinate of voxel (0, 0, 0) in mm
    pub origin: (f64, f64, f64),
}

impl Volume {
    /// Wrap a buffer, checking that its length matches the dimensions
    pub fn new(data: Vec<f64>, dims: (usize, usize, usize), spacing: (f64, f64, f64)) -> Result<Self> {
        let n = dims.0 * dims.1 * dims.2;
        if data.len() != n {
            return Err(invalid(format!(
                "volume buffer has {} values, dimensions {:?} need {}",
                data.len(),
                dims,
                n
            )));
        }
        Ok(Self { data, dims, spacing, origin: (0.0, 0.0, 0.0) })
    }

    /// Volume filled with a constant value
    pub fn filled(value: f64, dims: (usize, usize, usize), spacing: (f64, f64, f64)) -> Self {
        Self {
            data: vec![value; dims.0 * dims.1 * dims.2],
            dims,
            spacing,
            origin: (0.0, 0.0, 0.0),
        }
    }

    pub fn with_origin(mut self, origin: (f64, f64, f64)) -> Self {
        self.origin = origin;
        self
    }

    pub fn n_voxels(&self) -> usize {
        self.data.len()
    }

    /// True when both volumes share dimensions (spacing is not compared)
    pub fn same_lattice(&self, other: &Volume) -> bool {
        self.dims == other.dims
    }

    /// Values inside `mask` (all values when `mask` is `None`)
    fn masked_values(&self, mask: Option<&[u8]>) -> Vec<f64> {
        match mask {
            Some(m) => self
                .data
                .iter()
                .zip(m.iter())
                .filter(|(_, &mv)| mv > 0)
                .map(|(&v, _)| v)
                .collect(),
            None => self.data.clone(),
        }
    }

    /// Mean intensity, optionally restricted to a mask
    pub fn mean(&self, mask: Option<&[u8]>) -> f64 {
        let values = self.masked_values(mask);
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Median intensity, optionally restricted to a mask
    pub fn median(&self, mask: Option<&[u8]>) -> f64 {
        self.percentile(50.0, mask)
    }

    /// Percentile (0-100) with linear interpolation between order statistics
    pub fn percentile(&self, p: f64, mask: Option<&[u8]>) -> f64 {
        let mut values = self.masked_values(mask);
        values.sort_by(|a, b| a.total_cmp(b));
        percentile(&values, p)
    }
}

/// Percentile of a sorted array with linear interpolation
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// World coordinate (mm) of voxel `(i, j, k)` on an axis-aligned grid
pub fn voxel_to_world(
    origin: (f64, f64, f64),
    spacing: (f64, f64, f64),
    (i, j, k): (usize, usize, usize),
) -> (f64, f64, f64) {
    (
        origin.0 + i as f64 * spacing.0,
        origin.1 + j as f64 * spacing.1,
        origin.2 + k as f64 * spacing.2,
    )
}

/// Create a binary box mask on a 3D volume
///
/// Voxels with `lo.d <= index.d < hi.d` on every axis are set to 1.
pub fn create_box_mask(
    nx: usize, ny: usize, nz: usize,
    lo: (usize, usize, usize),
    hi: (usize, usize, usize),
) -> Vec<u8> {
    let mut mask = vec![0u8; nx * ny * nz];
    for k in lo.2..hi.2.min(nz) {
        for j in lo.1..hi.1.min(ny) {
            for i in lo.0..hi.0.min(nx) {
                mask[idx3d(i, j, k, nx, ny)] = 1;
            }
        }
    }
    mask
}

/// Create a binary sphere mask on a 3D volume
///
/// Voxels within `radius` (in voxels) of the center are set to 1.
pub fn create_sphere_mask(
    nx: usize, ny: usize, nz: usize,
    center: (f64, f64, f64),
    radius: f64,
) -> Vec<u8> {
    let mut mask = vec![0u8; nx * ny * nz];
    let r2 = radius * radius;

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let dx = i as f64 - center.0;
                let dy = j as f64 - center.1;
                let dz = k as f64 - center.2;
                if dx * dx + dy * dy + dz * dz <= r2 {
                    mask[idx3d(i, j, k, nx, ny)] = 1;
                }
            }
        }
    }

    mask
}

/// Source of observation volumes, keyed by file name
///
/// Implemented by the image layer; the core only asks whether a file
/// exists and for its decoded contents.
pub trait VolumeLoader {
    fn exists(&self, filename: &str) -> bool {
        Path::new(filename).exists()
    }

    fn load(&self, filename: &str) -> Result<Volume>;
}

/// Loader over volumes already held in memory
#[derive(Default)]
pub struct MemoryLoader {
    volumes: HashMap<String, Volume>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: impl Into<String>, volume: Volume) {
        self.volumes.insert(filename.into(), volume);
    }
}

impl VolumeLoader for MemoryLoader {
    fn exists(&self, filename: &str) -> bool {
        self.volumes.contains_key(filename)
    }

    fn load(&self, filename: &str) -> Result<Volume> {
        self.volumes
            .get(filename)
            .cloned()
            .ok_or_else(|| SpmError::MissingData(format!("observation file '{}' not found", filename)))
    }
}
