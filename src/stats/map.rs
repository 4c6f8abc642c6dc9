//! Statistic maps tagged with their distribution family

use rayon::prelude::*;

use crate::error::{invalid, Result};
use crate::stats::conversion::{t_to_z, StatField};
use crate::volume::voxel_to_world;

/// A voxel-wise statistic map
#[derive(Clone, Debug, PartialEq)]
pub struct StatMap {
    /// Statistic values, Fortran order
    pub data: Vec<f64>,
    pub dims: (usize, usize, usize),
    pub spacing: (f64, f64, f64),
    pub origin: (f64, f64, f64),
    pub field: StatField,
}

impl StatMap {
    pub fn new(
        data: Vec<f64>,
        dims: (usize, usize, usize),
        spacing: (f64, f64, f64),
        field: StatField,
    ) -> Result<Self> {
        if data.len() != dims.0 * dims.1 * dims.2 {
            return Err(invalid(format!(
                "statistic map has {} values, dimensions {:?} need {}",
                data.len(),
                dims,
                dims.0 * dims.1 * dims.2
            )));
        }
        Ok(Self { data, dims, spacing, origin: (0.0, 0.0, 0.0), field })
    }

    pub fn with_origin(mut self, origin: (f64, f64, f64)) -> Self {
        self.origin = origin;
        self
    }

    pub fn n_voxels(&self) -> usize {
        self.data.len()
    }

    pub fn is_t(&self) -> bool {
        matches!(self.field, StatField::T { .. })
    }

    /// Same map expressed as z values; z maps are returned unchanged
    pub fn to_z(&self) -> StatMap {
        match self.field {
            StatField::Z => self.clone(),
            StatField::T { df } => {
                let data = self.data.par_iter().map(|&t| t_to_z(t, df)).collect();
                StatMap { data, field: StatField::Z, ..self.clone_geometry() }
            }
        }
    }

    /// Values buffer matches the dimensions
    ///
    /// Fields are public, so maps assembled by hand are checked again
    /// before voxel indexing.
    pub fn check_shape(&self) -> Result<()> {
        let (nx, ny, nz) = self.dims;
        if self.data.len() != nx * ny * nz {
            return Err(invalid(format!(
                "map holds {} values for dimensions {:?}",
                self.data.len(),
                self.dims
            )));
        }
        Ok(())
    }

    /// World coordinate (mm) of a voxel index
    pub fn world(&self, i: usize, j: usize, k: usize) -> (f64, f64, f64) {
        voxel_to_world(self.origin, self.spacing, (i, j, k))
    }

    pub fn same_lattice(&self, other: &StatMap) -> bool {
        self.dims == other.dims
    }

    fn clone_geometry(&self) -> StatMap {
        StatMap {
            data: Vec::new(),
            dims: self.dims,
            spacing: self.spacing,
            origin: self.origin,
            field: self.field,
        }
    }

    /// Copy of the geometry carrying new values and family
    pub(crate) fn with_data(&self, data: Vec<f64>, field: StatField) -> StatMap {
        StatMap { data, field, ..self.clone_geometry() }
    }
}
