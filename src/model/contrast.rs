//! Contrast statistics from a GLM fit

use log::debug;
use rayon::prelude::*;

use super::estimate::GlmFit;
use crate::design::DesignMatrix;
use crate::error::{invalid, Result};
use crate::linalg;
use crate::stats::{StatField, StatMap};

fn check_inputs(contrast: &[f64], design: &DesignMatrix, beta: &[Vec<f64>], variance: &[f64], df: usize) -> Result<()> {
    if contrast.len() != design.ncols() {
        return Err(invalid(format!(
            "contrast has {} weights, design has {} columns",
            contrast.len(),
            design.ncols()
        )));
    }
    if beta.len() != design.ncols() {
        return Err(invalid(format!("{} beta maps for {} design columns", beta.len(), design.ncols())));
    }
    if beta.iter().any(|b| b.len() != variance.len()) {
        return Err(invalid("beta and variance maps differ in size"));
    }
    if df == 0 {
        return Err(invalid("contrast statistics need at least one residual degree of freedom"));
    }
    Ok(())
}

/// `c · β` at every voxel
fn effect(contrast: &[f64], beta: &[Vec<f64>], n: usize) -> Vec<f64> {
    (0..n)
        .into_par_iter()
        .map(|v| contrast.iter().zip(beta.iter()).map(|(w, b)| w * b[v]).sum())
        .collect()
}

/// Divide the effect by a per-voxel standard error, zeroing degenerate voxels
fn standardize<F>(effect: Vec<f64>, variance: &[f64], se: F) -> Vec<f64>
where
    F: Fn(f64) -> f64 + Sync,
{
    effect
        .into_par_iter()
        .zip(variance.par_iter())
        .map(|(e, &var)| {
            if var <= 0.0 {
                return 0.0;
            }
            let s = e / se(var);
            if s.is_finite() {
                s
            } else {
                0.0
            }
        })
        .collect()
}

/// t statistic of a contrast at every voxel
///
/// `t = c·β / sqrt(σ²/df · c(XᵗX)⁻¹cᵗ)`, with `(XᵗX)⁻¹` replaced by the
/// pseudo-inverse for rank-deficient designs. Voxels with zero variance get 0.
pub fn t_map(contrast: &[f64], design: &DesignMatrix, beta: &[Vec<f64>], variance: &[f64], df: usize) -> Result<Vec<f64>> {
    check_inputs(contrast, design, beta, variance, df)?;
    let x = &design.matrix;
    let xtx_inv = linalg::inverse_or_pinv(&(x.transpose() * x))?;
    let c = nalgebra::DVector::from_column_slice(contrast);
    let d = (c.transpose() * &xtx_inv * &c)[(0, 0)];
    debug!("contrast variance factor c(XᵗX)⁻¹cᵗ = {:.6}", d);

    let df = df as f64;
    Ok(standardize(effect(contrast, beta, variance.len()), variance, |var| {
        (var / df * d).sqrt()
    }))
}

/// Approximate z statistic: `c·β / sqrt(σ²/df)`
///
/// The contrast covariance term is left out, so this is not the normal
/// equivalent of [`t_map`]; convert a t map with [`StatMap::to_z`] for that.
pub fn z_map(contrast: &[f64], design: &DesignMatrix, beta: &[Vec<f64>], variance: &[f64], df: usize) -> Result<Vec<f64>> {
    check_inputs(contrast, design, beta, variance, df)?;
    let df = df as f64;
    Ok(standardize(effect(contrast, beta, variance.len()), variance, |var| (var / df).sqrt()))
}

impl GlmFit {
    /// t map of a contrast over this fit
    pub fn t_map(&self, contrast: &[f64], design: &DesignMatrix) -> Result<StatMap> {
        let data = t_map(contrast, design, &self.beta, &self.variance, self.df)?;
        Ok(StatMap::new(data, self.dims, self.spacing, StatField::T { df: self.df as f64 })?.with_origin(self.origin))
    }

    /// Approximate z map of a contrast over this fit
    pub fn z_map(&self, contrast: &[f64], design: &DesignMatrix) -> Result<StatMap> {
        let data = z_map(contrast, design, &self.beta, &self.variance, self.df)?;
        Ok(StatMap::new(data, self.dims, self.spacing, StatField::Z)?.with_origin(self.origin))
    }
}
