//! Voxel-wise general linear model estimation
//!
//! All observations are stacked into one `(observation, z, y, x)` buffer,
//! the in-mask voxels form the columns of `Y`, and the model `Y = Xβ + ε` is
//! solved for every voxel at once with the pseudo-inverse of the design.

use log::{debug, info, warn};
use nalgebra::DMatrix;
use ndarray::{Array2, Array4};
use rayon::prelude::*;

use super::smoothness::autocorrelation_estimate;
use crate::design::{DesignBuilder, DesignMatrix, Normalization};
use crate::error::{invalid, Result, SpmError};
use crate::linalg;
use crate::progress::CancelToken;
use crate::volume::{Volume, VolumeLoader};

/// Estimation options
#[derive(Clone, Debug)]
pub struct EstimationParams {
    /// Target global signal of proportional scaling
    pub scale_target: f64,
}

impl Default for EstimationParams {
    fn default() -> Self {
        Self { scale_target: 100.0 }
    }
}

/// Products of a GLM fit
///
/// Every map covers the full lattice; voxels outside the mask are 0.
#[derive(Clone, Debug)]
pub struct GlmFit {
    /// One coefficient map per design column
    pub beta: Vec<Vec<f64>>,
    /// Sum of squared residuals per voxel
    pub variance: Vec<f64>,
    /// One residual map per observation
    pub residuals: Vec<Vec<f64>>,
    /// Residual smoothness, FWHM in mm along x, y, z
    pub fwhm: [f64; 3],
    /// Residual degrees of freedom, `rows(X) - rank(X)`
    pub df: usize,
    pub dims: (usize, usize, usize),
    pub spacing: (f64, f64, f64),
    pub origin: (f64, f64, f64),
}

const N_STAGES: usize = 4;

/// Residual sum of squares below this fraction of `Σy²` is an exact fit
const EXACT_FIT_RATIO: f64 = 1e-24;

/// Observations share one lattice and `mask` covers it
fn check_lattice(observations: &[Volume], mask: &[u8]) -> Result<()> {
    let Some(first) = observations.first() else {
        return Err(invalid("no observations to estimate"));
    };
    if let Some(v) = observations.iter().find(|v| !v.same_lattice(first)) {
        return Err(invalid(format!("observation dimensions {:?} differ from {:?}", v.dims, first.dims)));
    }
    let (nx, ny, nz) = first.dims;
    let n_total = nx * ny * nz;
    if let Some(v) = observations.iter().find(|v| v.n_voxels() != n_total) {
        return Err(invalid(format!("observation holds {} values for dimensions {:?}", v.n_voxels(), v.dims)));
    }
    if mask.len() != n_total {
        return Err(invalid(format!("mask has {} voxels, observations have {}", mask.len(), n_total)));
    }
    Ok(())
}

/// Fit the design to the observations inside `mask`
///
/// # Arguments
/// * `observations` - One volume per design row, all on the same lattice
/// * `design` - Design matrix (rows = observations)
/// * `mask` - Binary mask, > 0 = analysed voxel
/// * `scale` - Optional per-observation scale factors (proportional scaling)
pub fn estimate(
    observations: &[Volume],
    design: &DesignMatrix,
    mask: &[u8],
    scale: Option<&[f64]>,
) -> Result<GlmFit> {
    estimate_with_progress(observations, design, mask, scale, |_, _| {}, &CancelToken::new())
}

/// GLM fit with progress callback and cancellation
///
/// `progress(stage, total)` is reported once per stage: stacking, solving,
/// residuals, smoothness.
pub fn estimate_with_progress<F>(
    observations: &[Volume],
    design: &DesignMatrix,
    mask: &[u8],
    scale: Option<&[f64]>,
    mut progress: F,
    cancel: &CancelToken,
) -> Result<GlmFit>
where
    F: FnMut(usize, usize),
{
    let n_obs = observations.len();
    if n_obs == 0 {
        return Err(invalid("no observations to estimate"));
    }
    if design.nrows() != n_obs {
        return Err(invalid(format!(
            "design matrix has {} rows but {} observations were given",
            design.nrows(),
            n_obs
        )));
    }
    check_lattice(observations, mask)?;
    let first = &observations[0];
    let (nx, ny, nz) = first.dims;
    let n_total = nx * ny * nz;
    if let Some(s) = scale {
        if s.len() != n_obs {
            return Err(invalid(format!("{} scale factors for {} observations", s.len(), n_obs)));
        }
    }

    progress(0, N_STAGES);

    // Stage 1: stack observations, x fastest in memory like the source volumes
    let mut stacked = Vec::with_capacity(n_obs * n_total);
    for v in observations {
        stacked.extend_from_slice(&v.data);
    }
    let stack = Array4::from_shape_vec((n_obs, nz, ny, nx), stacked)
        .map_err(|e| invalid(format!("cannot stack observations: {}", e)))?;
    let flat: Array2<f64> = stack
        .into_shape_with_order((n_obs, n_total))
        .map_err(|e| invalid(format!("cannot flatten observations: {}", e)))?;

    let selected: Vec<usize> = (0..n_total).filter(|&i| mask[i] > 0).collect();
    let n_sel = selected.len();
    info!(
        "estimating GLM: {} observations x {} columns over {} voxels",
        n_obs,
        design.ncols(),
        n_sel
    );
    let y = DMatrix::from_fn(n_obs, n_sel, |r, c| {
        let s = scale.map(|s| s[r]).unwrap_or(1.0);
        flat[[r, selected[c]]] * s
    });
    drop(flat);
    cancel.check()?;
    progress(1, N_STAGES);

    // Stage 2: least squares through the pseudo-inverse
    let x = &design.matrix;
    let df = design.degrees_of_freedom();
    let beta = linalg::pinv(x)? * &y;
    cancel.check()?;
    progress(2, N_STAGES);

    // Stage 3: residuals and pooled variance, exact fits as None
    let resid = &y - x * &beta;
    let pooled: Vec<Option<f64>> = (0..n_sel)
        .into_par_iter()
        .map(|c| {
            let ss_y: f64 = y.column(c).iter().map(|v| v * v).sum();
            let var: f64 = resid.column(c).iter().map(|r| r * r).sum();
            (var > EXACT_FIT_RATIO * ss_y).then_some(var)
        })
        .collect();

    let mut variance = vec![0.0; n_total];
    let mut standardized = vec![vec![0.0; n_total]; n_obs];
    let mut residuals = vec![vec![0.0; n_total]; n_obs];
    let mut degenerate = 0usize;
    for (c, (&vox, var)) in selected.iter().zip(pooled.iter()).enumerate() {
        let Some(var) = *var else {
            degenerate += 1;
            continue;
        };
        variance[vox] = var;
        let sd = var.sqrt();
        for (r, &e) in resid.column(c).iter().enumerate() {
            residuals[r][vox] = e;
            standardized[r][vox] = e / sd;
        }
    }
    if degenerate > 0 {
        debug!("{} voxels with zero pooled variance set to 0", degenerate);
    }

    let mut beta_maps = vec![vec![0.0; n_total]; design.ncols()];
    for (j, map) in beta_maps.iter_mut().enumerate() {
        for (c, &vox) in selected.iter().enumerate() {
            map[vox] = beta[(j, c)];
        }
    }
    cancel.check()?;
    progress(3, N_STAGES);

    // Stage 4: smoothness of the standardized residuals
    let fwhm = if df > 2 {
        autocorrelation_estimate(&standardized, mask, nx, ny, nz, first.spacing, df)?
    } else {
        warn!("{} residual degrees of freedom, smoothness set to infinite", df);
        [f64::INFINITY; 3]
    };
    progress(N_STAGES, N_STAGES);
    info!("GLM estimated: df = {}, FWHM = {:.3} x {:.3} x {:.3} mm", df, fwhm[0], fwhm[1], fwhm[2]);

    Ok(GlmFit {
        beta: beta_maps,
        variance,
        residuals,
        fwhm,
        df,
        dims: first.dims,
        spacing: first.spacing,
        origin: first.origin,
    })
}

/// Global signal of every observation, restricted to the mask
fn global_signals(observations: &[Volume], normalization: Normalization, mask: &[u8]) -> Vec<f64> {
    match normalization {
        Normalization::None => Vec::new(),
        Normalization::Proportional(s) | Normalization::Ancova(s) => {
            observations.iter().map(|v| s.compute(v, Some(mask))).collect()
        }
    }
}

/// Load the design's observations and fit it
///
/// Checks at entry that every cell has its expected files and that each
/// file exists, then applies the design's normalization: proportional
/// scaling multiplies each observation by `scale_target / global`, ANCOVA
/// adds the global signals as a confound covariate. The covariate and the
/// estimated state are committed to `builder` only when the fit succeeds.
pub fn estimate_design(
    builder: &mut DesignBuilder,
    loader: &dyn VolumeLoader,
    mask: &[u8],
    params: &EstimationParams,
) -> Result<GlmFit> {
    builder.spec().check_complete()?;
    let files: Vec<String> = builder.spec().files().into_iter().map(String::from).collect();
    if let Some(missing) = files.iter().find(|f| !loader.exists(f)) {
        return Err(SpmError::MissingData(format!("observation file '{}' does not exist", missing)));
    }
    // fails early when the matrix is not built yet
    builder.design_matrix()?;

    let observations = files
        .iter()
        .map(|f| loader.load(f))
        .collect::<Result<Vec<Volume>>>()?;
    debug!("loaded {} observation volumes", observations.len());
    check_lattice(&observations, mask)?;

    let mut staged = builder.clone();
    let normalization = staged.normalization();
    let globals = global_signals(&observations, normalization, mask);
    let scale = match normalization {
        Normalization::Proportional(_) => {
            let mut factors = Vec::with_capacity(globals.len());
            for (g, f) in globals.iter().zip(files.iter()) {
                if !(g.is_finite() && *g != 0.0) {
                    return Err(invalid(format!("global signal of '{}' is {}, cannot scale", f, g)));
                }
                factors.push(params.scale_target / g);
            }
            Some(factors)
        }
        Normalization::Ancova(_) => {
            if !staged.has_covariate("global signal") {
                staged.add_global_signal_covariate(&globals)?;
            }
            None
        }
        Normalization::None => None,
    };

    staged.mark_estimated()?;
    let design = staged.design_matrix()?;
    let fit = estimate(&observations, &design, mask, scale.as_deref())?;
    *builder = staged;
    Ok(fit)
}
