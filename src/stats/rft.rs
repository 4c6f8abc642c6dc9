//! Random Field Theory geometry and inference
//!
//! Expected Euler characteristic of thresholded Gaussian and Student t
//! fields, resel counting over a binary lattice, and the voxel- and
//! cluster-level p-values built on top of them.
//!
//! References:
//! Worsley, K.J., Marrett, S., Neelin, P., Vandal, A.C., Friston, K.J.,
//! Evans, A.C. (1996). "A unified statistical approach for determining
//! significant signals in images of cerebral activation."
//! Human Brain Mapping, 4:58-73.
//!
//! Friston, K.J., Worsley, K.J., Frackowiak, R.S.J., Mazziotta, J.C.,
//! Evans, A.C. (1994). "Assessing the significance of focal activations
//! using their spatial extent." Human Brain Mapping, 1:210-220.

use std::f64::consts::{LN_2, PI};
use std::ops::Add;

use log::{debug, info};
use ndarray::{ArrayView3, ShapeBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::function::gamma::{gamma, ln_gamma};

use crate::error::{invalid, Result, SpmError};
use crate::progress::{CancelToken, ProgressCounter};
use crate::stats::conversion::{norm_sf, StatField};

/// Resel counts of a search region at a given smoothness
///
/// `rc0` is the Euler characteristic of the region; `rc1..rc3` are its
/// resel diameter, surface and volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReselCounts {
    pub rc0: f64,
    pub rc1: f64,
    pub rc2: f64,
    pub rc3: f64,
}

impl ReselCounts {
    pub fn as_array(&self) -> [f64; 4] {
        [self.rc0, self.rc1, self.rc2, self.rc3]
    }
}

/// Newton-Raphson settings for statistic inversion
#[derive(Clone, Debug)]
pub struct NewtonParams {
    /// Absolute tolerance on the statistic step
    pub tol: f64,
    /// Iteration cap per stage
    pub max_iter: usize,
}

impl Default for NewtonParams {
    fn default() -> Self {
        Self { tol: 1e-6, max_iter: 100 }
    }
}

/// Raw upper tail without the p = 1 at 0 convention, so EC stays smooth
fn upper_tail(u: f64, field: StatField) -> f64 {
    match field {
        StatField::Z => norm_sf(u),
        StatField::T { df } => StudentsT::new(0.0, 1.0, df)
            .map(|d| d.sf(u))
            .unwrap_or(f64::NAN),
    }
}

/// Expected Euler characteristic densities `ρ0..ρ3` at threshold `u`
///
/// Closed forms from Worsley et al. (1996), table 2, with the 4·ln2
/// factor converting FWHM units into resels.
pub fn ec_densities(u: f64, field: StatField) -> [f64; 4] {
    let a = 4.0 * LN_2;
    let rho0 = upper_tail(u, field);

    match field {
        StatField::Z => {
            let e = (-u * u / 2.0).exp();
            [
                rho0,
                a.sqrt() / (2.0 * PI) * e,
                a / (2.0 * PI).powf(1.5) * u * e,
                a.powf(1.5) / (2.0 * PI).powi(2) * (u * u - 1.0) * e,
            ]
        }
        StatField::T { df: v } => {
            let common = (1.0 + u * u / v).powf(-(v - 1.0) / 2.0);
            let gamma_ratio = (ln_gamma((v + 1.0) / 2.0) - ln_gamma(v / 2.0)).exp() / (v / 2.0).sqrt();
            [
                rho0,
                a.sqrt() / (2.0 * PI) * common,
                a / (2.0 * PI).powf(1.5) * gamma_ratio * u * common,
                a.powf(1.5) / (2.0 * PI).powi(2) * ((v - 1.0) / v * u * u - 1.0) * common,
            ]
        }
    }
}

/// Point, edge, face and cube counts of the cubical complex on a mask
#[derive(Clone, Copy, Debug, Default)]
struct LatticeCounts {
    points: f64,
    ex: f64,
    ey: f64,
    ez: f64,
    fxy: f64,
    fxz: f64,
    fyz: f64,
    cubes: f64,
}

impl Add for LatticeCounts {
    type Output = LatticeCounts;

    fn add(self, o: LatticeCounts) -> LatticeCounts {
        LatticeCounts {
            points: self.points + o.points,
            ex: self.ex + o.ex,
            ey: self.ey + o.ey,
            ez: self.ez + o.ez,
            fxy: self.fxy + o.fxy,
            fxz: self.fxz + o.fxz,
            fyz: self.fyz + o.fyz,
            cubes: self.cubes + o.cubes,
        }
    }
}

/// Forward-scan one z slab: every foreground voxel tests its +x, +y, +z,
/// face-diagonal and body-diagonal neighbours.
fn count_slab(m: &ArrayView3<u8>, k: usize) -> LatticeCounts {
    let (nx, ny, nz) = m.dim();
    let on = |i: usize, j: usize, k: usize| i < nx && j < ny && k < nz && m[[i, j, k]] > 0;
    let mut c = LatticeCounts::default();

    for j in 0..ny {
        for i in 0..nx {
            if m[[i, j, k]] == 0 {
                continue;
            }
            c.points += 1.0;

            let x = on(i + 1, j, k);
            let y = on(i, j + 1, k);
            let z = on(i, j, k + 1);
            let xy = on(i + 1, j + 1, k);
            let xz = on(i + 1, j, k + 1);
            let yz = on(i, j + 1, k + 1);
            let xyz = on(i + 1, j + 1, k + 1);

            if x { c.ex += 1.0; }
            if y { c.ey += 1.0; }
            if z { c.ez += 1.0; }
            if x && y && xy { c.fxy += 1.0; }
            if x && z && xz { c.fxz += 1.0; }
            if y && z && yz { c.fyz += 1.0; }
            if x && y && z && xy && xz && yz && xyz { c.cubes += 1.0; }
        }
    }
    c
}

/// Resel counts of a binary mask
///
/// # Arguments
/// * `mask` - Binary mask (nx * ny * nz), > 0 = search region
/// * `nx`, `ny`, `nz` - Array dimensions
/// * `spacing` - Voxel sizes in mm
/// * `fwhm` - Smoothness in mm along x, y, z (infinite = perfectly smooth axis)
pub fn resel_count(
    mask: &[u8],
    nx: usize, ny: usize, nz: usize,
    spacing: (f64, f64, f64),
    fwhm: [f64; 3],
) -> Result<ReselCounts> {
    resel_count_with_progress(mask, nx, ny, nz, spacing, fwhm, &|_, _| {}, &CancelToken::new())
}

/// Resel counts with progress callback and cancellation
///
/// Slabs along z are counted in parallel and the partial counts summed.
/// `progress(current, total)` is reported in slabs.
#[allow(clippy::too_many_arguments)]
pub fn resel_count_with_progress(
    mask: &[u8],
    nx: usize, ny: usize, nz: usize,
    spacing: (f64, f64, f64),
    fwhm: [f64; 3],
    progress: &(dyn Fn(usize, usize) + Sync),
    cancel: &CancelToken,
) -> Result<ReselCounts> {
    if fwhm.iter().any(|f| f.is_nan() || *f <= 0.0) {
        return Err(invalid(format!("smoothness must be positive, got {:?}", fwhm)));
    }
    let view = ArrayView3::from_shape((nx, ny, nz).f(), mask)
        .map_err(|e| invalid(format!("mask does not match dimensions ({}, {}, {}): {}", nx, ny, nz, e)))?;

    let counter = ProgressCounter::new(nz, progress);
    counter.start();

    let counts = (0..nz)
        .into_par_iter()
        .map(|k| {
            if cancel.is_cancelled() {
                return LatticeCounts::default();
            }
            let c = count_slab(&view, k);
            counter.tick();
            c
        })
        .reduce(LatticeCounts::default, |a, b| a + b);

    cancel.check()?;
    counter.finish();

    let rx = spacing.0 / fwhm[0];
    let ry = spacing.1 / fwhm[1];
    let rz = spacing.2 / fwhm[2];
    let c = counts;

    let resels = ReselCounts {
        rc0: c.points - (c.ex + c.ey + c.ez) + (c.fxy + c.fxz + c.fyz) - c.cubes,
        rc1: (c.ex - c.fxy - c.fxz + c.cubes) * rx
            + (c.ey - c.fxy - c.fyz + c.cubes) * ry
            + (c.ez - c.fxz - c.fyz + c.cubes) * rz,
        rc2: (c.fxy - c.cubes) * rx * ry + (c.fxz - c.cubes) * rx * rz + (c.fyz - c.cubes) * ry * rz,
        rc3: c.cubes * rx * ry * rz,
    };
    info!(
        "resel counts: R0={:.3} R1={:.3} R2={:.3} R3={:.3} ({} voxels)",
        resels.rc0, resels.rc1, resels.rc2, resels.rc3, c.points
    );
    Ok(resels)
}

/// Expected number of clusters (Euler characteristic) above threshold `u`
pub fn expected_clusters(u: f64, field: StatField, resels: &ReselCounts) -> f64 {
    ec_densities(u, field)
        .iter()
        .zip(resels.as_array().iter())
        .map(|(rho, rc)| rho * rc)
        .sum()
}

/// Expected number of suprathreshold voxels among `n_voxels`
pub fn expected_voxels(u: f64, field: StatField, n_voxels: usize) -> f64 {
    n_voxels as f64 * field.p_value(u)
}

/// Shape parameter of the cluster-extent distribution in 3D
fn extent_beta(expected_voxels: f64, expected_clusters: f64) -> f64 {
    (gamma(2.5) * expected_clusters / expected_voxels).powf(2.0 / 3.0)
}

/// p-value of a cluster of `k` voxels
///
/// Uncorrected: `exp(-β·k^(2/3))`. Corrected: `1 - exp(-(ec+ε)·p_uncorrected)`.
pub fn extent_to_cluster_pvalue(k: f64, expected_voxels: f64, expected_clusters: f64, corrected: bool) -> f64 {
    if expected_voxels <= 0.0 || expected_clusters <= 0.0 {
        return 1.0;
    }
    let beta = extent_beta(expected_voxels, expected_clusters);
    let p = (-beta * k.max(0.0).powf(2.0 / 3.0)).exp();
    if corrected {
        -(-(expected_clusters + f64::EPSILON) * p).exp_m1()
    } else {
        p
    }
}

/// Cluster extent (voxels) whose cluster p-value is `p`
pub fn cluster_pvalue_to_extent(p: f64, expected_voxels: f64, expected_clusters: f64, corrected: bool) -> f64 {
    if expected_voxels <= 0.0 || expected_clusters <= 0.0 {
        return 0.0;
    }
    let beta = extent_beta(expected_voxels, expected_clusters);
    let p_uncorrected = if corrected {
        -(-p).ln_1p() / (expected_clusters + f64::EPSILON)
    } else {
        p
    };
    if p_uncorrected >= 1.0 {
        return 0.0;
    }
    (-p_uncorrected.ln() / beta).powf(1.5)
}

/// Family-wise corrected p-value of a peak statistic: `1 - exp(-EC(u))`
pub fn statistic_to_voxel_corrected_pvalue(u: f64, field: StatField, resels: &ReselCounts) -> f64 {
    -(-expected_clusters(u, field, resels)).exp_m1()
}

/// Central-difference slope with a step scaled to `u`
fn slope<F>(f: &F, u: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    let h = 1e-6 * u.abs().max(1.0);
    (f(u + h) - f(u - h)) / (2.0 * h)
}

/// Bracket `[lo, hi]` with `f(lo) >= target > f(hi)` on the falling tail of `f`
///
/// Walks upwards from `start` with doubling steps until `f` is below the
/// target and decreasing, which puts `hi` past any hump of the EC curve.
/// `lo` is the last visited point at or above the target, or is found by
/// walking downwards from `hi` when the walk started below the target.
fn bracket_upper_crossing<F>(f: &F, target: f64, start: f64, params: &NewtonParams) -> Result<(f64, f64)>
where
    F: Fn(f64) -> f64,
{
    let fail = |last_step| SpmError::Convergence { target, iterations: params.max_iter, last_step };

    let mut u = start;
    let mut step = 1.0;
    let mut above = None;
    let mut hi = None;
    for _ in 0..params.max_iter {
        if f(u) >= target {
            above = Some(u);
        } else if slope(f, u) < 0.0 {
            hi = Some(u);
            break;
        }
        u += step;
        step *= 2.0;
    }
    let hi = hi.ok_or_else(|| fail(step))?;
    if let Some(lo) = above {
        return Ok((lo, hi));
    }

    let mut step = 1.0;
    for _ in 0..params.max_iter {
        let lo = hi - step;
        if f(lo) >= target {
            return Ok((lo, hi));
        }
        step *= 2.0;
    }
    Err(fail(-step))
}

/// Solve `f(u) = target` on the falling tail of `f`
///
/// Newton steps with a central-difference derivative, kept inside a
/// bracket; a step that leaves the bracket or meets a non-negative slope
/// is replaced by bisection.
fn newton<F>(f: F, target: f64, start: f64, params: &NewtonParams) -> Result<f64>
where
    F: Fn(f64) -> f64,
{
    let (mut lo, mut hi) = bracket_upper_crossing(&f, target, start, params)?;
    let mut u = hi;
    let mut step = hi - lo;
    for _ in 0..params.max_iter {
        let fu = f(u) - target;
        if fu >= 0.0 {
            lo = u;
        } else {
            hi = u;
        }
        let d = slope(&f, u);
        let candidate = u - fu / d;
        let next = if d < 0.0 && candidate > lo && candidate < hi {
            candidate
        } else {
            0.5 * (lo + hi)
        };
        step = u - next;
        u = next;
        if step.abs() < params.tol || hi - lo < params.tol {
            return Ok(u);
        }
    }
    Err(SpmError::Convergence { target, iterations: params.max_iter, last_step: step })
}

/// Statistic threshold giving voxel-level corrected p-value `p`
///
/// Two Newton stages: first solve `EC(u) = p`, then refine against
/// `1 - exp(-EC(u)) = p`. Each stage stops on a step below `params.tol`
/// and fails with [`SpmError::Convergence`] after `params.max_iter`, or
/// when `EC` never falls below `p` (t fields with df <= 3 level off at a
/// positive value for large resel volumes).
pub fn voxel_corrected_pvalue_to_statistic(
    p: f64,
    field: StatField,
    resels: &ReselCounts,
    params: &NewtonParams,
) -> Result<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(invalid(format!("corrected p-value must lie in (0, 1), got {}", p)));
    }
    // The uncorrected threshold is a lower bound of the corrected one
    // whenever it lies on the falling tail
    let start = field.statistic(p).max(1.0);

    let ec = |u: f64| expected_clusters(u, field, resels);
    let u1 = newton(ec, p, start, params)?;
    let u2 = newton(|u| -(-ec(u)).exp_m1(), p, u1, params)?;
    debug!("corrected p={} -> statistic {:.6} (first stage {:.6})", p, u2, u1);
    Ok(u2)
}
