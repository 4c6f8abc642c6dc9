//! fMRI task regressors
//!
//! Block paradigms are expanded to a 0/1 boxcar over the scans of one
//! condition (session) and convolved with the canonical double-gamma
//! hemodynamic response function. Slow drifts are modelled by a cosine
//! basis restricted to the same scans.
//!
//! Reference:
//! Friston, K.J., Fletcher, P., Josephs, O., Holmes, A., Rugg, M.D.,
//! Turner, R. (1998). "Event-related fMRI: characterizing differential
//! responses." NeuroImage, 7:30-40.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Gamma};

use crate::error::{invalid, Result};

/// Block design of one condition, in scans
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParadigm {
    /// Rest scans before the first active block
    pub first_active_scan: usize,
    /// Scans per active block
    pub active_scans: usize,
    /// Scans per rest block following each active block
    pub rest_scans: usize,
    /// Number of active/rest cycles
    pub blocks: usize,
}

impl BlockParadigm {
    /// Total number of scans covered by the paradigm
    pub fn len(&self) -> usize {
        self.first_active_scan + self.blocks * (self.active_scans + self.rest_scans)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 0/1 activation sequence, one value per scan
    pub fn boxcar(&self) -> Vec<f64> {
        let mut seq = vec![0.0; self.first_active_scan];
        for _ in 0..self.blocks {
            seq.extend(std::iter::repeat(1.0).take(self.active_scans));
            seq.extend(std::iter::repeat(0.0).take(self.rest_scans));
        }
        seq
    }
}

/// Canonical double-gamma HRF parameters
#[derive(Clone, Debug)]
pub struct HrfParams {
    /// Delay (shape) of the response gamma, seconds
    pub response_delay: f64,
    /// Delay (shape) of the undershoot gamma, seconds
    pub undershoot_delay: f64,
    /// Response-to-undershoot amplitude ratio
    pub ratio: f64,
    /// Kernel length, seconds
    pub length: f64,
    /// Microtime sampling step, seconds
    pub resolution: f64,
}

impl Default for HrfParams {
    fn default() -> Self {
        Self {
            response_delay: 6.0,
            undershoot_delay: 16.0,
            ratio: 6.0,
            length: 32.0,
            resolution: 0.1,
        }
    }
}

/// HRF kernel sampled once per scan and normalized to unit sum
///
/// The difference of gammas is evaluated at `resolution` steps, then
/// every `interscan / resolution`-th sample is kept.
pub fn hrf_kernel(interscan: f64, params: &HrfParams) -> Result<Vec<f64>> {
    if !(interscan > 0.0) || !(params.resolution > 0.0) {
        return Err(invalid(format!("interscan interval must be positive, got {}", interscan)));
    }
    let response = Gamma::new(params.response_delay, 1.0)
        .map_err(|e| invalid(format!("response gamma: {}", e)))?;
    let undershoot = Gamma::new(params.undershoot_delay, 1.0)
        .map_err(|e| invalid(format!("undershoot gamma: {}", e)))?;

    let n_micro = (params.length / params.resolution).round() as usize + 1;
    let micro: Vec<f64> = (0..n_micro)
        .map(|i| {
            let t = i as f64 * params.resolution;
            response.pdf(t) - undershoot.pdf(t) / params.ratio
        })
        .collect();

    let step = ((interscan / params.resolution).round() as usize).max(1);
    let kernel: Vec<f64> = micro.iter().step_by(step).copied().collect();

    let sum: f64 = kernel.iter().sum();
    if sum.abs() < f64::EPSILON {
        return Err(invalid("HRF kernel sums to zero at this interscan interval"));
    }
    Ok(kernel.iter().map(|k| k / sum).collect())
}

/// Causal convolution truncated to the input length
pub fn convolve(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = signal.len();
    let mut out = vec![0.0; n];
    for (i, o) in out.iter_mut().enumerate() {
        for (j, &k) in kernel.iter().enumerate().take(i + 1) {
            *o += signal[i - j] * k;
        }
    }
    out
}

/// HRF-convolved boxcar of a paradigm
pub fn task_regressor(paradigm: &BlockParadigm, interscan: f64, params: &HrfParams) -> Result<Vec<f64>> {
    let kernel = hrf_kernel(interscan, params)?;
    Ok(convolve(&paradigm.boxcar(), &kernel))
}

/// Cosine drift basis: harmonic `h` (1-based) at row `r` of `n` is
/// `cos(h·π·r/(n-1))`
pub fn cosine_basis(n_rows: usize, harmonics: usize) -> Result<Vec<Vec<f64>>> {
    if n_rows < 2 {
        return Err(invalid(format!("high-pass basis needs at least 2 scans, got {}", n_rows)));
    }
    let denom = (n_rows - 1) as f64;
    Ok((1..=harmonics)
        .map(|h| {
            (0..n_rows)
                .map(|r| (h as f64 * PI * r as f64 / denom).cos())
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxcar_layout() {
        let p = BlockParadigm { first_active_scan: 2, active_scans: 3, rest_scans: 1, blocks: 2 };
        assert_eq!(p.len(), 10);
        assert_eq!(p.boxcar(), vec![0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_hrf_kernel_normalized_and_peaks_early() {
        let kernel = hrf_kernel(2.0, &HrfParams::default()).unwrap();
        // 32 s at one sample per 2 s
        assert_eq!(kernel.len(), 17);
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(kernel[0], 0.0);

        let peak = kernel
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        // peak of the canonical response is near 5 s
        assert!(peak.0 == 2 || peak.0 == 3, "peak at sample {}", peak.0);
        // late undershoot is negative
        assert!(kernel[8] < 0.0);
    }

    #[test]
    fn test_hrf_rejects_bad_interscan() {
        assert!(hrf_kernel(0.0, &HrfParams::default()).is_err());
        assert!(hrf_kernel(-1.0, &HrfParams::default()).is_err());
    }

    #[test]
    fn test_convolve_impulse() {
        let out = convolve(&[1.0, 0.0, 0.0, 0.0], &[0.5, 0.3, 0.2]);
        assert_eq!(out, vec![0.5, 0.3, 0.2, 0.0]);
    }

    #[test]
    fn test_task_regressor_length_matches_paradigm() {
        let p = BlockParadigm { first_active_scan: 0, active_scans: 10, rest_scans: 10, blocks: 3 };
        let reg = task_regressor(&p, 3.0, &HrfParams::default()).unwrap();
        assert_eq!(reg.len(), p.len());
        // long blocks saturate near the unit-sum plateau
        assert!((reg[9] - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_cosine_basis() {
        let basis = cosine_basis(5, 2).unwrap();
        assert_eq!(basis.len(), 2);
        assert!((basis[0][0] - 1.0).abs() < 1e-12);
        assert!((basis[0][4] + 1.0).abs() < 1e-12);
        assert!((basis[1][4] - 1.0).abs() < 1e-12);
        assert!(cosine_basis(1, 2).is_err());
    }
}
