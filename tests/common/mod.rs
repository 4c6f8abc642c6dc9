//! Common test utilities for SPM-core integration tests

#![allow(dead_code)]

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use spm_core::volume::{idx3d, Volume};

pub const DIMS: (usize, usize, usize) = (16, 16, 8);
pub const SPACING: (f64, f64, f64) = (2.0, 2.0, 2.0);

/// Seeded unit-variance Gaussian noise (Box-Muller on ChaCha8 draws)
pub fn noise(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let u1: f64 = rng.gen::<f64>().max(1e-300);
            let u2: f64 = rng.gen();
            (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        })
        .collect()
}

/// Gaussian blob of `amplitude` centred on a voxel, width `sigma` in voxels
pub fn blob(dims: (usize, usize, usize), center: (usize, usize, usize), sigma: f64, amplitude: f64) -> Vec<f64> {
    let (nx, ny, nz) = dims;
    let mut out = vec![0.0; nx * ny * nz];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let d2 = (i as f64 - center.0 as f64).powi(2)
                    + (j as f64 - center.1 as f64).powi(2)
                    + (k as f64 - center.2 as f64).powi(2);
                out[idx3d(i, j, k, nx, ny)] = amplitude * (-d2 / (2.0 * sigma * sigma)).exp();
            }
        }
    }
    out
}

/// Baseline + noise (+ optional signal) observation volume
pub fn observation(baseline: f64, noise_sd: f64, seed: u64, signal: Option<&[f64]>) -> Volume {
    let n = DIMS.0 * DIMS.1 * DIMS.2;
    let eps = noise(n, seed);
    let data = (0..n)
        .map(|i| baseline + noise_sd * eps[i] + signal.map(|s| s[i]).unwrap_or(0.0))
        .collect();
    Volume::new(data, DIMS, SPACING).unwrap().with_origin((-16.0, -16.0, -8.0))
}

/// Mask covering the lattice minus a one-voxel border
pub fn inner_mask() -> Vec<u8> {
    spm_core::volume::create_box_mask(DIMS.0, DIMS.1, DIMS.2, (1, 1, 1), (DIMS.0 - 1, DIMS.1 - 1, DIMS.2 - 1))
}

pub fn count_foreground(mask: &[u8]) -> usize {
    mask.iter().filter(|&&m| m > 0).count()
}

pub fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

/// Install a test logger once; repeated calls are harmless
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
