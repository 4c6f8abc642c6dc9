//! Inference on statistic maps: RFT geometry, conversions, conjunctions

mod common;

use common::*;
use spm_core::conjunction::{conjunction, ConjunctionMethod};
use spm_core::progress::CancelToken;
use spm_core::stats::conversion::norm_sf;
use spm_core::stats::{
    cluster_pvalue_to_extent, expected_clusters, expected_voxels, extent_to_cluster_pvalue, p_to_t, resel_count,
    resel_count_with_progress, t_to_p, z_to_p, StatField, StatMap,
};
use spm_core::volume::create_sphere_mask;

#[test]
fn test_sphere_is_one_component() {
    let mask = create_sphere_mask(20, 20, 20, (10.0, 10.0, 10.0), 6.0);
    let r = resel_count(&mask, 20, 20, 20, (1.0, 1.0, 1.0), [1.0, 1.0, 1.0]).unwrap();
    assert_eq!(r.rc0, 1.0);
    // resel volume stays below the voxel count of the ball
    assert!(r.rc3 > 0.0 && r.rc3 < count_foreground(&mask) as f64);

    let smooth = resel_count(&mask, 20, 20, 20, (1.0, 1.0, 1.0), [4.0, 4.0, 4.0]).unwrap();
    assert!((smooth.rc3 * 64.0 - r.rc3).abs() < 1e-9);
}

#[test]
fn test_resel_progress_reaches_total() {
    use std::sync::Mutex;
    let mask = vec![1u8; 8 * 8 * 8];
    let seen = Mutex::new(Vec::new());
    let progress = |c: usize, t: usize| seen.lock().unwrap().push((c, t));
    resel_count_with_progress(&mask, 8, 8, 8, (1.0, 1.0, 1.0), [2.0; 3], &progress, &CancelToken::new()).unwrap();
    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.first(), Some(&(0, 8)));
    assert_eq!(seen.last(), Some(&(8, 8)));
}

#[test]
fn test_conversion_monotone_in_statistic() {
    let mut last = 1.0;
    for i in 1..60 {
        let t = i as f64 * 0.1;
        let p = t_to_p(t, 12.0);
        assert!(p <= last);
        last = p;
        assert!((p_to_t(p, 12.0) - t).abs() < 1e-5);
    }
}

#[test]
fn test_cluster_extent_inverse() {
    let resels = spm_core::stats::ReselCounts { rc0: 2.0, rc1: 30.0, rc2: 300.0, rc3: 1000.0 };
    let u = 3.2;
    let ev = expected_voxels(u, StatField::Z, 50_000);
    let ec = expected_clusters(u, StatField::Z, &resels);
    for corrected in [false, true] {
        let k = cluster_pvalue_to_extent(0.05, ev, ec, corrected);
        assert!(k > 0.0);
        assert!((extent_to_cluster_pvalue(k, ev, ec, corrected) - 0.05).abs() < 1e-9);
    }
}

#[test]
fn test_conjunction_of_noise_and_signal_maps() {
    let n = DIMS.0 * DIMS.1 * DIMS.2;
    let signal = blob(DIMS, (8, 8, 4), 2.0, 5.0);
    let mk = |seed: u64, field: StatField| {
        let data = noise(n, seed).iter().zip(signal.iter()).map(|(e, s)| e + s).collect();
        StatMap::new(data, DIMS, SPACING, field).unwrap()
    };
    let maps = vec![mk(1, StatField::Z), mk(2, StatField::T { df: 30.0 }), mk(3, StatField::Z)];
    let mask = inner_mask();
    let centre = spm_core::volume::idx3d(8, 8, 4, DIMS.0, DIMS.1);

    for method in [
        ConjunctionMethod::Fisher,
        ConjunctionMethod::Worsley,
        ConjunctionMethod::Stouffer,
        ConjunctionMethod::MudholkarGeorge,
        ConjunctionMethod::Tippett,
    ] {
        let out = conjunction(&maps, &mask, method).unwrap();
        assert_eq!(out.field, StatField::Z);
        assert_eq!(out.data[0], 0.0);
        assert!(out.data.iter().all(|v| v.is_finite()));
        // strong joint evidence gives a combined p near 0, re-expressed as Φ̄(1 - p)
        assert!((out.data[centre] - norm_sf(1.0)).abs() < 1e-3, "{:?}: {}", method, out.data[centre]);
    }

    let worsley = conjunction(&maps, &mask, ConjunctionMethod::Worsley).unwrap();
    let p_max = maps
        .iter()
        .map(|m| m.to_z())
        .map(|z| z_to_p(z.data[centre]))
        .fold(0.0, f64::max);
    assert!((worsley.data[centre] - norm_sf(1.0 - p_max.powi(3))).abs() < 1e-9);
}
