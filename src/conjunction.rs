//! Conjunction analysis: pooling several statistic maps into one
//!
//! Every method turns the per-voxel p-values of the `k` input maps into one
//! combined p-value, which is then re-expressed as `z = Φ̄(1 - p)` where `Φ̄`
//! is the standard normal survival function. The output is always a z map.
//!
//! References:
//! Fisher, R.A. (1932). "Statistical Methods for Research Workers."
//! Tippett, L.H.C. (1931). "The Methods of Statistics."
//! Stouffer, S.A. et al. (1949). "The American Soldier."
//! Mudholkar, G.S., George, E.O. (1979). "The logit statistic for combining
//! probabilities." Symposium on Optimizing Methods in Statistics.
//! Worsley, K.J., Friston, K.J. (2000). "A test for a conjunction."
//! Statistics & Probability Letters, 47:135-140.

use std::f64::consts::PI;
use std::str::FromStr;

use log::info;
use rayon::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

use crate::error::{invalid, Result, SpmError};
use crate::stats::conversion::{norm_sf, t_to_z, z_to_p, StatField};
use crate::stats::StatMap;

/// Rule combining `k` p-values
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConjunctionMethod {
    /// `-2 Σ ln pᵢ ~ χ²(2k)`
    Fisher,
    /// `(max pᵢ)^k`
    Worsley,
    /// `Σ zᵢ / √k ~ N(0, 1)`
    Stouffer,
    /// Logit sum scaled to `t(5k + 4)`
    MudholkarGeorge,
    /// `1 - (1 - min pᵢ)^k`
    Tippett,
}

impl FromStr for ConjunctionMethod {
    type Err = SpmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "fisher" => Ok(ConjunctionMethod::Fisher),
            "worsley" | "maxp" => Ok(ConjunctionMethod::Worsley),
            "stouffer" => Ok(ConjunctionMethod::Stouffer),
            "mudholkargeorge" => Ok(ConjunctionMethod::MudholkarGeorge),
            "tippett" | "minp" => Ok(ConjunctionMethod::Tippett),
            _ => Err(invalid(format!("unknown conjunction method '{}'", s))),
        }
    }
}

/// Distributions shared by every voxel of one conjunction
struct Pooling {
    method: ConjunctionMethod,
    k: f64,
    chi2: Option<ChiSquared>,
    student: Option<StudentsT>,
    logit_scale: f64,
}

impl Pooling {
    fn new(method: ConjunctionMethod, k: usize) -> Result<Self> {
        let kf = k as f64;
        let chi2 = match method {
            ConjunctionMethod::Fisher => Some(
                ChiSquared::new(2.0 * kf).map_err(|e| invalid(format!("chi-squared with {} df: {}", 2 * k, e)))?,
            ),
            _ => None,
        };
        let student = match method {
            ConjunctionMethod::MudholkarGeorge => Some(
                StudentsT::new(0.0, 1.0, 5.0 * kf + 4.0)
                    .map_err(|e| invalid(format!("Student t with {} df: {}", 5 * k + 4, e)))?,
            ),
            _ => None,
        };
        let logit_scale = (3.0 * (5.0 * kf + 4.0) / (PI * PI * kf * (5.0 * kf + 2.0))).sqrt();
        Ok(Self { method, k: kf, chi2, student, logit_scale })
    }

    /// Combined p-value from per-map p-values and z-values
    fn combine(&self, p: &[f64], z: &[f64]) -> f64 {
        match self.method {
            ConjunctionMethod::Fisher => {
                let x = -2.0 * p.iter().map(|p| p.ln()).sum::<f64>();
                self.chi2.as_ref().map_or(f64::NAN, |d| d.sf(x))
            }
            ConjunctionMethod::Worsley => p.iter().cloned().fold(f64::MIN, f64::max).powf(self.k),
            ConjunctionMethod::Stouffer => z_to_p(z.iter().sum::<f64>() / self.k.sqrt()),
            ConjunctionMethod::MudholkarGeorge => {
                let t = -p.iter().map(|p| (p / (1.0 - p)).ln()).sum::<f64>() * self.logit_scale;
                self.student.as_ref().map_or(f64::NAN, |d| d.sf(t))
            }
            ConjunctionMethod::Tippett => {
                let min_p = p.iter().cloned().fold(f64::MAX, f64::min);
                -(self.k * (-min_p).ln_1p()).exp_m1()
            }
        }
    }
}

/// Pool `maps` voxel by voxel inside `mask`
///
/// A mix of t and z maps is first brought onto the z scale. Voxels outside
/// the mask, and combinations that are not finite, are 0.
pub fn conjunction(maps: &[StatMap], mask: &[u8], method: ConjunctionMethod) -> Result<StatMap> {
    let first = maps.first().ok_or_else(|| invalid("conjunction needs at least one map"))?;
    for m in maps {
        m.check_shape()?;
    }
    if let Some(m) = maps.iter().find(|m| !m.same_lattice(first)) {
        return Err(invalid(format!("map dimensions {:?} differ from {:?}", m.dims, first.dims)));
    }
    if mask.len() != first.n_voxels() {
        return Err(invalid(format!("mask has {} voxels, maps have {}", mask.len(), first.n_voxels())));
    }

    let mixed = maps.iter().any(|m| m.is_t()) && maps.iter().any(|m| !m.is_t());
    let maps: Vec<StatMap> = if mixed {
        maps.iter().map(|m| m.to_z()).collect()
    } else {
        maps.to_vec()
    };
    let k = maps.len();
    let pooling = Pooling::new(method, k)?;
    info!("conjunction of {} maps with {:?}", k, method);

    let data = (0..first.n_voxels())
        .into_par_iter()
        .map(|v| {
            if mask[v] == 0 {
                return 0.0;
            }
            let p: Vec<f64> = maps.iter().map(|m| m.field.p_value(m.data[v])).collect();
            let z: Vec<f64> = maps
                .iter()
                .map(|m| match m.field {
                    StatField::Z => m.data[v],
                    StatField::T { df } => t_to_z(m.data[v], df),
                })
                .collect();
            let out = norm_sf(1.0 - pooling.combine(&p, &z));
            if out.is_finite() {
                out
            } else {
                0.0
            }
        })
        .collect();

    Ok(first.with_data(data, StatField::Z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::conversion::t_to_p;

    fn z_map(values: Vec<f64>) -> StatMap {
        let n = values.len();
        StatMap::new(values, (n, 1, 1), (1.0, 1.0, 1.0), StatField::Z).unwrap()
    }

    #[test]
    fn test_tippett_single_map() {
        let m = z_map(vec![0.0, 1.0, 2.5, -1.0]);
        let mask = vec![1u8; 4];
        let out = conjunction(&[m.clone()], &mask, ConjunctionMethod::Tippett).unwrap();
        assert_eq!(out.field, StatField::Z);
        for (o, &z) in out.data.iter().zip(m.data.iter()) {
            assert!((o - norm_sf(1.0 - z_to_p(z))).abs() < 1e-12);
        }
    }

    #[test]
    fn test_methods_on_two_maps() {
        let a = z_map(vec![2.0]);
        let b = z_map(vec![1.0]);
        let mask = vec![1u8];
        let (pa, pb) = (z_to_p(2.0), z_to_p(1.0));
        let run = |m| conjunction(&[a.clone(), b.clone()], &mask, m).unwrap().data[0];

        let fisher = ChiSquared::new(4.0).unwrap().sf(-2.0 * (pa.ln() + pb.ln()));
        assert!((run(ConjunctionMethod::Fisher) - norm_sf(1.0 - fisher)).abs() < 1e-12);

        assert!((run(ConjunctionMethod::Worsley) - norm_sf(1.0 - pb * pb)).abs() < 1e-12);

        let stouffer = z_to_p(3.0 / 2f64.sqrt());
        assert!((run(ConjunctionMethod::Stouffer) - norm_sf(1.0 - stouffer)).abs() < 1e-12);

        let tippett = 1.0 - (1.0 - pa) * (1.0 - pa);
        assert!((run(ConjunctionMethod::Tippett) - norm_sf(1.0 - tippett)).abs() < 1e-12);

        let scale = (3.0 * 14.0 / (PI * PI * 2.0 * 12.0)).sqrt();
        let t = -((pa / (1.0 - pa)).ln() + (pb / (1.0 - pb)).ln()) * scale;
        let mg = StudentsT::new(0.0, 1.0, 14.0).unwrap().sf(t);
        assert!((run(ConjunctionMethod::MudholkarGeorge) - norm_sf(1.0 - mg)).abs() < 1e-12);
    }

    #[test]
    fn test_mixed_maps_use_z_scale() {
        let t = StatMap::new(vec![3.0], (1, 1, 1), (1.0, 1.0, 1.0), StatField::T { df: 8.0 }).unwrap();
        let z = z_map(vec![1.5]);
        let out = conjunction(&[t, z], &[1], ConjunctionMethod::Worsley).unwrap();
        let p = t_to_p(3.0, 8.0).max(z_to_p(1.5));
        assert!((out.data[0] - norm_sf(1.0 - p * p)).abs() < 1e-9);
    }

    #[test]
    fn test_mask_and_validation() {
        let a = z_map(vec![2.0, 2.0]);
        let out = conjunction(&[a.clone()], &[0, 1], ConjunctionMethod::Fisher).unwrap();
        assert_eq!(out.data[0], 0.0);
        assert!(out.data[1] > 0.0);

        assert!(conjunction(&[], &[1], ConjunctionMethod::Fisher).is_err());
        assert!(conjunction(&[a.clone()], &[1], ConjunctionMethod::Fisher).is_err());
        assert!(conjunction(&[a.clone(), z_map(vec![1.0])], &[1, 1], ConjunctionMethod::Fisher).is_err());

        // dims agree but the values buffer is short
        let mut short = a.clone();
        short.data.truncate(1);
        let r = conjunction(&[a, short], &[1, 1], ConjunctionMethod::Stouffer);
        assert!(matches!(r, Err(SpmError::Validation(_))));
    }

    #[test]
    fn test_method_names() {
        assert_eq!("Mudholkar-George".parse::<ConjunctionMethod>().unwrap(), ConjunctionMethod::MudholkarGeorge);
        assert_eq!("tippett".parse::<ConjunctionMethod>().unwrap(), ConjunctionMethod::Tippett);
        assert!("bonferroni".parse::<ConjunctionMethod>().is_err());
    }
}
