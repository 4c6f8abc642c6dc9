//! Statistic ↔ p-value conversions
//!
//! All p-values are one-sided upper-tail probabilities. Two conventions hold
//! everywhere in the crate:
//! - a statistic of exactly 0 maps to p = 1 (and p ≥ 1 maps back to 0)
//! - p is clamped to machine epsilon instead of underflowing to 0, so
//!   downstream `ln(p)` stays finite
//!
//! Invalid degrees of freedom or non-finite inputs propagate as NaN; callers
//! guard against them.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::function::erf::{erfc, erfc_inv};

/// Smallest p-value ever returned
pub const P_FLOOR: f64 = f64::EPSILON;

/// Distribution family of a statistic map
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum StatField {
    /// Student t field with `df` degrees of freedom
    T { df: f64 },
    /// Standard Gaussian field
    Z,
}

impl StatField {
    /// Degrees of freedom, 0 for Gaussian fields
    pub fn df(&self) -> f64 {
        match *self {
            StatField::T { df } => df,
            StatField::Z => 0.0,
        }
    }

    /// Upper-tail p-value of `stat` in this family
    pub fn p_value(&self, stat: f64) -> f64 {
        match *self {
            StatField::T { df } => t_to_p(stat, df),
            StatField::Z => z_to_p(stat),
        }
    }

    /// Statistic whose upper-tail p-value is `p`
    pub fn statistic(&self, p: f64) -> f64 {
        match *self {
            StatField::T { df } => p_to_t(p, df),
            StatField::Z => p_to_z(p),
        }
    }
}

fn student(df: f64) -> Option<StudentsT> {
    StudentsT::new(0.0, 1.0, df).ok()
}

#[inline]
fn floor_p(p: f64) -> f64 {
    if p < P_FLOOR {
        P_FLOOR
    } else {
        p
    }
}

/// Standard normal survival function without the p conventions
#[inline]
pub fn norm_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Standard normal inverse survival function without the p conventions
#[inline]
pub fn norm_isf(p: f64) -> f64 {
    std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)
}

/// Upper-tail p-value of a t statistic
pub fn t_to_p(t: f64, df: f64) -> f64 {
    if t == 0.0 {
        return 1.0;
    }
    match student(df) {
        Some(dist) => floor_p(dist.sf(t)),
        None => f64::NAN,
    }
}

/// Upper-tail p-value of a z statistic
pub fn z_to_p(z: f64) -> f64 {
    if z == 0.0 {
        return 1.0;
    }
    floor_p(norm_sf(z))
}

/// t statistic with upper-tail p-value `p`
pub fn p_to_t(p: f64, df: f64) -> f64 {
    if p >= 1.0 {
        return 0.0;
    }
    let p = floor_p(p);
    match student(df) {
        // Work from the nearer tail to keep precision for small p
        Some(dist) if p < 0.5 => -dist.inverse_cdf(p),
        Some(dist) => dist.inverse_cdf(1.0 - p),
        None => f64::NAN,
    }
}

/// z statistic with upper-tail p-value `p`
pub fn p_to_z(p: f64) -> f64 {
    if p >= 1.0 {
        return 0.0;
    }
    norm_isf(floor_p(p))
}

/// Convert z to t through the p-value, keeping the p conventions consistent
pub fn z_to_t(z: f64, df: f64) -> f64 {
    p_to_t(z_to_p(z), df)
}

/// Convert t to z through the p-value, keeping the p conventions consistent
pub fn t_to_z(t: f64, df: f64) -> f64 {
    p_to_z(t_to_p(t, df))
}

/// Family-wise p-value of `n` independent tests each at level `p`: `1-(1-p)^n`
pub fn bonferroni_corrected(p: f64, n: usize) -> f64 {
    -((n as f64) * (-p).ln_1p()).exp_m1()
}

/// Per-test level giving family-wise level `p` over `n` tests: `1-(1-p)^(1/n)`
pub fn bonferroni_uncorrected(p: f64, n: usize) -> f64 {
    if n == 0 {
        return p;
    }
    -((-p).ln_1p() / n as f64).exp_m1()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_statistic_gives_unit_p() {
        assert_eq!(t_to_p(0.0, 10.0), 1.0);
        assert_eq!(z_to_p(0.0), 1.0);
        assert_eq!(p_to_t(1.0, 10.0), 0.0);
        assert_eq!(p_to_z(1.0), 0.0);
    }

    #[test]
    fn test_known_values() {
        // z = 1.959964 is the two-sided 5% point
        assert!((z_to_p(1.959964) - 0.025).abs() < 1e-6);
        assert!((p_to_z(0.05) - 1.644854).abs() < 1e-5);
        // t(10) upper 5% point
        assert!((p_to_t(0.05, 10.0) - 1.812461).abs() < 1e-4);
        assert!((t_to_p(2.228139, 10.0) - 0.025).abs() < 1e-5);
    }

    #[test]
    fn test_p_never_zero() {
        assert_eq!(z_to_p(50.0), P_FLOOR);
        assert_eq!(t_to_p(1e6, 5.0), P_FLOOR);
    }

    #[test]
    fn test_round_trip_t() {
        for &df in &[1.0, 3.0, 12.0, 60.0] {
            for &t in &[-2.5, -0.7, 0.3, 1.0, 2.0, 4.0] {
                let back = p_to_t(t_to_p(t, df), df);
                assert!((back - t).abs() < 1e-5, "df={} t={} back={}", df, t, back);
            }
        }
    }

    #[test]
    fn test_round_trip_z() {
        for &z in &[-3.0, -1.0, 0.5, 1.5, 3.0, 6.0] {
            let back = p_to_z(z_to_p(z));
            assert!((back - z).abs() < 1e-8, "z={} back={}", z, back);
        }
    }

    #[test]
    fn test_t_to_p_monotone() {
        let mut prev = 1.0;
        for i in 1..60 {
            let p = t_to_p(i as f64 * 0.1, 8.0);
            assert!(p <= prev);
            prev = p;
        }
    }

    #[test]
    fn test_family_conversions_large_df() {
        // t with many degrees of freedom is nearly Gaussian
        let z = t_to_z(2.0, 5000.0);
        assert!((z - 2.0).abs() < 1e-2);
        let t = z_to_t(2.0, 5.0);
        assert!(t > 2.0);
        assert!((t_to_z(t, 5.0) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_bonferroni_round_trip() {
        let cases = [(1usize, 0.5), (10, 0.05), (10, 1e-6), (1000, 1e-4), (200_000, 1e-8)];
        for &(n, p) in &cases {
            let back = bonferroni_uncorrected(bonferroni_corrected(p, n), n);
            assert!((back - p).abs() / p < 1e-8, "n={} p={} back={}", n, p, back);
        }
        assert!((bonferroni_corrected(0.05, 1) - 0.05).abs() < 1e-15);
    }

    #[test]
    fn test_invalid_df_is_nan() {
        assert!(t_to_p(1.0, 0.0).is_nan());
        assert!(p_to_t(0.05, -1.0).is_nan());
    }

    #[test]
    fn test_stat_field_dispatch() {
        let t = StatField::T { df: 10.0 };
        assert_eq!(t.df(), 10.0);
        assert_eq!(StatField::Z.df(), 0.0);
        assert!((t.statistic(t.p_value(2.0)) - 2.0).abs() < 1e-6);
    }
}
