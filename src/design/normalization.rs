//! Global signal normalization and confound covariate schemes
//!
//! Persisted codes:
//! - normalization `0..=12`: 0 none, 1-6 proportional scaling, 7-12 ANCOVA,
//!   each family over the global signals mean, median, p75, p90, p95, p99
//! - ANCOVA / covariate scope `0..=3`: global, by group, by subject, by condition
//! - age covariate `0..=4`: none, then the four scopes

use serde::{Deserialize, Serialize};

use crate::error::{invalid, Result};
use crate::volume::Volume;

/// Summary statistic used as the global signal of an observation
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum GlobalSignal {
    Mean,
    Median,
    Percentile(u8),
}

const SIGNALS: [GlobalSignal; 6] = [
    GlobalSignal::Mean,
    GlobalSignal::Median,
    GlobalSignal::Percentile(75),
    GlobalSignal::Percentile(90),
    GlobalSignal::Percentile(95),
    GlobalSignal::Percentile(99),
];

impl GlobalSignal {
    /// Global signal of `volume`, restricted to `mask` when given
    pub fn compute(&self, volume: &Volume, mask: Option<&[u8]>) -> f64 {
        match *self {
            GlobalSignal::Mean => volume.mean(mask),
            GlobalSignal::Median => volume.median(mask),
            GlobalSignal::Percentile(p) => volume.percentile(p as f64, mask),
        }
    }

    fn index(&self) -> Result<u8> {
        SIGNALS
            .iter()
            .position(|s| s == self)
            .map(|i| i as u8)
            .ok_or_else(|| invalid(format!("unsupported global signal {:?}", self)))
    }
}

/// How observation intensities are normalized before estimation
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Normalization {
    #[default]
    None,
    /// Scale each observation by `target / global`
    Proportional(GlobalSignal),
    /// Add the global signal as a confound covariate
    Ancova(GlobalSignal),
}

impl Normalization {
    pub fn code(&self) -> Result<u8> {
        Ok(match self {
            Normalization::None => 0,
            Normalization::Proportional(s) => 1 + s.index()?,
            Normalization::Ancova(s) => 7 + s.index()?,
        })
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Normalization::None),
            1..=6 => Ok(Normalization::Proportional(SIGNALS[(code - 1) as usize])),
            7..=12 => Ok(Normalization::Ancova(SIGNALS[(code - 7) as usize])),
            _ => Err(invalid(format!("invalid normalization code {}", code))),
        }
    }
}

/// Level at which a covariate acts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovariateScope {
    #[default]
    Global,
    ByGroup,
    BySubject,
    ByCondition,
}

impl CovariateScope {
    pub fn code(self) -> u8 {
        match self {
            CovariateScope::Global => 0,
            CovariateScope::ByGroup => 1,
            CovariateScope::BySubject => 2,
            CovariateScope::ByCondition => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CovariateScope::Global),
            1 => Ok(CovariateScope::ByGroup),
            2 => Ok(CovariateScope::BySubject),
            3 => Ok(CovariateScope::ByCondition),
            _ => Err(invalid(format!("invalid covariate scope code {}", code))),
        }
    }

    /// Age covariate code: 0 when absent, otherwise `1 + scope`
    pub fn age_code(scope: Option<CovariateScope>) -> u8 {
        scope.map(|s| s.code() + 1).unwrap_or(0)
    }

    pub fn from_age_code(code: u8) -> Result<Option<Self>> {
        match code {
            0 => Ok(None),
            1..=4 => Ok(Some(Self::from_code(code - 1)?)),
            _ => Err(invalid(format!("invalid age covariate code {}", code))),
        }
    }
}

impl std::str::FromStr for CovariateScope {
    type Err = crate::error::SpmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(CovariateScope::Global),
            "group" | "bygroup" => Ok(CovariateScope::ByGroup),
            "subject" | "bysubject" => Ok(CovariateScope::BySubject),
            "condition" | "bycondition" => Ok(CovariateScope::ByCondition),
            _ => Err(invalid(format!("invalid covariate scope '{}'", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_codes_round_trip() {
        for code in 0..=12u8 {
            let n = Normalization::from_code(code).unwrap();
            assert_eq!(n.code().unwrap(), code);
        }
        assert!(Normalization::from_code(13).is_err());
        assert_eq!(Normalization::from_code(8).unwrap(), Normalization::Ancova(GlobalSignal::Median));
        assert!(Normalization::Proportional(GlobalSignal::Percentile(42)).code().is_err());
    }

    #[test]
    fn test_scope_and_age_codes() {
        assert_eq!(CovariateScope::age_code(None), 0);
        assert_eq!(CovariateScope::age_code(Some(CovariateScope::BySubject)), 3);
        assert_eq!(CovariateScope::from_age_code(4).unwrap(), Some(CovariateScope::ByCondition));
        assert!(CovariateScope::from_age_code(5).is_err());
        assert!(CovariateScope::from_code(4).is_err());
        assert_eq!("byGroup".parse::<CovariateScope>().unwrap(), CovariateScope::ByGroup);
        assert!("voxel".parse::<CovariateScope>().is_err());
    }

    #[test]
    fn test_global_signal_compute() {
        let vol = Volume::new((1..=8).map(|v| v as f64).collect(), (2, 2, 2), (1.0, 1.0, 1.0)).unwrap();
        assert!((GlobalSignal::Mean.compute(&vol, None) - 4.5).abs() < 1e-12);
        assert!((GlobalSignal::Median.compute(&vol, None) - 4.5).abs() < 1e-12);
        assert!((GlobalSignal::Percentile(99).compute(&vol, None) - 7.93).abs() < 1e-12);
    }
}
