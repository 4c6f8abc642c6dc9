//! Typed design-matrix columns

use serde::{Deserialize, Serialize};

use crate::error::{invalid, Result};

/// Estimability code attached to every design column
///
/// Contrasts may only reference columns sharing one positive code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Estimability {
    NotEstimable,
    MainEffect,
    GlobalCovariate,
    GroupCovariate,
    SubjectCovariate,
    ConditionCovariate,
}

impl Estimability {
    pub fn code(self) -> u8 {
        match self {
            Estimability::NotEstimable => 0,
            Estimability::MainEffect => 1,
            Estimability::GlobalCovariate => 2,
            Estimability::GroupCovariate => 3,
            Estimability::SubjectCovariate => 4,
            Estimability::ConditionCovariate => 5,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Estimability::NotEstimable,
            1 => Estimability::MainEffect,
            2 => Estimability::GlobalCovariate,
            3 => Estimability::GroupCovariate,
            4 => Estimability::SubjectCovariate,
            5 => Estimability::ConditionCovariate,
            _ => return Err(invalid(format!("invalid estimability code {}", code))),
        })
    }

    pub fn is_estimable(self) -> bool {
        self != Estimability::NotEstimable
    }
}

/// What a design column models
///
/// Level and covariate fields index the design's group, subject, condition
/// and covariate name lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// All-ones column
    GlobalFactor,
    /// Indicator of a condition, within a group when groups are present
    Condition { group: Option<usize>, condition: usize },
    /// fMRI task regressor of a condition, overwritten by the HRF-convolved boxcar
    Boxcar { group: Option<usize>, condition: usize },
    Subject(usize),
    Group(usize),
    GlobalCovariate { covariate: usize },
    GroupCovariate { covariate: usize, group: usize },
    SubjectCovariate { covariate: usize, subject: usize },
    ConditionCovariate { covariate: usize, condition: usize },
    /// Cosine drift confound restricted to a condition's scans
    HighPass { condition: usize, harmonic: usize },
}

/// Column metadata carried alongside the materialized matrix
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
    pub estimability: Estimability,
}

/// Column under construction: metadata plus one value per observation
#[derive(Clone, Debug)]
pub(crate) struct Column {
    pub info: ColumnInfo,
    pub values: Vec<f64>,
}
