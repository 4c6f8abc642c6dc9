//! JSON snapshot of a design
//!
//! Enumerations are stored as their integer codes and design keys in their
//! delimited form, so a snapshot stays readable by tools that only know the
//! flat layout.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};

use super::builder::{DesignBuilder, DesignState};
use super::column::{Column, ColumnInfo, ColumnKind, Estimability};
use super::hrf::BlockParadigm;
use super::normalization::{CovariateScope, Normalization};
use super::spec::{CellKey, DesignSpec};
use crate::error::{invalid, Result};

/// Persisted column description
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnRecord {
    pub name: String,
    pub estimability: u8,
    pub kind: ColumnKind,
}

/// Serializable state of a [`DesignBuilder`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DesignSnapshot {
    pub fmri: bool,
    pub interscan: Option<f64>,
    pub normalization: u8,
    pub ancova_scope: u8,
    pub age: u8,
    pub estimated: bool,
    pub groups: Vec<String>,
    pub subjects: Vec<String>,
    pub conditions: Vec<String>,
    /// Expected observation count per encoded key
    pub expected: BTreeMap<String, usize>,
    /// Assigned files per encoded key
    pub files: BTreeMap<String, Vec<String>>,
    pub paradigms: BTreeMap<String, BlockParadigm>,
    pub covariates: Vec<String>,
    pub columns: Vec<ColumnRecord>,
    pub rows: usize,
    pub cols: usize,
    /// Design matrix, row-major
    pub matrix: Vec<f64>,
}

impl DesignSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl DesignBuilder {
    /// Capture a built design
    pub fn snapshot(&self) -> Result<DesignSnapshot> {
        if !matches!(self.state, DesignState::MatrixBuilt | DesignState::Estimated) {
            return Err(invalid(format!("only built designs can be saved (state {:?})", self.state)));
        }
        let mut expected = BTreeMap::new();
        let mut files = BTreeMap::new();
        for cell in self.spec.cells() {
            let key = cell.key.encode();
            if cell.expected > 0 {
                expected.insert(key.clone(), cell.expected);
            }
            if !cell.files.is_empty() {
                files.insert(key, cell.files.clone());
            }
        }
        let paradigms = self
            .paradigms
            .iter()
            .map(|(&c, p)| (self.spec.conditions[c].clone(), *p))
            .collect();

        let rows = self.n_rows();
        let cols = self.columns.len();
        let mut matrix = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            matrix.extend(self.columns.iter().map(|c| c.values[r]));
        }

        Ok(DesignSnapshot {
            fmri: self.is_fmri(),
            interscan: self.interscan,
            normalization: self.normalization.code()?,
            ancova_scope: self.ancova_scope.code(),
            age: CovariateScope::age_code(self.age),
            estimated: self.state == DesignState::Estimated,
            groups: self.spec.groups.clone(),
            subjects: self.spec.subjects.clone(),
            conditions: self.spec.conditions.clone(),
            expected,
            files,
            paradigms,
            covariates: self.covariates.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| ColumnRecord {
                    name: c.info.name.clone(),
                    estimability: c.info.estimability.code(),
                    kind: c.info.kind,
                })
                .collect(),
            rows,
            cols,
            matrix,
        })
    }

    /// Restore a design saved with [`DesignBuilder::snapshot`]
    pub fn from_snapshot(snapshot: &DesignSnapshot) -> Result<Self> {
        if snapshot.fmri != snapshot.interscan.is_some() {
            return Err(invalid("fMRI flag and interscan interval disagree"));
        }
        let mut expected = HashMap::new();
        for (key, &count) in &snapshot.expected {
            expected.insert(CellKey::decode(key)?, count);
        }
        let mut spec = DesignSpec::new(
            snapshot.groups.clone(),
            snapshot.subjects.clone(),
            snapshot.conditions.clone(),
            &expected,
        )?;
        for (key, files) in &snapshot.files {
            spec.assign_files(&CellKey::decode(key)?, files.clone())?;
        }

        let rows = spec.total_observations();
        if snapshot.rows != rows || snapshot.cols != snapshot.columns.len() {
            return Err(invalid(format!(
                "snapshot matrix is {}x{} for {} rows and {} columns",
                snapshot.rows,
                snapshot.cols,
                rows,
                snapshot.columns.len()
            )));
        }
        if snapshot.matrix.len() != snapshot.rows * snapshot.cols {
            return Err(invalid(format!(
                "snapshot matrix has {} values, expected {}",
                snapshot.matrix.len(),
                snapshot.rows * snapshot.cols
            )));
        }

        let mut columns = Vec::with_capacity(snapshot.cols);
        for (c, record) in snapshot.columns.iter().enumerate() {
            columns.push(Column {
                info: ColumnInfo {
                    name: record.name.clone(),
                    kind: record.kind,
                    estimability: Estimability::from_code(record.estimability)?,
                },
                values: (0..rows).map(|r| snapshot.matrix[r * snapshot.cols + c]).collect(),
            });
        }

        let mut paradigms = BTreeMap::new();
        for (name, p) in &snapshot.paradigms {
            let c = spec
                .conditions
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| invalid(format!("paradigm for unknown condition '{}'", name)))?;
            paradigms.insert(c, *p);
        }

        let mut builder = DesignBuilder::new();
        builder.spec = spec;
        builder.interscan = snapshot.interscan;
        builder.normalization = Normalization::from_code(snapshot.normalization)?;
        builder.ancova_scope = CovariateScope::from_code(snapshot.ancova_scope)?;
        builder.age = CovariateScope::from_age_code(snapshot.age)?;
        builder.paradigms = paradigms;
        builder.covariates = snapshot.covariates.clone();
        builder.columns = columns;
        builder.state = if snapshot.estimated {
            DesignState::Estimated
        } else {
            DesignState::MatrixBuilt
        };
        debug!("restored design with {} rows and {} columns", rows, snapshot.cols);
        Ok(builder)
    }
}
