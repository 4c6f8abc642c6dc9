//! Materialized design matrix and contrast validation

use nalgebra::DMatrix;

use super::column::{ColumnInfo, Estimability};
use crate::error::{invalid, Result};
use crate::linalg;

/// Dense design matrix `(n_observations, n_columns)` with column metadata
#[derive(Clone, Debug, PartialEq)]
pub struct DesignMatrix {
    pub matrix: DMatrix<f64>,
    pub columns: Vec<ColumnInfo>,
}

impl DesignMatrix {
    pub fn new(matrix: DMatrix<f64>, columns: Vec<ColumnInfo>) -> Result<Self> {
        if matrix.ncols() != columns.len() {
            return Err(invalid(format!(
                "design matrix has {} columns but {} column descriptions",
                matrix.ncols(),
                columns.len()
            )));
        }
        Ok(Self { matrix, columns })
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn rank(&self) -> usize {
        linalg::rank(&self.matrix)
    }

    /// Residual degrees of freedom, `rows(X) - rank(X)`
    pub fn degrees_of_freedom(&self) -> usize {
        self.nrows().saturating_sub(self.rank())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Check a contrast and renormalize it
    ///
    /// The contrast must have one weight per column and its non-zero weights
    /// must all fall on columns of a single estimable family. Negative and
    /// positive weights are rescaled separately so they sum to -1 and +1.
    pub fn validate_contrast(&self, contrast: &[f64]) -> Result<Vec<f64>> {
        if contrast.len() != self.ncols() {
            return Err(invalid(format!(
                "contrast has {} weights, design has {} columns",
                contrast.len(),
                self.ncols()
            )));
        }
        if contrast.iter().any(|w| !w.is_finite()) {
            return Err(invalid("contrast weights must be finite"));
        }

        let mut family: Option<Estimability> = None;
        for (w, col) in contrast.iter().zip(self.columns.iter()) {
            if *w == 0.0 {
                continue;
            }
            if !col.estimability.is_estimable() {
                return Err(invalid(format!("contrast references non-estimable column '{}'", col.name)));
            }
            match family {
                None => family = Some(col.estimability),
                Some(f) if f != col.estimability => {
                    return Err(invalid(format!(
                        "contrast mixes estimability families {:?} and {:?}",
                        f, col.estimability
                    )));
                }
                Some(_) => {}
            }
        }
        if family.is_none() {
            return Err(invalid("contrast has no non-zero weight"));
        }

        let neg: f64 = contrast.iter().filter(|&&w| w < 0.0).map(|w| -w).sum();
        let pos: f64 = contrast.iter().filter(|&&w| w > 0.0).sum();
        Ok(contrast
            .iter()
            .map(|&w| {
                if w < 0.0 {
                    w / neg
                } else if w > 0.0 {
                    w / pos
                } else {
                    0.0
                }
            })
            .collect())
    }
}
