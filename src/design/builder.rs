//! Factorial design construction
//!
//! A design moves through `Empty → ModelDefined → MatrixBuilt → Estimated`.
//! The builder keeps one typed column per regressor and only materializes
//! the dense matrix on request, so appending and inserting columns never
//! resizes a live array.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use nalgebra::DMatrix;

use super::column::{Column, ColumnInfo, ColumnKind, Estimability};
use super::hrf::{cosine_basis, task_regressor, BlockParadigm, HrfParams};
use super::matrix::DesignMatrix;
use super::normalization::{CovariateScope, Normalization};
use super::spec::{Cell, CellKey, DesignSpec, KEY_DELIMITER};
use crate::error::{invalid, Result};

/// Lifecycle of a design
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DesignState {
    Empty,
    ModelDefined,
    MatrixBuilt,
    Estimated,
}

/// Options of [`DesignBuilder::add_covariate`]
#[derive(Clone, Copy, Debug, Default)]
pub struct CovariateOptions {
    pub scope: CovariateScope,
    /// Columns may be referenced by contrasts
    pub estimable: bool,
    /// Centre and scale to unit standard deviation
    pub zscore: bool,
    /// Natural-log transform, applied before z-scoring
    pub log: bool,
}

/// Builds the design matrix of one analysis
#[derive(Clone, Debug)]
pub struct DesignBuilder {
    pub(super) state: DesignState,
    pub(super) spec: DesignSpec,
    /// Interscan interval in seconds; `Some` marks an fMRI design
    pub(super) interscan: Option<f64>,
    pub(super) hrf: HrfParams,
    pub(super) paradigms: BTreeMap<usize, BlockParadigm>,
    pub(super) normalization: Normalization,
    pub(super) ancova_scope: CovariateScope,
    pub(super) age: Option<CovariateScope>,
    pub(super) covariates: Vec<String>,
    pub(super) columns: Vec<Column>,
}

impl Default for DesignBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignBuilder {
    pub fn new() -> Self {
        Self {
            state: DesignState::Empty,
            spec: DesignSpec::default(),
            interscan: None,
            hrf: HrfParams::default(),
            paradigms: BTreeMap::new(),
            normalization: Normalization::None,
            ancova_scope: CovariateScope::Global,
            age: None,
            covariates: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn state(&self) -> DesignState {
        self.state
    }

    pub fn spec(&self) -> &DesignSpec {
        &self.spec
    }

    pub fn is_fmri(&self) -> bool {
        self.interscan.is_some()
    }

    pub fn interscan(&self) -> Option<f64> {
        self.interscan
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn ancova_scope(&self) -> CovariateScope {
        self.ancova_scope
    }

    pub fn age_scope(&self) -> Option<CovariateScope> {
        self.age
    }

    pub fn n_rows(&self) -> usize {
        self.spec.total_observations()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_infos(&self) -> Vec<&ColumnInfo> {
        self.columns.iter().map(|c| &c.info).collect()
    }

    fn require(&self, state: DesignState, action: &str) -> Result<()> {
        if self.state != state {
            return Err(invalid(format!("cannot {} in state {:?} (needs {:?})", action, self.state, state)));
        }
        Ok(())
    }

    /// Mark the design as an fMRI design with the given interscan interval
    pub fn set_fmri(&mut self, interscan: f64) -> Result<()> {
        if !matches!(self.state, DesignState::Empty | DesignState::ModelDefined) {
            return Err(invalid("fMRI mode must be chosen before the matrix is built"));
        }
        if !(interscan > 0.0) {
            return Err(invalid(format!("interscan interval must be positive, got {}", interscan)));
        }
        self.interscan = Some(interscan);
        Ok(())
    }

    pub fn set_hrf_params(&mut self, params: HrfParams) {
        self.hrf = params;
    }

    /// Choose the intensity normalization and, for ANCOVA, its scope
    pub fn set_normalization(&mut self, normalization: Normalization, ancova_scope: CovariateScope) -> Result<()> {
        if self.state == DesignState::Estimated {
            return Err(invalid("design is already estimated"));
        }
        normalization.code()?;
        self.normalization = normalization;
        self.ancova_scope = ancova_scope;
        Ok(())
    }

    /// Define the group/subject/condition hierarchy and expected counts
    pub fn set_hierarchy(
        &mut self,
        groups: Vec<String>,
        subjects: Vec<String>,
        conditions: Vec<String>,
        expected: &HashMap<CellKey, usize>,
    ) -> Result<()> {
        if !matches!(self.state, DesignState::Empty | DesignState::ModelDefined) {
            return Err(invalid("hierarchy cannot change once the matrix is built"));
        }
        let spec = DesignSpec::new(groups, subjects, conditions, expected)?;
        if self.is_fmri() && spec.conditions.is_empty() {
            return Err(invalid("an fMRI design needs at least one condition"));
        }
        info!(
            "design hierarchy {:?}: {} observations in {} cells",
            spec.shape()?,
            spec.total_observations(),
            spec.cells().len()
        );
        self.spec = spec;
        self.state = DesignState::ModelDefined;
        Ok(())
    }

    /// Assign observation files to a design cell
    pub fn assign_files(&mut self, key: &CellKey, files: Vec<String>) -> Result<()> {
        if matches!(self.state, DesignState::Empty | DesignState::Estimated) {
            return Err(invalid(format!("cannot assign files in state {:?}", self.state)));
        }
        self.spec.assign_files(key, files)
    }

    fn level_label(&self, group: Option<usize>, condition: usize) -> String {
        match group {
            Some(g) => format!("{} {}", self.spec.groups[g], self.spec.conditions[condition]),
            None => self.spec.conditions[condition].clone(),
        }
    }

    fn indicator<F>(&self, pred: F) -> Vec<f64>
    where
        F: Fn(&Cell) -> bool,
    {
        self.spec
            .row_cells()
            .iter()
            .map(|c| if pred(c) { 1.0 } else { 0.0 })
            .collect()
    }

    fn push(&mut self, name: String, kind: ColumnKind, estimability: Estimability, values: Vec<f64>) {
        self.columns.push(Column { info: ColumnInfo { name, kind, estimability }, values });
    }

    /// Emit the factorial indicator columns
    ///
    /// Order: condition block (boxcar and session columns for fMRI), then
    /// subjects when at least two levels are present, then groups. A
    /// one-sample design gets a single all-ones global factor.
    pub fn build_design_matrix(&mut self) -> Result<()> {
        self.require(DesignState::ModelDefined, "build the design matrix")?;
        self.columns.clear();
        self.covariates.clear();

        let n = self.n_rows();
        let has_conditions = !self.spec.conditions.is_empty();
        let group_levels: Vec<Option<usize>> = if self.spec.groups.is_empty() {
            vec![None]
        } else {
            (0..self.spec.groups.len()).map(Some).collect()
        };

        if self.spec.levels() == 0 {
            self.push("global factor".to_string(), ColumnKind::GlobalFactor, Estimability::MainEffect, vec![1.0; n]);
        }

        if has_conditions {
            for &g in &group_levels {
                for c in 0..self.spec.conditions.len() {
                    let values = self.indicator(|cell| cell.condition == Some(c) && (g.is_none() || cell.group == g));
                    if values.iter().all(|&v| v == 0.0) {
                        debug!("skipping empty condition cell {}", self.level_label(g, c));
                        continue;
                    }
                    let label = self.level_label(g, c);
                    if self.is_fmri() {
                        self.push(
                            format!("boxcar {}", label),
                            ColumnKind::Boxcar { group: g, condition: c },
                            Estimability::MainEffect,
                            values.clone(),
                        );
                        self.push(label, ColumnKind::Condition { group: g, condition: c }, Estimability::NotEstimable, values);
                    } else {
                        self.push(label, ColumnKind::Condition { group: g, condition: c }, Estimability::MainEffect, values);
                    }
                }
            }
        }

        if self.spec.levels() >= 2 {
            for s in 0..self.spec.subjects.len() {
                let values = self.indicator(|cell| cell.subject == Some(s));
                if values.iter().any(|&v| v != 0.0) {
                    let name = self.spec.subjects[s].clone();
                    self.push(name, ColumnKind::Subject(s), Estimability::NotEstimable, values);
                }
            }
        }

        let group_estimability = if has_conditions {
            Estimability::NotEstimable
        } else {
            Estimability::MainEffect
        };
        for g in 0..self.spec.groups.len() {
            let values = self.indicator(|cell| cell.group == Some(g));
            if values.iter().any(|&v| v != 0.0) {
                let name = self.spec.groups[g].clone();
                self.push(name, ColumnKind::Group(g), group_estimability, values);
            }
        }

        self.state = DesignState::MatrixBuilt;
        info!("design matrix built: {} rows x {} columns", n, self.columns.len());
        Ok(())
    }

    fn condition_index(&self, name: &str) -> Result<usize> {
        self.spec
            .conditions
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| invalid(format!("unknown condition '{}'", name)))
    }

    /// Block paradigm of an fMRI condition
    pub fn set_paradigm(&mut self, condition: &str, paradigm: BlockParadigm) -> Result<()> {
        if !self.is_fmri() {
            return Err(invalid("block paradigms only apply to fMRI designs"));
        }
        if self.state == DesignState::Estimated {
            return Err(invalid("design is already estimated"));
        }
        let c = self.condition_index(condition)?;
        self.paradigms.insert(c, paradigm);
        Ok(())
    }

    pub fn paradigm(&self, condition: &str) -> Option<&BlockParadigm> {
        self.condition_index(condition).ok().and_then(|c| self.paradigms.get(&c))
    }

    /// Overwrite the boxcar column(s) of a condition with its HRF-convolved
    /// task regressor
    pub fn add_hrf_boxcar_to_condition(&mut self, condition: &str) -> Result<()> {
        self.require(DesignState::MatrixBuilt, "add a task regressor")?;
        let interscan = self
            .interscan
            .ok_or_else(|| invalid("task regressors need an fMRI design"))?;
        let c = self.condition_index(condition)?;
        let paradigm = self
            .paradigms
            .get(&c)
            .ok_or_else(|| invalid(format!("no block paradigm set for condition '{}'", condition)))?;
        let regressor = task_regressor(paradigm, interscan, &self.hrf)?;

        let rows = self.spec.row_cells();
        let mut found = false;
        for col in self.columns.iter_mut() {
            let ColumnKind::Boxcar { group, condition: cc } = col.info.kind else {
                continue;
            };
            if cc != c {
                continue;
            }
            found = true;
            let flagged: Vec<usize> = rows
                .iter()
                .enumerate()
                .filter(|(_, cell)| cell.condition == Some(c) && (group.is_none() || cell.group == group))
                .map(|(r, _)| r)
                .collect();
            if flagged.len() != regressor.len() {
                return Err(invalid(format!(
                    "task regressor of '{}' has {} scans but the condition has {} rows",
                    condition,
                    regressor.len(),
                    flagged.len()
                )));
            }
            col.values.iter_mut().for_each(|v| *v = 0.0);
            for (&r, &v) in flagged.iter().zip(regressor.iter()) {
                col.values[r] = v;
            }
        }
        if !found {
            return Err(invalid(format!("no boxcar column for condition '{}'", condition)));
        }
        debug!("HRF-convolved boxcar written for condition '{}'", condition);
        Ok(())
    }

    /// Append cosine drift confounds restricted to a condition's rows, one
    /// per block of its paradigm
    pub fn add_high_pass_to_condition(&mut self, condition: &str) -> Result<()> {
        self.require(DesignState::MatrixBuilt, "add a high-pass basis")?;
        let c = self.condition_index(condition)?;
        let blocks = self
            .paradigms
            .get(&c)
            .map(|p| p.blocks)
            .ok_or_else(|| invalid(format!("no block paradigm set for condition '{}'", condition)))?;
        if self
            .columns
            .iter()
            .any(|col| matches!(col.info.kind, ColumnKind::HighPass { condition, .. } if condition == c))
        {
            return Err(invalid(format!("high-pass basis already added to '{}'", condition)));
        }

        let n = self.n_rows();
        let rows: Vec<usize> = self
            .spec
            .row_cells()
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.condition == Some(c))
            .map(|(r, _)| r)
            .collect();
        let basis = cosine_basis(rows.len(), blocks)?;

        for (h, harmonic) in basis.into_iter().enumerate() {
            let mut values = vec![0.0; n];
            for (&r, v) in rows.iter().zip(harmonic) {
                values[r] = v;
            }
            self.push(
                format!("highpass {} {}", condition, h + 1),
                ColumnKind::HighPass { condition: c, harmonic: h + 1 },
                Estimability::NotEstimable,
                values,
            );
        }
        Ok(())
    }

    /// Add a covariate, one value per observation in row order
    ///
    /// Global covariates are inserted just before the global factor column,
    /// which is created when absent. Scoped covariates are split into one
    /// product column per group, subject or condition.
    pub fn add_covariate(&mut self, name: &str, values: &[f64], options: CovariateOptions) -> Result<()> {
        self.require(DesignState::MatrixBuilt, "add a covariate")?;
        let n = self.n_rows();
        if values.len() != n {
            return Err(invalid(format!(
                "covariate '{}' has {} values, design has {} observations",
                name,
                values.len(),
                n
            )));
        }
        if name.is_empty() || name.contains(KEY_DELIMITER) {
            return Err(invalid(format!("invalid covariate name '{}'", name)));
        }
        if self.covariates.iter().any(|c| c == name) {
            return Err(invalid(format!("covariate '{}' already exists", name)));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(invalid(format!("covariate '{}' has non-finite values", name)));
        }

        let mut v = values.to_vec();
        if options.log {
            if v.iter().any(|&x| x <= 0.0) {
                return Err(invalid(format!("covariate '{}' must be positive for log transform", name)));
            }
            v.iter_mut().for_each(|x| *x = x.ln());
        }
        if options.zscore {
            let mean = v.iter().sum::<f64>() / n as f64;
            let sd = (v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
            if sd == 0.0 {
                return Err(invalid(format!("covariate '{}' is constant and cannot be z-scored", name)));
            }
            v.iter_mut().for_each(|x| *x = (*x - mean) / sd);
        }

        let cov = self.covariates.len();
        let estimability = |e: Estimability| if options.estimable { e } else { Estimability::NotEstimable };
        let rows = self.spec.row_cells();
        let product = |pred: &dyn Fn(&Cell) -> bool| -> Vec<f64> {
            rows.iter().zip(v.iter()).map(|(c, &x)| if pred(c) { x } else { 0.0 }).collect()
        };

        let mut new_columns = Vec::new();
        match options.scope {
            CovariateScope::Global => {}
            CovariateScope::ByGroup => {
                if self.spec.groups.is_empty() {
                    return Err(invalid("by-group covariate in a design without groups"));
                }
                for (g, gname) in self.spec.groups.iter().enumerate() {
                    new_columns.push(Column {
                        info: ColumnInfo {
                            name: format!("{} x {}", name, gname),
                            kind: ColumnKind::GroupCovariate { covariate: cov, group: g },
                            estimability: estimability(Estimability::GroupCovariate),
                        },
                        values: product(&|c: &Cell| c.group == Some(g)),
                    });
                }
            }
            CovariateScope::BySubject => {
                if self.spec.subjects.is_empty() {
                    return Err(invalid("by-subject covariate in a design without subjects"));
                }
                for (s, sname) in self.spec.subjects.iter().enumerate() {
                    new_columns.push(Column {
                        info: ColumnInfo {
                            name: format!("{} x {}", name, sname),
                            kind: ColumnKind::SubjectCovariate { covariate: cov, subject: s },
                            estimability: estimability(Estimability::SubjectCovariate),
                        },
                        values: product(&|c: &Cell| c.subject == Some(s)),
                    });
                }
            }
            CovariateScope::ByCondition => {
                if self.spec.conditions.is_empty() {
                    return Err(invalid("by-condition covariate in a design without conditions"));
                }
                for (ci, cname) in self.spec.conditions.iter().enumerate() {
                    new_columns.push(Column {
                        info: ColumnInfo {
                            name: format!("{} x {}", name, cname),
                            kind: ColumnKind::ConditionCovariate { covariate: cov, condition: ci },
                            estimability: estimability(Estimability::ConditionCovariate),
                        },
                        values: product(&|c: &Cell| c.condition == Some(ci)),
                    });
                }
            }
        }

        if options.scope == CovariateScope::Global {
            let col = Column {
                info: ColumnInfo {
                    name: name.to_string(),
                    kind: ColumnKind::GlobalCovariate { covariate: cov },
                    estimability: estimability(Estimability::GlobalCovariate),
                },
                values: v,
            };
            match self.columns.iter().position(|c| c.info.kind == ColumnKind::GlobalFactor) {
                Some(pos) => self.columns.insert(pos, col),
                None => {
                    self.columns.push(col);
                    self.push("global factor".to_string(), ColumnKind::GlobalFactor, Estimability::NotEstimable, vec![1.0; n]);
                }
            }
        } else {
            // drop product columns with no rows (absent level combinations)
            self.columns
                .extend(new_columns.into_iter().filter(|c| c.values.iter().any(|&x| x != 0.0)));
        }

        self.covariates.push(name.to_string());
        debug!("covariate '{}' added with scope {:?}", name, options.scope);
        Ok(())
    }

    /// Add subject age as a z-scored, non-estimable confound
    pub fn add_age_covariate(&mut self, ages: &[f64], scope: CovariateScope) -> Result<()> {
        self.add_covariate(
            "age",
            ages,
            CovariateOptions { scope, estimable: false, zscore: true, log: false },
        )?;
        self.age = Some(scope);
        Ok(())
    }

    /// Add the per-observation global signal as the ANCOVA confound
    pub fn add_global_signal_covariate(&mut self, globals: &[f64]) -> Result<()> {
        if !matches!(self.normalization, Normalization::Ancova(_)) {
            return Err(invalid("global signal covariate requires ANCOVA normalization"));
        }
        self.add_covariate(
            "global signal",
            globals,
            CovariateOptions { scope: self.ancova_scope, estimable: false, zscore: true, log: false },
        )
    }

    pub fn has_covariate(&self, name: &str) -> bool {
        self.covariates.iter().any(|c| c == name)
    }

    /// Materialize the dense design matrix
    pub fn design_matrix(&self) -> Result<DesignMatrix> {
        if !matches!(self.state, DesignState::MatrixBuilt | DesignState::Estimated) {
            return Err(invalid(format!("design matrix not built (state {:?})", self.state)));
        }
        let n = self.n_rows();
        let x = DMatrix::from_fn(n, self.columns.len(), |r, c| self.columns[c].values[r]);
        DesignMatrix::new(x, self.columns.iter().map(|c| c.info.clone()).collect())
    }

    /// Check and renormalize a contrast against the current columns
    pub fn validate_contrast(&self, contrast: &[f64]) -> Result<Vec<f64>> {
        self.design_matrix()?.validate_contrast(contrast)
    }

    /// Freeze the design; called when estimation starts
    pub fn mark_estimated(&mut self) -> Result<()> {
        if !matches!(self.state, DesignState::MatrixBuilt | DesignState::Estimated) {
            return Err(invalid(format!("cannot estimate a design in state {:?}", self.state)));
        }
        self.state = DesignState::Estimated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn col(d: &DesignMatrix, c: usize) -> Vec<f64> {
        d.matrix.column(c).iter().copied().collect()
    }

    fn one_sample(n: usize) -> DesignBuilder {
        let mut expected = HashMap::new();
        expected.insert(CellKey::default(), n);
        let mut b = DesignBuilder::new();
        b.set_hierarchy(vec![], vec![], vec![], &expected).unwrap();
        b.build_design_matrix().unwrap();
        b
    }

    fn groups_subjects() -> DesignBuilder {
        let mut expected = HashMap::new();
        for g in ["g1", "g2"] {
            for s in ["s1", "s2", "s3"] {
                expected.insert(CellKey::new(g, s, ""), 1);
            }
        }
        let mut b = DesignBuilder::new();
        b.set_hierarchy(names(&["g1", "g2"]), names(&["s1", "s2", "s3"]), vec![], &expected).unwrap();
        b.build_design_matrix().unwrap();
        b
    }

    #[test]
    fn test_one_sample_design() {
        let b = one_sample(5);
        let d = b.design_matrix().unwrap();
        assert_eq!((d.nrows(), d.ncols()), (5, 1));
        assert!(d.matrix.iter().all(|&v| v == 1.0));
        assert_eq!(d.columns[0].estimability, Estimability::MainEffect);
        assert_eq!(d.columns[0].kind, ColumnKind::GlobalFactor);
    }

    #[test]
    fn test_groups_subjects_design() {
        let b = groups_subjects();
        let d = b.design_matrix().unwrap();
        assert_eq!((d.nrows(), d.ncols()), (6, 5));
        let kinds: Vec<ColumnKind> = d.columns.iter().map(|c| c.kind).collect();
        assert_eq!(kinds[..3], [ColumnKind::Subject(0), ColumnKind::Subject(1), ColumnKind::Subject(2)]);
        assert_eq!(kinds[3..], [ColumnKind::Group(0), ColumnKind::Group(1)]);
        for r in 0..6 {
            // one subject and one group indicator per row
            assert_eq!(d.matrix.row(r).sum(), 2.0);
        }
        // row 4 is (g2, s2)
        assert_eq!(d.matrix[(4, 1)], 1.0);
        assert_eq!(d.matrix[(4, 4)], 1.0);
        assert_eq!(d.columns[3].estimability, Estimability::MainEffect);
        assert_eq!(d.columns[0].estimability, Estimability::NotEstimable);
    }

    #[test]
    fn test_subjects_conditions_design() {
        let mut expected = HashMap::new();
        for s in ["s1", "s2"] {
            for c in ["rest", "task"] {
                expected.insert(CellKey::new("", s, c), 2);
            }
        }
        let mut b = DesignBuilder::new();
        b.set_hierarchy(vec![], names(&["s1", "s2"]), names(&["rest", "task"]), &expected).unwrap();
        b.build_design_matrix().unwrap();
        let d = b.design_matrix().unwrap();
        assert_eq!((d.nrows(), d.ncols()), (8, 4));
        assert_eq!(d.columns[0].name, "rest");
        assert_eq!(d.columns[2].name, "s1");
        // rows: s1 rest, s1 rest, s1 task, s1 task, s2 rest ...
        assert_eq!(col(&d, 1).as_slice(), &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
        let c = d.validate_contrast(&[-1.0, 1.0, 0.0, 0.0]).unwrap();
        assert_eq!(c, vec![-1.0, 1.0, 0.0, 0.0]);
        assert!(d.validate_contrast(&[0.0, 1.0, 1.0, 0.0]).is_err());
    }

    #[test]
    fn test_groups_subjects_conditions_uses_group_condition_cells() {
        let mut expected = HashMap::new();
        expected.insert(CellKey::new("g1", "s1", "a"), 1);
        expected.insert(CellKey::new("g1", "s1", "b"), 1);
        expected.insert(CellKey::new("g2", "s2", "a"), 1);
        expected.insert(CellKey::new("g2", "s2", "b"), 1);
        let mut b = DesignBuilder::new();
        b.set_hierarchy(names(&["g1", "g2"]), names(&["s1", "s2"]), names(&["a", "b"]), &expected).unwrap();
        b.build_design_matrix().unwrap();
        let d = b.design_matrix().unwrap();
        let names: Vec<&str> = d.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["g1 a", "g1 b", "g2 a", "g2 b", "s1", "s2", "g1", "g2"]);
        assert_eq!(d.columns[6].estimability, Estimability::NotEstimable);
    }

    #[test]
    fn test_state_machine_guards() {
        let mut b = DesignBuilder::new();
        assert!(b.build_design_matrix().is_err());
        assert!(b.design_matrix().is_err());
        let mut b = one_sample(3);
        assert!(b.build_design_matrix().is_err());
        b.mark_estimated().unwrap();
        assert!(b.add_covariate("x", &[1.0, 2.0, 3.0], CovariateOptions::default()).is_err());
        assert!(b.set_fmri(2.0).is_err());
    }

    #[test]
    fn test_global_covariate_inserted_before_global_factor() {
        let mut b = one_sample(4);
        b.add_covariate(
            "dose",
            &[1.0, 2.0, 3.0, 4.0],
            CovariateOptions { estimable: true, ..Default::default() },
        )
        .unwrap();
        let d = b.design_matrix().unwrap();
        assert_eq!(d.columns[0].name, "dose");
        assert_eq!(d.columns[0].estimability, Estimability::GlobalCovariate);
        assert_eq!(d.columns[1].kind, ColumnKind::GlobalFactor);
        assert_eq!(col(&d, 0).as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_global_covariate_appends_global_factor() {
        let mut b = groups_subjects();
        b.add_covariate(
            "iq",
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            CovariateOptions { zscore: true, ..Default::default() },
        )
        .unwrap();
        let d = b.design_matrix().unwrap();
        assert_eq!(d.ncols(), 7);
        assert_eq!(d.columns[5].name, "iq");
        assert_eq!(d.columns[5].estimability, Estimability::NotEstimable);
        assert_eq!(d.columns[6].kind, ColumnKind::GlobalFactor);
        let col = d.matrix.column(5);
        assert!(col.sum().abs() < 1e-12);
        let var = col.iter().map(|x| x * x).sum::<f64>() / 6.0;
        assert!((var - 1.0).abs() < 1e-12);

        // a second global covariate goes before the existing global factor
        b.add_covariate("weight", &[3.0; 6], CovariateOptions::default()).unwrap();
        let d = b.design_matrix().unwrap();
        assert_eq!(d.columns[6].name, "weight");
        assert_eq!(d.columns[7].kind, ColumnKind::GlobalFactor);
    }

    #[test]
    fn test_scoped_covariate_products() {
        let mut b = groups_subjects();
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        b.add_covariate(
            "score",
            &values,
            CovariateOptions { scope: CovariateScope::ByGroup, estimable: true, ..Default::default() },
        )
        .unwrap();
        let d = b.design_matrix().unwrap();
        assert_eq!(d.ncols(), 7);
        assert_eq!(d.columns[5].name, "score x g1");
        assert_eq!(col(&d, 5).as_slice(), &[1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
        assert_eq!(col(&d, 6).as_slice(), &[0.0, 0.0, 0.0, 4.0, 5.0, 6.0]);
        assert_eq!(d.columns[6].estimability, Estimability::GroupCovariate);
    }

    #[test]
    fn test_covariate_validation() {
        let mut b = groups_subjects();
        assert!(b.add_covariate("short", &[1.0; 5], CovariateOptions::default()).is_err());
        assert!(b
            .add_covariate("neg", &[-1.0, 1.0, 2.0, 3.0, 4.0, 5.0], CovariateOptions { log: true, ..Default::default() })
            .is_err());
        assert!(b.add_covariate("flat", &[2.0; 6], CovariateOptions { zscore: true, ..Default::default() }).is_err());
        assert!(b
            .add_covariate("c", &[1.0; 6], CovariateOptions { scope: CovariateScope::ByCondition, ..Default::default() })
            .is_err());
        b.add_covariate("ok", &[1.0; 6], CovariateOptions::default()).unwrap();
        assert!(b.add_covariate("ok", &[1.0; 6], CovariateOptions::default()).is_err());
    }

    #[test]
    fn test_log_then_zscore() {
        let mut b = one_sample(3);
        let e = std::f64::consts::E;
        b.add_covariate("x", &[1.0, e, e * e], CovariateOptions { log: true, zscore: true, ..Default::default() })
            .unwrap();
        let d = b.design_matrix().unwrap();
        let sd = (2.0f64 / 3.0).sqrt();
        assert!((d.matrix[(0, 0)] + 1.0 / sd).abs() < 1e-12);
        assert!(d.matrix[(1, 0)].abs() < 1e-12);
    }

    fn fmri_design() -> DesignBuilder {
        let mut expected = HashMap::new();
        expected.insert(CellKey::new("", "", "run1"), 12);
        expected.insert(CellKey::new("", "", "run2"), 8);
        let mut b = DesignBuilder::new();
        b.set_fmri(2.0).unwrap();
        b.set_hierarchy(vec![], vec![], names(&["run1", "run2"]), &expected).unwrap();
        b.build_design_matrix().unwrap();
        b
    }

    #[test]
    fn test_fmri_boxcar_columns() {
        let mut b = fmri_design();
        let d = b.design_matrix().unwrap();
        let names: Vec<&str> = d.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["boxcar run1", "run1", "boxcar run2", "run2"]);
        assert_eq!(d.columns[0].estimability, Estimability::MainEffect);
        assert_eq!(d.columns[1].estimability, Estimability::NotEstimable);

        b.set_paradigm("run1", BlockParadigm { first_active_scan: 0, active_scans: 3, rest_scans: 3, blocks: 2 })
            .unwrap();
        b.add_hrf_boxcar_to_condition("run1").unwrap();
        let d = b.design_matrix().unwrap();
        let col = d.matrix.column(0);
        assert_eq!(col[0], 0.0);
        assert!(col[2] > 0.0);
        // rows of run2 stay zero
        assert!(col.iter().skip(12).all(|&v| v == 0.0));
    }

    #[test]
    fn test_fmri_boxcar_length_mismatch() {
        let mut b = fmri_design();
        b.set_paradigm("run2", BlockParadigm { first_active_scan: 1, active_scans: 3, rest_scans: 3, blocks: 2 })
            .unwrap();
        assert!(b.add_hrf_boxcar_to_condition("run2").is_err());
        assert!(b.add_hrf_boxcar_to_condition("run1").is_err());
        assert!(b.add_hrf_boxcar_to_condition("run3").is_err());
    }

    #[test]
    fn test_high_pass_columns() {
        let mut b = fmri_design();
        b.set_paradigm("run2", BlockParadigm { first_active_scan: 0, active_scans: 2, rest_scans: 2, blocks: 2 })
            .unwrap();
        b.add_high_pass_to_condition("run2").unwrap();
        let d = b.design_matrix().unwrap();
        assert_eq!(d.ncols(), 6);
        assert_eq!(d.columns[4].kind, ColumnKind::HighPass { condition: 1, harmonic: 1 });
        assert_eq!(d.columns[5].estimability, Estimability::NotEstimable);
        let col = d.matrix.column(4);
        assert!(col.iter().take(12).all(|&v| v == 0.0));
        assert!((col[12] - 1.0).abs() < 1e-12);
        assert!((col[19] + 1.0).abs() < 1e-12);
        assert!(b.add_high_pass_to_condition("run2").is_err());
    }

    #[test]
    fn test_fmri_requires_conditions() {
        let mut expected = HashMap::new();
        expected.insert(CellKey::default(), 4);
        let mut b = DesignBuilder::new();
        b.set_fmri(2.0).unwrap();
        assert!(b.set_hierarchy(vec![], vec![], vec![], &expected).is_err());
    }

    #[test]
    fn test_ancova_covariate_requires_mode() {
        let mut b = one_sample(3);
        assert!(b.add_global_signal_covariate(&[1.0, 2.0, 3.0]).is_err());
        b.set_normalization(
            Normalization::Ancova(crate::design::normalization::GlobalSignal::Mean),
            CovariateScope::Global,
        )
        .unwrap();
        b.add_global_signal_covariate(&[1.0, 2.0, 3.0]).unwrap();
        assert!(b.has_covariate("global signal"));
    }
}
