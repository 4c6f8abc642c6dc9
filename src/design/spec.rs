//! Hierarchical description of the observations entering a design
//!
//! Observations are grouped by a `(group, subject, condition)` key. Absent
//! levels are stored as empty strings, never omitted, so every key has the
//! same arity. Cells are kept in canonical order (group outermost, condition
//! innermost), which is also the row order of the design matrix.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{invalid, Result, SpmError};

/// Reserved delimiter joining the three key components in persisted form
pub const KEY_DELIMITER: char = '|';

/// `(group, subject, condition)` key of a design cell
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub group: String,
    pub subject: String,
    pub condition: String,
}

impl CellKey {
    pub fn new(group: &str, subject: &str, condition: &str) -> Self {
        Self {
            group: group.to_string(),
            subject: subject.to_string(),
            condition: condition.to_string(),
        }
    }

    /// Join the components with [`KEY_DELIMITER`], keeping empty components
    pub fn encode(&self) -> String {
        format!("{}{d}{}{d}{}", self.group, self.subject, self.condition, d = KEY_DELIMITER)
    }

    /// Fixed-arity inverse of [`CellKey::encode`]
    pub fn decode(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(KEY_DELIMITER).collect();
        if parts.len() != 3 {
            return Err(invalid(format!("design key '{}' does not have three components", s)));
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [&self.group, &self.subject, &self.condition]
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_str())
            .collect();
        if parts.is_empty() {
            write!(f, "all observations")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// The six supported model shapes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelShape {
    OneSample,
    Groups,
    Conditions,
    SubjectsConditions,
    GroupsSubjects,
    GroupsSubjectsConditions,
}

/// One design cell: its level indices, expected observation count and the
/// observation files assigned so far
#[derive(Clone, Debug)]
pub struct Cell {
    pub key: CellKey,
    pub group: Option<usize>,
    pub subject: Option<usize>,
    pub condition: Option<usize>,
    pub expected: usize,
    pub files: Vec<String>,
}

/// Group, subject and condition name lists plus the flat cell table
#[derive(Clone, Debug, Default)]
pub struct DesignSpec {
    pub groups: Vec<String>,
    pub subjects: Vec<String>,
    pub conditions: Vec<String>,
    cells: Vec<Cell>,
    index: HashMap<CellKey, usize>,
}

fn check_names(level: &str, names: &[String]) -> Result<()> {
    for (i, n) in names.iter().enumerate() {
        if n.is_empty() {
            return Err(invalid(format!("{} name #{} is empty", level, i)));
        }
        if n.contains(KEY_DELIMITER) {
            return Err(invalid(format!(
                "{} name '{}' contains the reserved delimiter '{}'",
                level, n, KEY_DELIMITER
            )));
        }
        if names[..i].contains(n) {
            return Err(invalid(format!("duplicate {} name '{}'", level, n)));
        }
    }
    Ok(())
}

fn level_index(level: &str, names: &[String], value: &str) -> Result<Option<usize>> {
    match (names.is_empty(), value.is_empty()) {
        (true, true) => Ok(None),
        (true, false) => Err(invalid(format!("key references {} '{}' but the design has no {} level", level, value, level))),
        (false, true) => Err(invalid(format!("key leaves the {} level empty", level))),
        (false, false) => names
            .iter()
            .position(|n| n == value)
            .map(Some)
            .ok_or_else(|| invalid(format!("unknown {} '{}'", level, value))),
    }
}

impl DesignSpec {
    /// Build the cell table from name lists and expected counts
    ///
    /// Keys missing from `expected` get an expected count of 0 (the
    /// combination is absent from the design).
    pub fn new(
        groups: Vec<String>,
        subjects: Vec<String>,
        conditions: Vec<String>,
        expected: &HashMap<CellKey, usize>,
    ) -> Result<Self> {
        check_names("group", &groups)?;
        check_names("subject", &subjects)?;
        check_names("condition", &conditions)?;

        let mut spec = DesignSpec { groups, subjects, conditions, ..Default::default() };
        spec.shape()?;

        for key in expected.keys() {
            level_index("group", &spec.groups, &key.group)?;
            level_index("subject", &spec.subjects, &key.subject)?;
            level_index("condition", &spec.conditions, &key.condition)?;
        }

        let level = |names: &[String]| -> Vec<Option<usize>> {
            if names.is_empty() {
                vec![None]
            } else {
                (0..names.len()).map(Some).collect()
            }
        };
        let name = |names: &[String], i: Option<usize>| i.map(|i| names[i].clone()).unwrap_or_default();

        for g in level(&spec.groups) {
            for s in level(&spec.subjects) {
                for c in level(&spec.conditions) {
                    let key = CellKey {
                        group: name(&spec.groups, g),
                        subject: name(&spec.subjects, s),
                        condition: name(&spec.conditions, c),
                    };
                    let count = expected.get(&key).copied().unwrap_or(0);
                    spec.index.insert(key.clone(), spec.cells.len());
                    spec.cells.push(Cell {
                        key,
                        group: g,
                        subject: s,
                        condition: c,
                        expected: count,
                        files: Vec::new(),
                    });
                }
            }
        }

        if spec.total_observations() == 0 {
            return Err(invalid("design has no observations"));
        }
        Ok(spec)
    }

    /// Model shape implied by which levels are present
    pub fn shape(&self) -> Result<ModelShape> {
        let (g, s, c) = (!self.groups.is_empty(), !self.subjects.is_empty(), !self.conditions.is_empty());
        match (g, s, c) {
            (false, false, false) => Ok(ModelShape::OneSample),
            (true, false, false) => Ok(ModelShape::Groups),
            (false, false, true) => Ok(ModelShape::Conditions),
            (false, true, true) => Ok(ModelShape::SubjectsConditions),
            (true, true, false) => Ok(ModelShape::GroupsSubjects),
            (true, true, true) => Ok(ModelShape::GroupsSubjectsConditions),
            _ => Err(invalid(format!(
                "unsupported hierarchy (groups: {}, subjects: {}, conditions: {})",
                g, s, c
            ))),
        }
    }

    /// Number of hierarchy levels present
    pub fn levels(&self) -> usize {
        [&self.groups, &self.subjects, &self.conditions]
            .iter()
            .filter(|l| !l.is_empty())
            .count()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, key: &CellKey) -> Option<&Cell> {
        self.index.get(key).map(|&i| &self.cells[i])
    }

    pub fn total_observations(&self) -> usize {
        self.cells.iter().map(|c| c.expected).sum()
    }

    /// Cell of every design row, in row order
    pub fn row_cells(&self) -> Vec<&Cell> {
        self.cells
            .iter()
            .flat_map(|c| std::iter::repeat(c).take(c.expected))
            .collect()
    }

    /// Assign observation files to a cell, replacing earlier assignments
    pub fn assign_files(&mut self, key: &CellKey, files: Vec<String>) -> Result<()> {
        let i = *self
            .index
            .get(key)
            .ok_or_else(|| invalid(format!("unknown design cell '{}'", key.encode())))?;
        let cell = &mut self.cells[i];
        if files.len() > cell.expected {
            return Err(invalid(format!(
                "{} files assigned to '{}', which expects {}",
                files.len(),
                cell.key,
                cell.expected
            )));
        }
        cell.files = files;
        Ok(())
    }

    /// Every cell has exactly its expected number of files
    pub fn check_complete(&self) -> Result<()> {
        for cell in &self.cells {
            if cell.files.len() != cell.expected {
                return Err(SpmError::MissingData(format!(
                    "'{}' has {} of {} observation files assigned",
                    cell.key,
                    cell.files.len(),
                    cell.expected
                )));
            }
        }
        Ok(())
    }

    /// Assigned files in row order
    pub fn files(&self) -> Vec<&str> {
        self.cells
            .iter()
            .flat_map(|c| c.files.iter().map(|f| f.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_key_encoding_keeps_empty_components() {
        let key = CellKey::new("", "s1", "");
        assert_eq!(key.encode(), "|s1|");
        assert_eq!(CellKey::decode("|s1|").unwrap(), key);
        assert_eq!(CellKey::decode("||").unwrap(), CellKey::default());
        assert!(CellKey::decode("a|b").is_err());
        assert!(CellKey::decode("a|b|c|d").is_err());
    }

    #[test]
    fn test_groups_subjects_rows() {
        let mut expected = HashMap::new();
        for g in ["g1", "g2"] {
            for s in ["s1", "s2", "s3"] {
                expected.insert(CellKey::new(g, s, ""), 1);
            }
        }
        let spec = DesignSpec::new(names(&["g1", "g2"]), names(&["s1", "s2", "s3"]), vec![], &expected).unwrap();
        assert_eq!(spec.shape().unwrap(), ModelShape::GroupsSubjects);
        assert_eq!(spec.levels(), 2);
        assert_eq!(spec.total_observations(), 6);
        let rows = spec.row_cells();
        assert_eq!(rows[0].key, CellKey::new("g1", "s1", ""));
        assert_eq!(rows[5].key, CellKey::new("g2", "s3", ""));
    }

    #[test]
    fn test_rejects_bad_names_and_keys() {
        let mut expected = HashMap::new();
        expected.insert(CellKey::new("a|b", "", ""), 1);
        assert!(DesignSpec::new(names(&["a|b"]), vec![], vec![], &expected).is_err());

        let mut expected = HashMap::new();
        expected.insert(CellKey::new("g3", "", ""), 1);
        assert!(DesignSpec::new(names(&["g1"]), vec![], vec![], &expected).is_err());

        assert!(DesignSpec::new(names(&["g1", "g1"]), vec![], vec![], &HashMap::new()).is_err());
        // subjects alone is not a supported shape
        assert!(DesignSpec::new(vec![], names(&["s1"]), vec![], &HashMap::new()).is_err());
    }

    #[test]
    fn test_file_assignment_completeness() {
        let mut expected = HashMap::new();
        expected.insert(CellKey::default(), 2);
        let mut spec = DesignSpec::new(vec![], vec![], vec![], &expected).unwrap();
        assert!(matches!(spec.check_complete(), Err(SpmError::MissingData(_))));

        spec.assign_files(&CellKey::default(), names(&["a.nii"])).unwrap();
        assert!(spec.check_complete().is_err());
        assert!(spec.assign_files(&CellKey::default(), names(&["a", "b", "c"])).is_err());

        spec.assign_files(&CellKey::default(), names(&["a.nii", "b.nii"])).unwrap();
        assert!(spec.check_complete().is_ok());
        assert_eq!(spec.files(), vec!["a.nii", "b.nii"]);
    }
}
