//! Subject roster
//!
//! The roster is static for a session: subjects are loaded once and never
//! removed. The backend streams children 1 through 10 by default.

use crate::error::MonitorError;
use crate::types::{Subject, SubjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Number of subjects in the default classroom
pub const DEFAULT_CLASS_SIZE: SubjectId = 10;

/// Fixed set of monitored subjects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// Display name of the group
    #[serde(default = "default_class_name")]
    pub class_name: String,
    subjects: Vec<Subject>,
}

fn default_class_name() -> String {
    "Class A".to_string()
}

impl Default for Roster {
    fn default() -> Self {
        Self::classroom()
    }
}

impl Roster {
    /// Build a roster, rejecting duplicate ids
    pub fn new(class_name: impl Into<String>, subjects: Vec<Subject>) -> Result<Self, MonitorError> {
        let mut seen = BTreeSet::new();
        for subject in &subjects {
            if !seen.insert(subject.subject_id) {
                return Err(MonitorError::RosterError(format!(
                    "duplicate subject id {}",
                    subject.subject_id
                )));
            }
        }
        Ok(Self {
            class_name: class_name.into(),
            subjects,
        })
    }

    /// The default classroom: subjects 1-10
    pub fn classroom() -> Self {
        Self {
            class_name: default_class_name(),
            subjects: (1..=DEFAULT_CLASS_SIZE)
                .map(|id| Subject {
                    subject_id: id,
                    name: format!("Child {}", id),
                })
                .collect(),
        }
    }

    /// Load a roster from JSON: `{"class_name": "...", "subjects": [{"subject_id": 1, "name": "..."}]}`
    pub fn from_json(json: &str) -> Result<Self, MonitorError> {
        let raw: Roster =
            serde_json::from_str(json).map_err(|e| MonitorError::RosterError(e.to_string()))?;
        Self::new(raw.class_name, raw.subjects)
    }

    pub fn from_file(path: &Path) -> Result<Self, MonitorError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn get(&self, subject_id: SubjectId) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.subject_id == subject_id)
    }

    pub fn contains(&self, subject_id: SubjectId) -> bool {
        self.get(subject_id).is_some()
    }

    /// Display name for `subject_id`, falling back to the id
    pub fn display_name(&self, subject_id: SubjectId) -> String {
        self.get(subject_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("#{}", subject_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subject> {
        self.subjects.iter()
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}
