pub mod diagnose;
pub mod manual;
pub mod search;
pub mod sections;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// The one block of the day treated as "afternoon" for preference scoring.
/// Every other block counts as morning. This is school policy, not something
/// derived from the timetable, so it stays a named constant.
pub const AFTERNOON_BLOCK: i64 = 4;

/// Penalty for handing an afternoon section to a morning-preference student.
pub const MORNING_PREF_PENALTY: u64 = 10;
/// Penalty for handing a morning section to an afternoon-preference student.
/// Deliberately lighter than the morning penalty.
pub const AFTERNOON_PREF_PENALTY: u64 = 5;

#[derive(Debug, Clone)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub capacity: usize,
    pub block1: i64,
    pub block2: i64,
}

impl Subject {
    pub fn slot_block(&self, slot: u8) -> i64 {
        if slot == 1 {
            self.block1
        } else {
            self.block2
        }
    }
}

/// Immutable subject lookup passed explicitly to every engine operation.
/// Iteration order is the configured catalog order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    subjects: Vec<Subject>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(subjects: Vec<Subject>) -> Self {
        let by_id = subjects
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self { subjects, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&Subject> {
        self.by_id.get(id).map(|&i| &self.subjects[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subject> {
        self.subjects.iter()
    }

    pub fn subject_name(&self, id: &str) -> String {
        self.get(id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub subject_id: String,
    pub slot: u8,
    pub block: i64,
    pub capacity: usize,
    pub occupants: Vec<String>,
}

impl Section {
    pub fn is_full(&self) -> bool {
        self.occupants.len() >= self.capacity
    }
}

/// Keyed by section id; BTreeMap so iteration (and therefore result
/// assembly) is deterministic.
pub type SectionMap = BTreeMap<String, Section>;

pub fn section_id(subject_id: &str, slot: u8) -> String {
    format!("{}.{}", subject_id, slot)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    Morning,
    Afternoon,
}

impl Preference {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(Self::Morning),
            "afternoon" => Some(Self::Afternoon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Student {
    /// Uppercased, trimmed by the import layer.
    pub code: String,
    pub name: String,
    pub course: Option<String>,
    /// Resolved subject ids, in stored enrollment order.
    pub subjects: Vec<String>,
    pub preference: Option<Preference>,
    /// Externally fixed section ids; non-empty means the student bypasses
    /// the competitive search.
    pub preassigned: Vec<String>,
}

/// Symmetric adjacency over student codes: who must never share a section.
#[derive(Debug, Clone, Default)]
pub struct ConflictIndex {
    map: HashMap<String, HashSet<String>>,
}

impl ConflictIndex {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut idx = Self::default();
        for (a, b) in pairs {
            idx.insert_pair(&a, &b);
        }
        idx
    }

    /// Self-pairs and duplicates are tolerated; insertion is idempotent.
    pub fn insert_pair(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.map.entry(a.to_string()).or_default().insert(b.to_string());
        self.map.entry(b.to_string()).or_default().insert(a.to_string());
    }

    pub fn conflicts_of(&self, code: &str) -> Option<&HashSet<String>> {
        self.map.get(code)
    }

    pub fn are_conflicting(&self, a: &str, b: &str) -> bool {
        self.map.get(a).map(|s| s.contains(b)).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Speed,
    Equitable,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "speed" => Some(Self::Speed),
            "equitable" => Some(Self::Equitable),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Equitable => "equitable",
        }
    }
}
