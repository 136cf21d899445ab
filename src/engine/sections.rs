use super::{section_id, Catalog, ConflictIndex, Section, SectionMap, Student};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Derive the fixed section universe from the catalog: two sections per
/// configured subject, `<id>.1` and `<id>.2`, both empty. Equal blocks are
/// rejected upstream at configuration time; re-checked here defensively.
pub fn build_sections(catalog: &Catalog) -> anyhow::Result<SectionMap> {
    let mut map = SectionMap::new();
    for subject in catalog.iter() {
        if subject.block1 == subject.block2 {
            anyhow::bail!(
                "subject {} has both sections on block {}",
                subject.name,
                subject.block1
            );
        }
        for slot in [1u8, 2u8] {
            let id = section_id(&subject.id, slot);
            map.insert(
                id.clone(),
                Section {
                    id,
                    subject_id: subject.id.clone(),
                    slot,
                    block: subject.slot_block(slot),
                    capacity: subject.capacity,
                    occupants: Vec::new(),
                },
            );
        }
    }
    Ok(map)
}

pub fn split_section_id(id: &str) -> Option<(&str, u8)> {
    let (subject_id, slot) = id.rsplit_once('.')?;
    let slot: u8 = slot.parse().ok()?;
    if subject_id.is_empty() || !(1..=2).contains(&slot) {
        return None;
    }
    Some((subject_id, slot))
}

/// Fatal preassignment failures. These abort the whole run: they indicate
/// bad input data, not an unsatisfiable-but-valid scenario, so they are
/// never diagnosed per student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreassignError {
    SectionFull { student: String, section: String },
    UnknownSection { student: String, section: String },
    ConflictingPair { a: String, b: String, section: String },
}

impl PreassignError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SectionFull { .. } => "preassign_full",
            Self::UnknownSection { .. } => "unknown_section",
            Self::ConflictingPair { .. } => "preassign_conflict",
        }
    }
}

impl fmt::Display for PreassignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SectionFull { student, section } => {
                write!(f, "section {} is already full (preassigning {})", section, student)
            }
            Self::UnknownSection { student, section } => {
                write!(f, "unknown section {} (preassigning {})", section, student)
            }
            Self::ConflictingPair { a, b, section } => {
                write!(f, "preassigned students {} and {} conflict in section {}", a, b, section)
            }
        }
    }
}

impl std::error::Error for PreassignError {}

/// Place every preassigned student before anyone else. Two separate passes
/// so capacity and conflict violations surface as distinguishable errors:
/// all placements (with capacity checks) first, then a conflict re-scan of
/// the placed students.
pub fn apply_preassignments(
    sections: &mut SectionMap,
    students: &[Student],
    conflicts: &ConflictIndex,
) -> Result<(), PreassignError> {
    for student in students {
        for id in &student.preassigned {
            let section = sections
                .get_mut(id)
                .ok_or_else(|| PreassignError::UnknownSection {
                    student: student.code.clone(),
                    section: id.clone(),
                })?;
            if section.is_full() {
                return Err(PreassignError::SectionFull {
                    student: student.code.clone(),
                    section: id.clone(),
                });
            }
            section.occupants.push(student.code.clone());
        }
    }

    for student in students {
        for id in &student.preassigned {
            let Some(section) = sections.get(id) else {
                continue;
            };
            for other in &section.occupants {
                if other != &student.code && conflicts.are_conflicting(&student.code, other) {
                    return Err(PreassignError::ConflictingPair {
                        a: student.code.clone(),
                        b: other.clone(),
                        section: id.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// Pre-flight descriptor for a preassigned student whose own fixed sections
/// collide on a block. The UI resolves these one at a time before a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreassignClash {
    pub student_code: String,
    pub student_name: String,
    pub block: i64,
    pub section_ids: Vec<String>,
    pub fixed_sections: Vec<String>,
    pub subjects: Vec<String>,
}

/// Pure check, no mutation: find the first preassigned student with two
/// fixed sections on the same block. Blocks come from the subject config,
/// not from section state, so this runs before any placement.
pub fn detect_preassignment_conflict(
    students: &[Student],
    catalog: &Catalog,
) -> Option<PreassignClash> {
    for student in students {
        if student.preassigned.is_empty() {
            continue;
        }
        let mut by_block: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for id in &student.preassigned {
            let Some((subject_id, slot)) = split_section_id(id) else {
                continue;
            };
            let Some(subject) = catalog.get(subject_id) else {
                continue;
            };
            by_block
                .entry(subject.slot_block(slot))
                .or_default()
                .push(id.clone());
        }
        for (block, ids) in by_block {
            if ids.len() > 1 {
                return Some(PreassignClash {
                    student_code: student.code.clone(),
                    student_name: student.name.clone(),
                    block,
                    section_ids: ids,
                    fixed_sections: student.preassigned.clone(),
                    subjects: student
                        .subjects
                        .iter()
                        .map(|id| catalog.subject_name(id))
                        .collect(),
                });
            }
        }
    }
    None
}
