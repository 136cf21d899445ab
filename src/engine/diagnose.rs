use super::search::{feasible_combinations, Caps};
use super::{section_id, Catalog, ConflictIndex, SectionMap, Student};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Capacity,
    Schedule,
    Conflict,
    Unknown,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockingStudent {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Substitution {
    pub drop: String,
    pub add: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub student_code: String,
    pub student_name: String,
    pub kind: FailureKind,
    pub reason: String,
    pub conflicting_subjects: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocking_students: Vec<BlockingStudent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Substitution>,
    pub enrolled_subjects: Vec<String>,
}

/// Classify why a student has zero feasible combinations. Called only when
/// the strict search came back empty. Checks run in a fixed order: capacity
/// exhaustion, then intrinsic schedule unsatisfiability, then peer conflicts;
/// anything that matches none of the three falls through to Unknown.
pub fn diagnose(
    student: &Student,
    roster: &[Student],
    sections: &SectionMap,
    catalog: &Catalog,
    conflicts: &ConflictIndex,
) -> Diagnosis {
    let enrolled_subjects: Vec<String> = student
        .subjects
        .iter()
        .map(|id| catalog.subject_name(id))
        .collect();
    let base = |kind: FailureKind, reason: String, conflicting: Vec<String>| Diagnosis {
        student_code: student.code.clone(),
        student_name: student.name.clone(),
        kind,
        reason,
        conflicting_subjects: conflicting,
        blocking_students: Vec::new(),
        suggestion: None,
        enrolled_subjects: enrolled_subjects.clone(),
    };

    // 1. A subject with both sections at capacity leaves no way through,
    //    whatever the timetable looks like.
    for subject_id in &student.subjects {
        let s1 = sections.get(&section_id(subject_id, 1));
        let s2 = sections.get(&section_id(subject_id, 2));
        if let (Some(s1), Some(s2)) = (s1, s2) {
            if s1.is_full() && s2.is_full() {
                let name = catalog.subject_name(subject_id);
                return base(
                    FailureKind::Capacity,
                    format!("both sections of {} are full", name),
                    vec![name],
                );
            }
        }
    }

    // 2. Block-uniqueness alone: if even the unconstrained timetable has no
    //    complete assignment, the subject list itself is unsatisfiable.
    let unconstrained = feasible_combinations(student, sections, conflicts, Caps::blocks_only());
    if unconstrained.is_empty() {
        let conflicting = identical_block_pairs(student, catalog);
        let conflicting = if conflicting.is_empty() {
            enrolled_subjects.clone()
        } else {
            conflicting
        };
        return base(
            FailureKind::Schedule,
            format!(
                "the subjects {} cannot be combined on the timetable",
                conflicting.join(", ")
            ),
            conflicting,
        );
    }

    // 3. With real occupancy but the student's own conflict relation
    //    ignored, schedules may exist; if every one of them contains a
    //    common conflicting occupant, that peer is the cause.
    let potential = feasible_combinations(student, sections, conflicts, Caps::ignore_conflicts());
    if !potential.is_empty() {
        if let Some(own) = conflicts.conflicts_of(&student.code) {
            let mut common: Option<BTreeSet<String>> = None;
            for combo in &potential {
                let blockers: BTreeSet<String> = combo
                    .iter()
                    .filter_map(|id| sections.get(id))
                    .flat_map(|s| s.occupants.iter())
                    .filter(|o| own.contains(*o))
                    .cloned()
                    .collect();
                common = Some(match common {
                    None => blockers,
                    Some(prev) => prev.intersection(&blockers).cloned().collect(),
                });
                if common.as_ref().map(|c| c.is_empty()).unwrap_or(false) {
                    break;
                }
            }
            if let Some(common) = common.filter(|c| !c.is_empty()) {
                let blocking: Vec<BlockingStudent> = common
                    .iter()
                    .map(|code| BlockingStudent {
                        code: code.clone(),
                        name: roster
                            .iter()
                            .find(|s| &s.code == code)
                            .map(|s| s.name.clone())
                            .unwrap_or_else(|| code.clone()),
                    })
                    .collect();
                let names = blocking
                    .iter()
                    .map(|b| format!("{} ({})", b.name, b.code))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut diag = base(
                    FailureKind::Conflict,
                    format!("every workable schedule is blocked by {}", names),
                    Vec::new(),
                );
                diag.blocking_students = blocking;
                diag.suggestion = suggest_substitution(student, sections, catalog, conflicts);
                return diag;
            }
        }
    }

    base(
        FailureKind::Unknown,
        "no single cause identified".to_string(),
        Vec::new(),
    )
}

/// Pairs of enrolled subjects offering exactly the same two blocks, i.e. no
/// flexibility between them. Names returned in enrollment order, deduplicated.
fn identical_block_pairs(student: &Student, catalog: &Catalog) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut add = |name: String| {
        if !names.contains(&name) {
            names.push(name);
        }
    };
    for (i, a_id) in student.subjects.iter().enumerate() {
        for b_id in student.subjects.iter().skip(i + 1) {
            let (Some(a), Some(b)) = (catalog.get(a_id), catalog.get(b_id)) else {
                continue;
            };
            let mut a_blocks = [a.block1, a.block2];
            let mut b_blocks = [b.block1, b.block2];
            a_blocks.sort();
            b_blocks.sort();
            if a_blocks == b_blocks {
                add(a.name.clone());
                add(b.name.clone());
            }
        }
    }
    names
}

/// Probe for a corrective swap: drop one enrolled subject (enrollment order),
/// substitute each not-enrolled catalog subject (catalog order), and keep the
/// first replacement under which the full strict search succeeds.
fn suggest_substitution(
    student: &Student,
    sections: &SectionMap,
    catalog: &Catalog,
    conflicts: &ConflictIndex,
) -> Option<Substitution> {
    for (i, drop_id) in student.subjects.iter().enumerate() {
        for candidate in catalog.iter() {
            if student.subjects.iter().any(|s| s == &candidate.id) {
                continue;
            }
            let mut probe = student.clone();
            probe.subjects[i] = candidate.id.clone();
            let combos = feasible_combinations(&probe, sections, conflicts, Caps::strict());
            if !combos.is_empty() {
                return Some(Substitution {
                    drop: catalog.subject_name(drop_id),
                    add: candidate.name.clone(),
                });
            }
        }
    }
    None
}
