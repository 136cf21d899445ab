use super::diagnose::{self, Diagnosis};
use super::{
    section_id, Catalog, ConflictIndex, Preference, SectionMap, Strategy, Student,
    AFTERNOON_BLOCK, AFTERNOON_PREF_PENALTY, MORNING_PREF_PENALTY,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Which constraints the backtracking search enforces. The strict search and
/// the diagnoser's relaxed re-runs share one implementation so their
/// block/ordering semantics can never diverge.
#[derive(Debug, Clone, Copy)]
pub struct Caps {
    pub enforce_capacity: bool,
    pub enforce_conflicts: bool,
}

impl Caps {
    pub fn strict() -> Self {
        Self {
            enforce_capacity: true,
            enforce_conflicts: true,
        }
    }

    /// Block-uniqueness only.
    pub fn blocks_only() -> Self {
        Self {
            enforce_capacity: false,
            enforce_conflicts: false,
        }
    }

    /// Real occupancy, but ignoring the student's own conflict relation.
    pub fn ignore_conflicts() -> Self {
        Self {
            enforce_capacity: true,
            enforce_conflicts: false,
        }
    }
}

/// Enumerate every complete assignment for one student: depth-first over the
/// subjects in enrollment order, slot 1 tried before slot 2. Exhaustive, not
/// first-match: the cost evaluator needs the full candidate set. Pure with
/// respect to the section state it is given.
pub fn feasible_combinations(
    student: &Student,
    sections: &SectionMap,
    conflicts: &ConflictIndex,
    caps: Caps,
) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    let mut chosen: Vec<String> = Vec::with_capacity(student.subjects.len());
    let mut used_blocks: Vec<i64> = Vec::with_capacity(student.subjects.len());
    extend(
        student,
        sections,
        conflicts,
        caps,
        0,
        &mut used_blocks,
        &mut chosen,
        &mut out,
    );
    out
}

#[allow(clippy::too_many_arguments)]
fn extend(
    student: &Student,
    sections: &SectionMap,
    conflicts: &ConflictIndex,
    caps: Caps,
    depth: usize,
    used_blocks: &mut Vec<i64>,
    chosen: &mut Vec<String>,
    out: &mut Vec<Vec<String>>,
) {
    if depth == student.subjects.len() {
        out.push(chosen.clone());
        return;
    }
    let subject_id = &student.subjects[depth];
    let own_conflicts = conflicts.conflicts_of(&student.code);

    for slot in [1u8, 2u8] {
        let id = section_id(subject_id, slot);
        // An unconfigured subject has no sections, so no branch ever reaches
        // completion through it.
        let Some(section) = sections.get(&id) else {
            continue;
        };
        if used_blocks.contains(&section.block) {
            continue;
        }
        if caps.enforce_capacity && section.is_full() {
            continue;
        }
        if caps.enforce_conflicts {
            if let Some(own) = own_conflicts {
                if section.occupants.iter().any(|o| own.contains(o)) {
                    continue;
                }
            }
        }
        used_blocks.push(section.block);
        chosen.push(id);
        extend(
            student,
            sections,
            conflicts,
            caps,
            depth + 1,
            used_blocks,
            chosen,
            out,
        );
        chosen.pop();
        used_blocks.pop();
    }
}

/// Occupant counts per section, captured once per student so every candidate
/// is judged against the same baseline.
pub fn occupancy_snapshot(sections: &SectionMap) -> HashMap<String, usize> {
    sections
        .iter()
        .map(|(id, s)| (id.clone(), s.occupants.len()))
        .collect()
}

/// Score one feasible combination. Base cost is the occupant count per chosen
/// section, linear under "speed" and squared under "equitable"; the
/// preference penalty is additive and strategy-independent.
pub fn combination_cost(
    combo: &[String],
    sections: &SectionMap,
    counts: &HashMap<String, usize>,
    preference: Option<Preference>,
    strategy: Strategy,
) -> u64 {
    let mut cost = 0u64;
    for id in combo {
        let count = counts.get(id).copied().unwrap_or(0) as u64;
        cost += match strategy {
            Strategy::Speed => count,
            Strategy::Equitable => count * count,
        };
        let Some(section) = sections.get(id) else {
            continue;
        };
        let afternoon = section.block == AFTERNOON_BLOCK;
        cost += match preference {
            Some(Preference::Morning) if afternoon => MORNING_PREF_PENALTY,
            Some(Preference::Afternoon) if !afternoon => AFTERNOON_PREF_PENALTY,
            _ => 0,
        };
    }
    cost
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAssignment {
    pub code: String,
    pub name: String,
    pub course: String,
    pub subjects: Vec<String>,
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub students: usize,
    pub enrollments: usize,
    pub assigned: usize,
    pub unassigned: usize,
    pub combinations_examined: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub assignments: Vec<StudentAssignment>,
    pub failures: Vec<Diagnosis>,
    pub stats: RunStats,
}

/// Sequential greedy assignment: students strictly in roster order, each
/// committed (or diagnosed) before the next is looked at. Processing order
/// materially affects who gets preferred sections; that bias is accepted,
/// there is no cross-student backtracking.
pub fn schedule_remaining(
    students: &[Student],
    sections: &mut SectionMap,
    conflicts: &ConflictIndex,
    catalog: &Catalog,
    strategy: Strategy,
) -> RunOutcome {
    let mut failures: Vec<Diagnosis> = Vec::new();
    let mut combinations_examined = 0u64;

    for student in students {
        // Preassigned students were placed by the applier already.
        if !student.preassigned.is_empty() {
            continue;
        }
        // Nothing resolvable to enroll in: neither assigned nor diagnosed.
        if student.subjects.is_empty() {
            continue;
        }

        let combos = feasible_combinations(student, sections, conflicts, Caps::strict());
        combinations_examined += combos.len() as u64;

        if combos.is_empty() {
            failures.push(diagnose::diagnose(student, students, sections, catalog, conflicts));
            continue;
        }

        let counts = occupancy_snapshot(sections);
        let mut best: Option<(usize, u64)> = None;
        for (i, combo) in combos.iter().enumerate() {
            let cost = combination_cost(combo, sections, &counts, student.preference, strategy);
            // Strict < keeps the first-found combination on ties; enumeration
            // order is the reproducibility contract.
            match best {
                Some((_, c)) if cost >= c => {}
                _ => best = Some((i, cost)),
            }
        }
        if let Some((i, _)) = best {
            for id in &combos[i] {
                if let Some(section) = sections.get_mut(id) {
                    section.occupants.push(student.code.clone());
                }
            }
        }
    }

    assemble(students, sections, catalog, failures, combinations_examined)
}

/// Build the run result from the final section state. Also reused after a
/// manual override to refresh the records the UI holds.
pub fn assemble(
    students: &[Student],
    sections: &SectionMap,
    catalog: &Catalog,
    failures: Vec<Diagnosis>,
    combinations_examined: u64,
) -> RunOutcome {
    let assigned_codes: BTreeSet<&str> = sections
        .values()
        .flat_map(|s| s.occupants.iter().map(|c| c.as_str()))
        .collect();

    let mut assignments = Vec::new();
    for student in students {
        if !assigned_codes.contains(student.code.as_str()) {
            continue;
        }
        // Students without a resolvable course occupy sections and count as
        // assigned, but are left out of the records. Longstanding behavior;
        // the UI relies on it staying this way.
        let Some(course) = student.course.clone() else {
            continue;
        };
        let mut section_ids: Vec<String> = sections
            .values()
            .filter(|s| s.occupants.iter().any(|c| c == &student.code))
            .map(|s| s.id.clone())
            .collect();
        section_ids.sort();
        assignments.push(StudentAssignment {
            code: student.code.clone(),
            name: student.name.clone(),
            course,
            subjects: student
                .subjects
                .iter()
                .map(|id| catalog.subject_name(id))
                .collect(),
            sections: section_ids,
        });
    }

    let stats = RunStats {
        students: students.len(),
        enrollments: students.iter().map(|s| s.subjects.len()).sum(),
        assigned: assigned_codes.len(),
        unassigned: failures.len(),
        combinations_examined,
    };

    RunOutcome {
        assignments,
        failures,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sections::build_sections;
    use crate::engine::testutil::{student, subject};

    fn catalog() -> Catalog {
        Catalog::new(vec![
            subject("MATH", 3, 1, 2),
            subject("SCI", 3, 2, 3),
            subject("ART", 3, 1, 4),
        ])
    }

    fn push(sections: &mut SectionMap, id: &str, codes: &[&str]) {
        let s = sections.get_mut(id).expect(id);
        for c in codes {
            s.occupants.push(c.to_string());
        }
    }

    #[test]
    fn search_enumerates_all_valid_combinations_in_slot_order() {
        let catalog = catalog();
        let sections = build_sections(&catalog).expect("build");
        let s = student("A1", &["MATH", "SCI"]);
        let combos =
            feasible_combinations(&s, &sections, &ConflictIndex::default(), Caps::strict());
        // MATH.1+SCI.1 (1,2), MATH.1+SCI.2 (1,3), MATH.2+SCI.1 blocked (2,2),
        // MATH.2+SCI.2 (2,3).
        assert_eq!(
            combos,
            vec![
                vec!["MATH.1".to_string(), "SCI.1".to_string()],
                vec!["MATH.1".to_string(), "SCI.2".to_string()],
                vec!["MATH.2".to_string(), "SCI.2".to_string()],
            ]
        );
    }

    #[test]
    fn search_never_reuses_a_block() {
        let catalog = catalog();
        let sections = build_sections(&catalog).expect("build");
        let s = student("A1", &["MATH", "SCI", "ART"]);
        let combos =
            feasible_combinations(&s, &sections, &ConflictIndex::default(), Caps::strict());
        assert!(!combos.is_empty());
        for combo in &combos {
            let mut blocks: Vec<i64> = combo
                .iter()
                .map(|id| sections.get(id).expect(id).block)
                .collect();
            blocks.sort();
            blocks.dedup();
            assert_eq!(blocks.len(), combo.len(), "blocks reused in {:?}", combo);
        }
    }

    #[test]
    fn capacity_and_conflict_caps_relax_independently() {
        let catalog = catalog();
        let mut sections = build_sections(&catalog).expect("build");
        push(&mut sections, "MATH.1", &["X1", "X2", "X3"]);
        push(&mut sections, "MATH.2", &["Y1"]);
        let mut idx = ConflictIndex::default();
        idx.insert_pair("A1", "Y1");
        let s = student("A1", &["MATH"]);

        let strict = feasible_combinations(&s, &sections, &idx, Caps::strict());
        assert!(strict.is_empty(), "MATH.1 full, MATH.2 blocked by Y1");

        let no_conf = feasible_combinations(&s, &sections, &idx, Caps::ignore_conflicts());
        assert_eq!(no_conf, vec![vec!["MATH.2".to_string()]]);

        let blocks_only = feasible_combinations(&s, &sections, &idx, Caps::blocks_only());
        assert_eq!(blocks_only.len(), 2);
    }

    #[test]
    fn search_is_pure_and_repeatable() {
        let catalog = catalog();
        let mut sections = build_sections(&catalog).expect("build");
        push(&mut sections, "MATH.1", &["X1"]);
        let s = student("A1", &["MATH", "ART"]);
        let idx = ConflictIndex::default();
        let first = feasible_combinations(&s, &sections, &idx, Caps::strict());
        let second = feasible_combinations(&s, &sections, &idx, Caps::strict());
        assert_eq!(first, second);
    }

    #[test]
    fn two_students_split_a_capacity_one_subject() {
        let catalog = Catalog::new(vec![subject("X", 1, 1, 2)]);
        let mut sections = build_sections(&catalog).expect("build");
        let roster = vec![student("A1", &["X"]), student("A2", &["X"])];
        let outcome = schedule_remaining(
            &roster,
            &mut sections,
            &ConflictIndex::default(),
            &catalog,
            Strategy::Speed,
        );
        assert_eq!(outcome.failures.len(), 0);
        assert_eq!(outcome.stats.assigned, 2);
        assert_eq!(sections.get("X.1").expect("X.1").occupants, vec!["A1"]);
        assert_eq!(sections.get("X.2").expect("X.2").occupants, vec!["A2"]);
    }

    #[test]
    fn equitable_flattens_where_speed_tolerates_a_full_section() {
        // MATH blocks (1,2), SCI blocks (2,3). Occupancy: MATH.1=3, MATH.2=2,
        // SCI.1=0, SCI.2=2. Candidate costs:
        //   speed:     M1+S1=3, M1+S2=5, M2+S2=4  -> MATH.1+SCI.1
        //   equitable: 9, 13, 8                   -> MATH.2+SCI.2
        let catalog = Catalog::new(vec![subject("MATH", 10, 1, 2), subject("SCI", 10, 2, 3)]);
        let mut sections = build_sections(&catalog).expect("build");
        push(&mut sections, "MATH.1", &["X1", "X2", "X3"]);
        push(&mut sections, "MATH.2", &["Y1", "Y2"]);
        push(&mut sections, "SCI.2", &["Z1", "Z2"]);

        let mut speed_sections = sections.clone();
        let outcome = schedule_remaining(
            &[student("A1", &["MATH", "SCI"])],
            &mut speed_sections,
            &ConflictIndex::default(),
            &catalog,
            Strategy::Speed,
        );
        assert_eq!(outcome.assignments[0].sections, vec!["MATH.1", "SCI.1"]);

        let outcome = schedule_remaining(
            &[student("A1", &["MATH", "SCI"])],
            &mut sections,
            &ConflictIndex::default(),
            &catalog,
            Strategy::Equitable,
        );
        assert_eq!(outcome.assignments[0].sections, vec!["MATH.2", "SCI.2"]);
    }

    #[test]
    fn preference_penalties_are_asymmetric() {
        // ART.2 sits on the afternoon block.
        let catalog = Catalog::new(vec![subject("ART", 10, 1, AFTERNOON_BLOCK)]);
        let sections = build_sections(&catalog).expect("build");
        let counts = occupancy_snapshot(&sections);

        let morning_cost = combination_cost(
            &["ART.2".to_string()],
            &sections,
            &counts,
            Some(Preference::Morning),
            Strategy::Speed,
        );
        let afternoon_cost = combination_cost(
            &["ART.1".to_string()],
            &sections,
            &counts,
            Some(Preference::Afternoon),
            Strategy::Speed,
        );
        let none_cost = combination_cost(
            &["ART.2".to_string()],
            &sections,
            &counts,
            None,
            Strategy::Speed,
        );
        assert_eq!(morning_cost, MORNING_PREF_PENALTY);
        assert_eq!(afternoon_cost, AFTERNOON_PREF_PENALTY);
        assert_eq!(none_cost, 0);
        assert!(morning_cost > afternoon_cost);
    }

    #[test]
    fn preference_steers_commit_toward_preferred_block() {
        let catalog = Catalog::new(vec![subject("ART", 10, 1, AFTERNOON_BLOCK)]);
        let mut sections = build_sections(&catalog).expect("build");
        // ART.1 (morning) already has two occupants, ART.2 is empty; the
        // count difference (2) is smaller than the morning penalty (10).
        push(&mut sections, "ART.1", &["X1", "X2"]);
        let mut s = student("A1", &["ART"]);
        s.preference = Some(Preference::Morning);
        let outcome = schedule_remaining(
            &[s],
            &mut sections,
            &ConflictIndex::default(),
            &catalog,
            Strategy::Speed,
        );
        assert_eq!(outcome.assignments[0].sections, vec!["ART.1"]);
    }

    #[test]
    fn commits_are_deterministic_across_runs() {
        let catalog = catalog();
        let base = build_sections(&catalog).expect("build");
        let roster = vec![
            student("A1", &["MATH", "SCI"]),
            student("A2", &["MATH", "ART"]),
            student("A3", &["SCI", "ART"]),
        ];
        let mut first = base.clone();
        let out1 = schedule_remaining(
            &roster,
            &mut first,
            &ConflictIndex::default(),
            &catalog,
            Strategy::Equitable,
        );
        let mut second = base.clone();
        let out2 = schedule_remaining(
            &roster,
            &mut second,
            &ConflictIndex::default(),
            &catalog,
            Strategy::Equitable,
        );
        assert_eq!(
            serde_json::to_string(&out1).expect("json"),
            serde_json::to_string(&out2).expect("json")
        );
        for (id, s) in &first {
            assert_eq!(&second.get(id).expect(id).occupants, &s.occupants);
        }
    }

    #[test]
    fn students_without_resolvable_subjects_are_skipped_entirely() {
        let catalog = catalog();
        let mut sections = build_sections(&catalog).expect("build");
        let roster = vec![student("A1", &[]), student("A2", &["MATH"])];
        let outcome = schedule_remaining(
            &roster,
            &mut sections,
            &ConflictIndex::default(),
            &catalog,
            Strategy::Speed,
        );
        assert_eq!(outcome.stats.assigned, 1);
        assert_eq!(outcome.stats.unassigned, 0);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.assignments.len(), 1);
    }

    #[test]
    fn courseless_students_count_as_assigned_but_emit_no_record() {
        let catalog = catalog();
        let mut sections = build_sections(&catalog).expect("build");
        let mut s = student("A1", &["MATH"]);
        s.course = None;
        let outcome = schedule_remaining(
            &[s],
            &mut sections,
            &ConflictIndex::default(),
            &catalog,
            Strategy::Speed,
        );
        assert_eq!(outcome.stats.assigned, 1);
        assert!(outcome.assignments.is_empty());
    }

    #[test]
    fn occupancy_never_exceeds_capacity_under_load() {
        let catalog = Catalog::new(vec![subject("X", 2, 1, 2), subject("Y", 2, 1, 2)]);
        let mut sections = build_sections(&catalog).expect("build");
        let roster: Vec<Student> = (0..8)
            .map(|i| student(&format!("A{}", i), &["X", "Y"]))
            .collect();
        let outcome = schedule_remaining(
            &roster,
            &mut sections,
            &ConflictIndex::default(),
            &catalog,
            Strategy::Speed,
        );
        for s in sections.values() {
            assert!(s.occupants.len() <= s.capacity, "{} over capacity", s.id);
        }
        // 4 seats per subject across two blocks; 4 students fit, 4 diagnosed.
        assert_eq!(outcome.stats.assigned, 4);
        assert_eq!(outcome.stats.unassigned, 4);
    }
}
