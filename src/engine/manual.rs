use super::{ConflictIndex, SectionMap, Student};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OverrideCheck {
    pub valid: bool,
    pub message: String,
}

impl OverrideCheck {
    fn invalid(message: String) -> Self {
        Self {
            valid: false,
            message,
        }
    }
}

/// Predicate check for a post-run manual edit: no search, just the same
/// block-uniqueness, capacity and conflict rules the engine enforced.
/// Capacity excludes the student's own prior occupancy, since the edit
/// removes them before re-placing them.
pub fn validate_manual_override(
    student: &Student,
    new_section_ids: &[String],
    sections: &SectionMap,
    conflicts: &ConflictIndex,
) -> OverrideCheck {
    let mut block_owner: HashMap<i64, &str> = HashMap::new();
    let own_conflicts = conflicts.conflicts_of(&student.code);

    for id in new_section_ids {
        let Some(section) = sections.get(id) else {
            return OverrideCheck::invalid(format!("unknown section {}", id));
        };
        if let Some(first) = block_owner.insert(section.block, id) {
            return OverrideCheck::invalid(format!(
                "sections {} and {} both sit on block {}",
                first, id, section.block
            ));
        }
        let others = section
            .occupants
            .iter()
            .filter(|c| *c != &student.code)
            .count();
        if others >= section.capacity {
            return OverrideCheck::invalid(format!("section {} is full", id));
        }
        if let Some(own) = own_conflicts {
            if let Some(peer) = section
                .occupants
                .iter()
                .find(|c| *c != &student.code && own.contains(*c))
            {
                return OverrideCheck::invalid(format!(
                    "conflicts with {} in section {}",
                    peer, id
                ));
            }
        }
    }

    OverrideCheck {
        valid: true,
        message: "ok".to_string(),
    }
}

/// Commit a validated override: drop the student from every section, then
/// push them into the new ones. Callers validate first.
pub fn apply_manual_override(student_code: &str, new_section_ids: &[String], sections: &mut SectionMap) {
    for section in sections.values_mut() {
        section.occupants.retain(|c| c != student_code);
    }
    for id in new_section_ids {
        if let Some(section) = sections.get_mut(id) {
            section.occupants.push(student_code.to_string());
        }
    }
}
