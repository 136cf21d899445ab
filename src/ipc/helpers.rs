use rusqlite::Connection;

use crate::engine::{Catalog, ConflictIndex, Preference, Student, Subject};

pub fn load_catalog(conn: &Connection) -> anyhow::Result<Catalog> {
    let mut stmt = conn.prepare(
        "SELECT id, name, capacity, block1, block2 FROM subjects ORDER BY sort_order, id",
    )?;
    let subjects = stmt
        .query_map([], |row| {
            Ok(Subject {
                id: row.get(0)?,
                name: row.get(1)?,
                capacity: row.get::<_, i64>(2)?.max(0) as usize,
                block1: row.get(3)?,
                block2: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Catalog::new(subjects))
}

/// Full roster in stored order, each student with their resolved enrollments
/// and any fixed sections.
pub fn load_students(conn: &Connection) -> anyhow::Result<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT code, name, course, preference FROM students ORDER BY sort_order, code",
    )?;
    let mut students = stmt
        .query_map([], |row| {
            let preference: Option<String> = row.get(3)?;
            Ok(Student {
                code: row.get(0)?,
                name: row.get(1)?,
                course: row.get(2)?,
                subjects: Vec::new(),
                preference: preference.as_deref().and_then(Preference::parse),
                preassigned: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut enroll_stmt = conn.prepare(
        "SELECT subject_id FROM enrollments WHERE student_code = ? ORDER BY sort_order, subject_id",
    )?;
    let mut pre_stmt = conn.prepare(
        "SELECT section_id FROM preassignments WHERE student_code = ? ORDER BY sort_order, section_id",
    )?;
    for student in &mut students {
        student.subjects = enroll_stmt
            .query_map([&student.code], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        student.preassigned = pre_stmt
            .query_map([&student.code], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(students)
}

pub fn load_conflicts(conn: &Connection) -> anyhow::Result<ConflictIndex> {
    let mut stmt = conn.prepare("SELECT a, b FROM conflict_pairs")?;
    let pairs = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConflictIndex::from_pairs(pairs))
}

/// Student codes are uppercased and trimmed everywhere they enter the system.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}
