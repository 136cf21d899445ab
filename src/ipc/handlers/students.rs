use crate::ipc::error::{err, ok};
use crate::ipc::helpers::normalize_code;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

/// Upsert a roster parsed by the UI (file/Sheet import stays on that side).
/// Subject names resolve case-insensitively against the catalog; names that
/// resolve to nothing are dropped from the enrollment and reported back.
fn handle_students_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.rows", None);
    };

    let mut imported = 0usize;
    let mut unresolved: Vec<serde_json::Value> = Vec::new();

    for row in rows {
        let code = row
            .get("code")
            .and_then(|v| v.as_str())
            .map(normalize_code)
            .unwrap_or_default();
        if code.is_empty() {
            continue;
        }
        let name = row
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        let course = row
            .get("course")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let preference = row
            .get("preference")
            .and_then(|v| v.as_str())
            .filter(|s| *s == "morning" || *s == "afternoon")
            .map(str::to_string);

        let existing_order: Result<Option<i64>, _> = conn
            .query_row(
                "SELECT sort_order FROM students WHERE code = ?",
                [&code],
                |row| row.get(0),
            )
            .optional();
        let sort_order = match existing_order {
            Ok(Some(v)) => v,
            Ok(None) => {
                match conn.query_row(
                    "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students",
                    [],
                    |row| row.get::<_, i64>(0),
                ) {
                    Ok(v) => v,
                    Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
                }
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        let upsert = conn.execute(
            "INSERT INTO students(code, name, course, preference, sort_order)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(code) DO UPDATE SET
               name = excluded.name,
               course = excluded.course,
               preference = excluded.preference",
            (&code, &name, &course, &preference, sort_order),
        );
        if let Err(e) = upsert {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }

        if let Err(e) = conn.execute("DELETE FROM enrollments WHERE student_code = ?", [&code]) {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
        let mut missing: Vec<String> = Vec::new();
        if let Some(subjects) = row.get("subjects").and_then(|v| v.as_array()) {
            for (i, subject_name) in subjects.iter().enumerate() {
                let Some(subject_name) = subject_name.as_str().map(str::trim) else {
                    continue;
                };
                let resolved: Result<Option<String>, _> = conn
                    .query_row(
                        "SELECT id FROM subjects WHERE name = ? COLLATE NOCASE",
                        [subject_name],
                        |row| row.get(0),
                    )
                    .optional();
                match resolved {
                    Ok(Some(subject_id)) => {
                        let insert = conn.execute(
                            "INSERT OR IGNORE INTO enrollments(student_code, subject_id, sort_order)
                             VALUES(?, ?, ?)",
                            (&code, &subject_id, i as i64),
                        );
                        if let Err(e) = insert {
                            return err(&req.id, "db_write_failed", e.to_string(), None);
                        }
                    }
                    Ok(None) => missing.push(subject_name.to_string()),
                    Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
                }
            }
        }
        if !missing.is_empty() {
            unresolved.push(json!({ "code": code, "subjects": missing }));
        }
        imported += 1;
    }

    ok(
        &req.id,
        json!({ "imported": imported, "unresolved": unresolved }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT code, name, course, preference FROM students ORDER BY sort_order, code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let base = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let base = match base {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut subj_stmt = match conn.prepare(
        "SELECT s.name FROM enrollments e
         JOIN subjects s ON s.id = e.subject_id
         WHERE e.student_code = ?
         ORDER BY e.sort_order, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut pre_stmt = match conn.prepare(
        "SELECT section_id FROM preassignments WHERE student_code = ? ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut students = Vec::new();
    for (code, name, course, preference) in base {
        let subjects = subj_stmt
            .query_map([&code], |row| row.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let preassigned = pre_stmt
            .query_map([&code], |row| row.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match (subjects, preassigned) {
            (Ok(subjects), Ok(preassigned)) => students.push(json!({
                "code": code,
                "name": name,
                "course": course,
                "preference": preference,
                "subjects": subjects,
                "preassigned": preassigned
            })),
            (Err(e), _) | (_, Err(e)) => {
                return err(&req.id, "db_query_failed", e.to_string(), None)
            }
        }
    }

    ok(&req.id, json!({ "students": students }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(code) = req.params.get("code").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.code", None);
    };
    let code = normalize_code(code);

    let result = conn
        .execute("DELETE FROM enrollments WHERE student_code = ?", [&code])
        .and_then(|_| conn.execute("DELETE FROM preassignments WHERE student_code = ?", [&code]))
        .and_then(|_| conn.execute("DELETE FROM conflict_pairs WHERE a = ? OR b = ?", (&code, &code)))
        .and_then(|_| conn.execute("DELETE FROM students WHERE code = ?", [&code]));
    match result {
        Ok(n) => ok(&req.id, json!({ "deleted": n > 0 })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn conflict_pair_params(req: &Request) -> Result<(String, String), &'static str> {
    let a = req.params.get("a").and_then(|v| v.as_str()).map(normalize_code);
    let b = req.params.get("b").and_then(|v| v.as_str()).map(normalize_code);
    let (Some(a), Some(b)) = (a, b) else {
        return Err("missing params.a/b");
    };
    if a.is_empty() || b.is_empty() {
        return Err("empty student code");
    }
    if a == b {
        return Err("a student cannot conflict with themselves");
    }
    // Stored normalized so (a,b) and (b,a) are the same row.
    if a < b {
        Ok((a, b))
    } else {
        Ok((b, a))
    }
}

fn handle_conflicts_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (a, b) = match conflict_pair_params(req) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    for code in [&a, &b] {
        let found: Result<Option<String>, _> = conn
            .query_row("SELECT code FROM students WHERE code = ?", [code], |row| {
                row.get(0)
            })
            .optional();
        match found {
            Ok(Some(_)) => {}
            Ok(None) => return err(&req.id, "not_found", format!("unknown student {}", code), None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    match conn.execute(
        "INSERT OR IGNORE INTO conflict_pairs(a, b) VALUES(?, ?)",
        (&a, &b),
    ) {
        Ok(_) => ok(&req.id, json!({ "a": a, "b": b })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_conflicts_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (a, b) = match conflict_pair_params(req) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    match conn.execute("DELETE FROM conflict_pairs WHERE a = ? AND b = ?", (&a, &b)) {
        Ok(n) => ok(&req.id, json!({ "removed": n > 0 })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_conflicts_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "pairs": [] }));
    };
    let mut stmt = match conn.prepare("SELECT a, b FROM conflict_pairs ORDER BY a, b") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "a": row.get::<_, String>(0)?,
                "b": row.get::<_, String>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(pairs) => ok(&req.id, json!({ "pairs": pairs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.import" => Some(handle_students_import(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "conflicts.add" => Some(handle_conflicts_add(state, req)),
        "conflicts.remove" => Some(handle_conflicts_remove(state, req)),
        "conflicts.list" => Some(handle_conflicts_list(state, req)),
        _ => None,
    }
}
