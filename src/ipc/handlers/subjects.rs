use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

/// Subject ids are short codes derived from the display name; they also form
/// the section-id prefix, so keep them to uppercase alphanumerics.
fn derive_subject_id(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    // Include enrollment counts so the UI can show a useful overview.
    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.name,
           s.capacity,
           s.block1,
           s.block2,
           (SELECT COUNT(*) FROM enrollments e WHERE e.subject_id = s.id) AS enrolled
         FROM subjects s
         ORDER BY s.sort_order, s.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let capacity: i64 = row.get(2)?;
            let block1: i64 = row.get(3)?;
            let block2: i64 = row.get(4)?;
            let enrolled: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "capacity": capacity,
                "block1": block1,
                "block2": block2,
                "enrolledCount": enrolled
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(name) = req.params.get("name").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.name", None);
    };
    let name = name.trim();
    let capacity = req.params.get("capacity").and_then(|v| v.as_i64()).unwrap_or(0);
    let block1 = req.params.get("block1").and_then(|v| v.as_i64());
    let block2 = req.params.get("block2").and_then(|v| v.as_i64());
    let (Some(block1), Some(block2)) = (block1, block2) else {
        return err(&req.id, "bad_params", "missing params.block1/block2", None);
    };
    if capacity <= 0 {
        return err(&req.id, "bad_params", "capacity must be positive", None);
    }
    if block1 == block2 {
        return err(
            &req.id,
            "bad_blocks",
            "a subject's two sections must sit on different blocks",
            None,
        );
    }
    let id = derive_subject_id(name);
    if id.is_empty() {
        return err(&req.id, "bad_params", "name yields an empty subject id", None);
    }

    let existing: Result<Option<String>, _> = conn
        .query_row("SELECT id FROM subjects WHERE id = ?", [&id], |row| {
            row.get(0)
        })
        .optional();
    match existing {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "duplicate_subject",
                format!("subject id {} already exists", id),
                None,
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let next_order: Result<i64, _> = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM subjects",
        [],
        |row| row.get(0),
    );
    let sort_order = match next_order {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let inserted = conn.execute(
        "INSERT INTO subjects(id, name, capacity, block1, block2, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, name, capacity, block1, block2, sort_order),
    );
    match inserted {
        Ok(_) => ok(&req.id, json!({ "subjectId": id })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = req.params.get("id").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.id", None);
    };

    let current = conn
        .query_row(
            "SELECT name, capacity, block1, block2 FROM subjects WHERE id = ?",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional();
    let (name, capacity, block1, block2) = match current {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", format!("unknown subject {}", id), None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or(name);
    let capacity = req.params.get("capacity").and_then(|v| v.as_i64()).unwrap_or(capacity);
    let block1 = req.params.get("block1").and_then(|v| v.as_i64()).unwrap_or(block1);
    let block2 = req.params.get("block2").and_then(|v| v.as_i64()).unwrap_or(block2);
    if capacity <= 0 {
        return err(&req.id, "bad_params", "capacity must be positive", None);
    }
    if block1 == block2 {
        return err(
            &req.id,
            "bad_blocks",
            "a subject's two sections must sit on different blocks",
            None,
        );
    }

    let updated = conn.execute(
        "UPDATE subjects SET name = ?, capacity = ?, block1 = ?, block2 = ? WHERE id = ?",
        (&name, capacity, block1, block2, id),
    );
    match updated {
        Ok(_) => ok(&req.id, json!({ "subjectId": id })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = req.params.get("id").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.id", None);
    };

    let result = conn
        .execute("DELETE FROM enrollments WHERE subject_id = ?", [id])
        .and_then(|_| {
            // Fixed sections referencing this subject go with it.
            conn.execute(
                "DELETE FROM preassignments WHERE section_id IN (?, ?)",
                (format!("{}.1", id), format!("{}.2", id)),
            )
        })
        .and_then(|_| conn.execute("DELETE FROM subjects WHERE id = ?", [id]));
    match result {
        Ok(n) => ok(&req.id, json!({ "deleted": n > 0 })),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
