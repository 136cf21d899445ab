use crate::db;
use crate::engine::manual::{apply_manual_override, validate_manual_override};
use crate::engine::search::{assemble, schedule_remaining};
use crate::engine::sections::{apply_preassignments, build_sections, detect_preassignment_conflict};
use crate::engine::Strategy;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{load_catalog, load_conflicts, load_students, normalize_code};
use crate::ipc::types::{AppState, Request, RunState};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn section_ids_param(req: &Request) -> Option<Vec<String>> {
    req.params.get("sectionIds").and_then(|v| v.as_array()).map(|ids| {
        ids.iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect()
    })
}

fn handle_preassign_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(code) = req.params.get("studentCode").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.studentCode", None);
    };
    let code = normalize_code(code);
    let Some(section_ids) = section_ids_param(req) else {
        return err(&req.id, "bad_params", "missing params.sectionIds", None);
    };

    let known: Result<Option<String>, _> = conn
        .query_row("SELECT code FROM students WHERE code = ?", [&code], |row| {
            row.get(0)
        })
        .optional();
    match known {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", format!("unknown student {}", code), None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute("DELETE FROM preassignments WHERE student_code = ?", [&code]) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    for (i, section_id) in section_ids.iter().enumerate() {
        let insert = conn.execute(
            "INSERT OR IGNORE INTO preassignments(student_code, section_id, sort_order)
             VALUES(?, ?, ?)",
            (&code, section_id, i as i64),
        );
        if let Err(e) = insert {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
    }
    ok(
        &req.id,
        json!({ "studentCode": code, "sectionIds": section_ids }),
    )
}

fn handle_preassign_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "preassignments": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT student_code, section_id FROM preassignments ORDER BY student_code, sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "studentCode": row.get::<_, String>(0)?,
                "sectionId": row.get::<_, String>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(list) => ok(&req.id, json!({ "preassignments": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Pre-flight for the UI: find the first preassigned student whose fixed
/// sections collide on a block. Resolved interactively, one at a time,
/// before a run is allowed to start.
fn handle_preassign_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let loaded = load_catalog(conn).and_then(|catalog| Ok((catalog, load_students(conn)?)));
    let (catalog, students) = match loaded {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match detect_preassignment_conflict(&students, &catalog) {
        Some(clash) => match serde_json::to_value(&clash) {
            Ok(v) => ok(&req.id, json!({ "conflict": v })),
            Err(e) => err(&req.id, "internal", e.to_string(), None),
        },
        None => ok(&req.id, json!({ "conflict": null })),
    }
}

fn run_payload(run: &RunState) -> Result<serde_json::Value, serde_json::Error> {
    let sections: Vec<_> = run.sections.values().collect();
    Ok(json!({
        "runId": run.id,
        "createdAt": run.created_at,
        "strategy": run.strategy.as_str(),
        "sections": serde_json::to_value(&sections)?,
        "assignments": serde_json::to_value(&run.outcome.assignments)?,
        "failures": serde_json::to_value(&run.outcome.failures)?,
        "stats": serde_json::to_value(&run.outcome.stats)?,
    }))
}

fn handle_schedule_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let strategy = match req.params.get("strategy") {
        None => Strategy::Speed,
        Some(v) => match v.as_str().and_then(Strategy::parse) {
            Some(s) => s,
            None => return err(&req.id, "bad_params", "unknown strategy", None),
        },
    };

    let loaded = load_catalog(conn).and_then(|catalog| {
        let students = load_students(conn)?;
        let conflicts = load_conflicts(conn)?;
        Ok((catalog, students, conflicts))
    });
    let (catalog, students, conflicts) = match loaded {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut sections = match build_sections(&catalog) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "bad_blocks", e.to_string(), None),
    };

    // The applier's fatal path cannot say why a block collided; refuse to
    // start until preassign.check comes back clean.
    if let Some(clash) = detect_preassignment_conflict(&students, &catalog) {
        let details = serde_json::to_value(&clash).ok();
        return err(
            &req.id,
            "preassign_blocked",
            format!(
                "preassigned sections for {} collide on block {}",
                clash.student_code, clash.block
            ),
            details,
        );
    }

    if let Err(e) = apply_preassignments(&mut sections, &students, &conflicts) {
        return err(&req.id, e.code(), e.to_string(), None);
    }

    let outcome = schedule_remaining(&students, &mut sections, &conflicts, &catalog, strategy);

    let run = RunState {
        id: Uuid::new_v4().to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        strategy,
        sections,
        outcome,
    };

    let payload = match run_payload(&run) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    let persisted = serde_json::to_string(&payload).map_err(anyhow::Error::from).and_then(|blob| {
        conn.execute(
            "INSERT INTO runs(id, created_at, strategy, result) VALUES(?, ?, ?, ?)",
            (&run.id, &run.created_at, run.strategy.as_str(), blob),
        )?;
        db::settings_set_json(conn, "last_run_id", &json!(run.id))
    });
    if let Err(e) = persisted {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    state.run = Some(run);
    ok(&req.id, payload)
}

fn handle_schedule_result(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(run) = state.run.as_ref() else {
        return err(&req.id, "no_run", "no schedule run in this session", None);
    };
    match run_payload(run) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn override_params(req: &Request) -> Result<(String, Vec<String>), &'static str> {
    let code = req
        .params
        .get("studentCode")
        .and_then(|v| v.as_str())
        .map(normalize_code)
        .ok_or("missing params.studentCode")?;
    let ids = section_ids_param(req).ok_or("missing params.sectionIds")?;
    Ok((code, ids))
}

fn handle_override_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (code, section_ids) = match override_params(req) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let Some(run) = state.run.as_ref() else {
        return err(&req.id, "no_run", "run the schedule first", None);
    };

    let loaded = load_students(conn).and_then(|students| Ok((students, load_conflicts(conn)?)));
    let (students, conflicts) = match loaded {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student) = students.iter().find(|s| s.code == code) else {
        return err(&req.id, "not_found", format!("unknown student {}", code), None);
    };

    let check = validate_manual_override(student, &section_ids, &run.sections, &conflicts);
    match serde_json::to_value(&check) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn handle_override_apply(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (code, section_ids) = match override_params(req) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let loaded = load_catalog(conn).and_then(|catalog| {
        let students = load_students(conn)?;
        let conflicts = load_conflicts(conn)?;
        Ok((catalog, students, conflicts))
    });
    let (catalog, students, conflicts) = match loaded {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student) = students.iter().find(|s| s.code == code) else {
        return err(&req.id, "not_found", format!("unknown student {}", code), None);
    };

    let Some(run) = state.run.as_mut() else {
        return err(&req.id, "no_run", "run the schedule first", None);
    };
    let check = validate_manual_override(student, &section_ids, &run.sections, &conflicts);
    if !check.valid {
        return err(&req.id, "invalid_override", check.message, None);
    }

    apply_manual_override(&code, &section_ids, &mut run.sections);

    // Refresh the records; a previously failed student may now be placed.
    let failures: Vec<_> = run
        .outcome
        .failures
        .iter()
        .filter(|d| {
            !run.sections
                .values()
                .any(|s| s.occupants.iter().any(|c| c == &d.student_code))
        })
        .cloned()
        .collect();
    let examined = run.outcome.stats.combinations_examined;
    run.outcome = assemble(&students, &run.sections, &catalog, failures, examined);

    let payload = match run_payload(run) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    let updated = serde_json::to_string(&payload)
        .map_err(anyhow::Error::from)
        .and_then(|blob| {
            conn.execute("UPDATE runs SET result = ? WHERE id = ?", (blob, &run.id))?;
            Ok(())
        });
    if let Err(e) = updated {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "applied": true, "result": payload }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "preassign.set" => Some(handle_preassign_set(state, req)),
        "preassign.list" => Some(handle_preassign_list(state, req)),
        "preassign.check" => Some(handle_preassign_check(state, req)),
        "schedule.run" => Some(handle_schedule_run(state, req)),
        "schedule.result" => Some(handle_schedule_result(state, req)),
        "override.validate" => Some(handle_override_validate(state, req)),
        "override.apply" => Some(handle_override_apply(state, req)),
        _ => None,
    }
}
