use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Write the retained run's per-student records as CSV. Rendering for
/// screens and print stays with the UI; this is the flat file it hands to
/// the office.
fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let Some(run) = state.run.as_ref() else {
        return err(&req.id, "no_run", "run the schedule first", None);
    };

    let mut out = String::new();
    out.push_str(&format!(
        "# sectiond export, run {} generated {}\n",
        run.id,
        chrono::Utc::now().to_rfc3339()
    ));
    out.push_str("code,name,course,sections\n");
    for record in &run.outcome.assignments {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_field(&record.code),
            csv_field(&record.name),
            csv_field(&record.course),
            csv_field(&record.sections.join(";"))
        ));
    }

    match std::fs::write(&path, out) {
        Ok(()) => ok(
            &req.id,
            json!({
                "path": path.to_string_lossy(),
                "rows": run.outcome.assignments.len()
            }),
        ),
        Err(e) => err(&req.id, "write_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.csv" => Some(handle_export_csv(state, req)),
        _ => None,
    }
}
