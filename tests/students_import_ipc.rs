
use serde_json::json;
use test_support::{request, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn import_normalizes_codes_and_reports_unresolved_subjects() {
    let workspace = temp_dir("sectiond-import");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "name": "Math", "capacity": 25, "block1": 1, "block2": 2 }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.import",
        json!({ "rows": [
            { "code": "  a1 ", "name": "Ana", "course": "9A",
              "subjects": ["math", "Basket Weaving"] },
            { "code": "", "name": "Nobody" },
            { "code": "b2", "name": "Ben", "preference": "morning", "subjects": ["MATH"] }
        ] }),
    );
    assert_eq!(result.pointer("/imported").and_then(|v| v.as_i64()), Some(2));
    let unresolved = result
        .pointer("/unresolved")
        .and_then(|v| v.as_array())
        .expect("unresolved");
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].pointer("/code").and_then(|v| v.as_str()), Some("A1"));
    assert_eq!(
        unresolved[0].pointer("/subjects").and_then(|v| v.as_array()),
        Some(&vec![json!("Basket Weaving")])
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    let students = listed
        .pointer("/students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 2);
    assert_eq!(students[0].pointer("/code").and_then(|v| v.as_str()), Some("A1"));
    assert_eq!(
        students[0].pointer("/subjects").and_then(|v| v.as_array()),
        Some(&vec![json!("Math")])
    );
    assert_eq!(students[1].pointer("/code").and_then(|v| v.as_str()), Some("B2"));
    assert_eq!(
        students[1].pointer("/preference").and_then(|v| v.as_str()),
        Some("morning")
    );

    // Re-import updates in place, keeping roster order.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.import",
        json!({ "rows": [
            { "code": "A1", "name": "Ana Maria", "course": "9B", "subjects": ["Math"] }
        ] }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    let students = listed
        .pointer("/students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students[0].pointer("/name").and_then(|v| v.as_str()), Some("Ana Maria"));
    assert_eq!(students[0].pointer("/course").and_then(|v| v.as_str()), Some("9B"));
}

#[test]
fn conflict_pairs_are_validated_and_idempotent() {
    let workspace = temp_dir("sectiond-conflict-pairs");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.import",
        json!({ "rows": [
            { "code": "A1", "name": "Ana" },
            { "code": "B2", "name": "Ben" }
        ] }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "conflicts.add",
        json!({ "a": "A1", "b": "A1" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "conflicts.add",
        json!({ "a": "A1", "b": "ZZ" }),
    );
    assert_eq!(code, "not_found");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "conflicts.add",
        json!({ "a": "B2", "b": "A1" }),
    );
    // Same pair again, reversed: still one stored row.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "conflicts.add",
        json!({ "a": "A1", "b": "B2" }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "7", "conflicts.list", json!({}));
    let pairs = listed
        .pointer("/pairs")
        .and_then(|v| v.as_array())
        .expect("pairs");
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].pointer("/a").and_then(|v| v.as_str()), Some("A1"));
    assert_eq!(pairs[0].pointer("/b").and_then(|v| v.as_str()), Some("B2"));

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "conflicts.remove",
        json!({ "a": "B2", "b": "A1" }),
    );
    assert_eq!(removed.pointer("/removed").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn subject_config_rejects_equal_blocks() {
    let workspace = temp_dir("sectiond-bad-blocks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "name": "Math", "capacity": 25, "block1": 3, "block2": 3 }),
    );
    assert_eq!(code, "bad_blocks");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "name": "Math", "capacity": 25, "block1": 1, "block2": 2 }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.update",
        json!({ "id": "MATH", "block2": 1 }),
    );
    assert_eq!(code, "bad_blocks");

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.create",
        json!({ "name": "math", "capacity": 10, "block1": 1, "block2": 2 }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("duplicate_subject")
    );
}
