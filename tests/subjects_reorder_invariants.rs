mod test_support;

use serde_json::json;
use test_support::{
    assert_dense, create_class, create_subject, error_code, request, request_ok,
    sidecar_with_workspace, subject_order,
};

#[test]
fn reorder_moves_item_and_keeps_positions_dense() {
    let (_child, mut stdin, mut reader) = sidecar_with_workspace("academy-reorder");
    let class_id = create_class(&mut stdin, &mut reader, "Class 8");

    let _math = create_subject(&mut stdin, &mut reader, &class_id, "Math");
    let _science = create_subject(&mut stdin, &mut reader, &class_id, "Science");
    let english = create_subject(&mut stdin, &mut reader, &class_id, "English");
    let _hindi = create_subject(&mut stdin, &mut reader, &class_id, "Hindi");

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.reorder",
        json!({ "classId": class_id, "subjectId": english, "position": 1 }),
    );
    assert_eq!(
        moved
            .get("subject")
            .and_then(|s| s.get("position"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    let order = subject_order(&mut stdin, &mut reader, &class_id);
    let names: Vec<&str> = order.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["English", "Math", "Science", "Hindi"]);
    assert_dense(&order);
}

#[test]
fn reorder_to_current_position_changes_nothing() {
    let (_child, mut stdin, mut reader) = sidecar_with_workspace("academy-reorder-noop");
    let class_id = create_class(&mut stdin, &mut reader, "Class 9");
    let _a = create_subject(&mut stdin, &mut reader, &class_id, "Physics");
    let b = create_subject(&mut stdin, &mut reader, &class_id, "Chemistry");
    let _c = create_subject(&mut stdin, &mut reader, &class_id, "Biology");

    let before = subject_order(&mut stdin, &mut reader, &class_id);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.reorder",
        json!({ "classId": class_id, "subjectId": b, "position": 2 }),
    );
    let after = subject_order(&mut stdin, &mut reader, &class_id);
    assert_eq!(before, after);
}

#[test]
fn reorder_round_trip_restores_every_sibling() {
    let (_child, mut stdin, mut reader) = sidecar_with_workspace("academy-reorder-roundtrip");
    let class_id = create_class(&mut stdin, &mut reader, "Class 10");
    for name in ["A", "B", "C", "D", "E"] {
        create_subject(&mut stdin, &mut reader, &class_id, name);
    }
    let before = subject_order(&mut stdin, &mut reader, &class_id);
    let b_id = {
        let listed = request_ok(
            &mut stdin,
            &mut reader,
            "ids",
            "subjects.list",
            json!({ "classId": class_id }),
        );
        listed["subjects"][1]["id"].as_str().expect("id").to_string()
    };

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.reorder",
        json!({ "classId": class_id, "subjectId": b_id, "position": 5 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.reorder",
        json!({ "classId": class_id, "subjectId": b_id, "position": 2 }),
    );

    let after = subject_order(&mut stdin, &mut reader, &class_id);
    assert_eq!(before, after, "round trip must restore the full ordering");
}

#[test]
fn reorder_validates_range_and_existence() {
    let (_child, mut stdin, mut reader) = sidecar_with_workspace("academy-reorder-errors");
    let class_id = create_class(&mut stdin, &mut reader, "Class 11");
    let a = create_subject(&mut stdin, &mut reader, &class_id, "Accounts");
    let _b = create_subject(&mut stdin, &mut reader, &class_id, "Economics");

    let too_high = request(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.reorder",
        json!({ "classId": class_id, "subjectId": a, "position": 3 }),
    );
    assert_eq!(error_code(&too_high), Some("out_of_range"));

    let zero = request(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.reorder",
        json!({ "classId": class_id, "subjectId": a, "position": 0 }),
    );
    assert_eq!(error_code(&zero), Some("out_of_range"));

    let ghost = request(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.reorder",
        json!({ "classId": class_id, "subjectId": "nope", "position": 1 }),
    );
    assert_eq!(error_code(&ghost), Some("not_found"));

    // Nothing moved.
    let order = subject_order(&mut stdin, &mut reader, &class_id);
    let names: Vec<&str> = order.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["Accounts", "Economics"]);
    assert_dense(&order);
}

#[test]
fn positions_stay_dense_across_a_mixed_operation_sequence() {
    let (_child, mut stdin, mut reader) = sidecar_with_workspace("academy-reorder-sequence");
    let class_id = create_class(&mut stdin, &mut reader, "Class 12");
    let s1 = create_subject(&mut stdin, &mut reader, &class_id, "S1");
    let _s2 = create_subject(&mut stdin, &mut reader, &class_id, "S2");
    let s3 = create_subject(&mut stdin, &mut reader, &class_id, "S3");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.create",
        json!({ "classId": class_id, "name": "S4", "position": 2 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.reorder",
        json!({ "classId": class_id, "subjectId": s3, "position": 1 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.delete",
        json!({ "classId": class_id, "subjectId": s1 }),
    );

    let order = subject_order(&mut stdin, &mut reader, &class_id);
    assert_eq!(order.len(), 3);
    assert_dense(&order);
}
