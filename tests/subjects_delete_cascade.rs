mod test_support;

use serde_json::json;
use test_support::{
    assert_dense, create_class, create_subject, error_code, request, request_ok,
    sidecar_with_workspace, subject_order,
};

#[test]
fn delete_compacts_positions_and_cascades_materials() {
    let (_child, mut stdin, mut reader) = sidecar_with_workspace("academy-delete-cascade");
    let class_id = create_class(&mut stdin, &mut reader, "Class 8");

    let math = create_subject(&mut stdin, &mut reader, &class_id, "Math");
    let science = create_subject(&mut stdin, &mut reader, &class_id, "Science");
    let english = create_subject(&mut stdin, &mut reader, &class_id, "English");
    let _hindi = create_subject(&mut stdin, &mut reader, &class_id, "Hindi");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "materials.create",
        json!({
            "subjectId": science,
            "title": "Motion notes",
            "kind": "pdf",
            "driveLink": "https://drive.google.com/file/d/abc"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "materials.create",
        json!({
            "subjectId": science,
            "title": "Optics lecture",
            "kind": "video",
            "driveLink": "https://drive.google.com/file/d/def"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "materials.create",
        json!({
            "subjectId": math,
            "title": "Algebra workbook",
            "kind": "document",
            "driveLink": "https://docs.google.com/document/d/ghi"
        }),
    );

    // Matches the published scenario: move English first, then remove Science.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.reorder",
        json!({ "classId": class_id, "subjectId": english, "position": 1 }),
    );
    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.delete",
        json!({ "classId": class_id, "subjectId": science }),
    );
    assert_eq!(
        removed.get("materialsRemoved").and_then(|v| v.as_i64()),
        Some(2)
    );

    let order = subject_order(&mut stdin, &mut reader, &class_id);
    let pairs: Vec<(&str, i64)> = order.iter().map(|(n, p)| (n.as_str(), *p)).collect();
    assert_eq!(pairs, [("English", 1), ("Math", 2), ("Hindi", 3)]);
    assert_dense(&order);

    // Science's materials are gone; Math's survive.
    let science_materials = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "materials.list",
        json!({ "subjectId": science }),
    );
    assert_eq!(
        science_materials["materials"].as_array().map(|a| a.len()),
        Some(0)
    );
    let math_materials = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "materials.list",
        json!({ "subjectId": math }),
    );
    assert_eq!(
        math_materials["materials"].as_array().map(|a| a.len()),
        Some(1)
    );
}

#[test]
fn delete_of_missing_subject_is_not_found_and_changes_nothing() {
    let (_child, mut stdin, mut reader) = sidecar_with_workspace("academy-delete-missing");
    let class_id = create_class(&mut stdin, &mut reader, "Class 9");
    let only = create_subject(&mut stdin, &mut reader, &class_id, "Sole Subject");

    let missing = request(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.delete",
        json!({ "classId": class_id, "subjectId": "no-such-id" }),
    );
    assert_eq!(error_code(&missing), Some("not_found"));

    // Deleting twice: the second call sees an inactive item.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.delete",
        json!({ "classId": class_id, "subjectId": only }),
    );
    let again = request(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.delete",
        json!({ "classId": class_id, "subjectId": only }),
    );
    assert_eq!(error_code(&again), Some("not_found"));
}
