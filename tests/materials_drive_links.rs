mod test_support;

use serde_json::json;
use test_support::{create_class, create_subject, error_code, request, request_ok, sidecar_with_workspace};

#[test]
fn create_validates_kind_and_drive_link() {
    let (_child, mut stdin, mut reader) = sidecar_with_workspace("academy-materials");
    let class_id = create_class(&mut stdin, &mut reader, "Class 8");
    let subject = create_subject(&mut stdin, &mut reader, &class_id, "Math");

    let bad_link = request(
        &mut stdin,
        &mut reader,
        "1",
        "materials.create",
        json!({
            "subjectId": subject,
            "title": "Notes",
            "kind": "pdf",
            "driveLink": "https://example.com/file"
        }),
    );
    assert_eq!(error_code(&bad_link), Some("bad_params"));

    let bad_kind = request(
        &mut stdin,
        &mut reader,
        "2",
        "materials.create",
        json!({
            "subjectId": subject,
            "title": "Notes",
            "kind": "spreadsheet",
            "driveLink": "https://drive.google.com/file/d/abc"
        }),
    );
    assert_eq!(error_code(&bad_kind), Some("bad_params"));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "materials.create",
        json!({
            "subjectId": subject,
            "title": "Notes",
            "kind": "pdf",
            "driveLink": "https://drive.google.com/file/d/abc"
        }),
    );
    assert_eq!(created["classId"].as_str(), Some(class_id.as_str()));
}

#[test]
fn download_counter_increments_and_soft_delete_hides() {
    let (_child, mut stdin, mut reader) = sidecar_with_workspace("academy-materials-count");
    let class_id = create_class(&mut stdin, &mut reader, "Class 9");
    let subject = create_subject(&mut stdin, &mut reader, &class_id, "Science");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "materials.create",
        json!({
            "subjectId": subject,
            "title": "Lab video",
            "kind": "video",
            "driveLink": "https://drive.google.com/file/d/vid"
        }),
    );
    let material_id = created["materialId"].as_str().expect("id").to_string();

    for req_id in ["2", "3"] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            req_id,
            "materials.recordDownload",
            json!({ "materialId": material_id }),
        );
    }
    let bumped = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "materials.recordDownload",
        json!({ "materialId": material_id }),
    );
    assert_eq!(bumped["downloadCount"].as_i64(), Some(3));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "materials.delete",
        json!({ "materialId": material_id }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "materials.list",
        json!({ "subjectId": subject }),
    );
    assert_eq!(listed["materials"].as_array().map(|a| a.len()), Some(0));

    let gone = request(
        &mut stdin,
        &mut reader,
        "7",
        "materials.recordDownload",
        json!({ "materialId": material_id }),
    );
    assert_eq!(error_code(&gone), Some("not_found"));
}
