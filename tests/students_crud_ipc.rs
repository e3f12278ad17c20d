
use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn students_crud_validates_through_the_record_store() {
    let workspace = temp_dir("schooldesk-students-crud");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // Mutations require a workspace.
    let early = request(
        &mut stdin,
        &mut reader,
        "0",
        "students.create",
        json!({ "admissionNo": "3001", "firstName": "Meera" }),
    );
    assert_eq!(
        early.pointer("/error/code").and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Grade 7" }),
    );
    let class_id = class["id"].as_i64().expect("class id");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "admissionNo": "3001",
            "firstName": "Meera",
            "lastName": "Iyer",
            "gender": "Female",
            "dateOfBirth": "2011-02-03",
            "classId": class_id
        }),
    );
    let student_id = created["studentId"].as_str().expect("student id").to_string();

    // The same admission number cannot be created twice.
    let dup = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "admissionNo": "3001", "firstName": "Copy" }),
    );
    assert_eq!(
        dup.pointer("/error/code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );

    // Enum legality is the store's call, on create and on update alike.
    let bad_gender = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "admissionNo": "3002", "firstName": "Rohan", "gender": "dragon" }),
    );
    assert_eq!(
        bad_gender.pointer("/error/code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "rollNo": 14, "bloodGroup": "B+" }
        }),
    );
    let bad_patch = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "bloodGroup": "Z+" }
        }),
    );
    assert_eq!(
        bad_patch.pointer("/error/code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.create",
        json!({ "admissionNo": "3002", "firstName": "Rohan" }),
    );
    let second_id = second["studentId"].as_str().expect("student id").to_string();
    let collide = request(
        &mut stdin,
        &mut reader,
        "9",
        "students.update",
        json!({
            "studentId": second_id,
            "patch": { "admissionNo": "3001" }
        }),
    );
    assert_eq!(
        collide.pointer("/error/code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.list",
        json!({ "classId": class_id }),
    );
    let students = listed["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["rollNo"].as_i64(), Some(14));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(fetched["student"]["bloodGroup"].as_str(), Some("B+"));
    assert_eq!(fetched["student"]["gender"].as_str(), Some("Female"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "students.delete",
        json!({ "studentId": second_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "13",
        "students.delete",
        json!({ "studentId": second_id }),
    );
    assert_eq!(
        gone.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
