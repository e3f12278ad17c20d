
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn bulk_import_partitions_rows_and_reports_skips_and_unmapped_columns() {
    let workspace = temp_dir("schooldesk-bulk-import");
    let csv_path = workspace.join("students.csv");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Row 2: clean. Row 3: date of birth with an implausible year, still
    // submitted with the field omitted. Row 4: blank. Row 5: no admission
    // number, skipped before submission. The last column is operator noise.
    let csv = "\
Admission No,First Name,Date of Birth (YYYY-MM-DD),Admission Date,Office Notes
1001,Aarav,2012-04-18,13/01/2020,keep
1002,Diya,1805-01-01,05/03/2020,

,Farhan,2013-01-01,,typo row
";
    std::fs::write(&csv_path, csv).expect("write csv");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.bulkImport",
        json!({ "inPath": csv_path.to_string_lossy() }),
    );

    assert_eq!(result["rowsTotal"].as_u64(), Some(3));
    assert_eq!(result["submitted"].as_u64(), Some(2));
    assert_eq!(result["skippedMissingRequired"].as_u64(), Some(1));
    assert_eq!(
        result["unmappedColumns"],
        json!(["Office Notes"]),
        "unexpected unmapped columns: {}",
        result
    );

    let success = result["success"].as_array().expect("success list");
    let failed = result["failed"].as_array().expect("failed list");
    assert_eq!(
        success.len() + failed.len(),
        result["submitted"].as_u64().unwrap() as usize,
        "conservation violated: {}",
        result
    );
    assert_eq!(success.len(), 2);
    assert_eq!(failed.len(), 0);

    let diagnostics = result["diagnostics"].as_array().expect("diagnostics");
    let coerce = diagnostics
        .iter()
        .find(|d| d["code"] == "coerce_failed")
        .expect("coerce_failed diagnostic");
    assert_eq!(coerce["row"].as_u64(), Some(3));
    assert_eq!(coerce["field"].as_str(), Some("date_of_birth"));
    let skipped = diagnostics
        .iter()
        .find(|d| d["code"] == "missing_required")
        .expect("missing_required diagnostic");
    assert_eq!(skipped["row"].as_u64(), Some(5));

    // Ambiguous and day-over-12 date forms landed normalized.
    let first_id = success
        .iter()
        .find(|s| s["admissionNo"] == "1001")
        .and_then(|s| s["studentId"].as_str())
        .expect("student id for 1001")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.get",
        json!({ "studentId": first_id }),
    );
    assert_eq!(student["student"]["dateOfBirth"].as_str(), Some("2012-04-18"));
    assert_eq!(
        student["student"]["admissionDate"].as_str(),
        Some("2020-01-13")
    );

    let second_id = success
        .iter()
        .find(|s| s["admissionNo"] == "1002")
        .and_then(|s| s["studentId"].as_str())
        .expect("student id for 1002")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.get",
        json!({ "studentId": second_id }),
    );
    assert!(student["student"]["dateOfBirth"].is_null());
    assert_eq!(
        student["student"]["admissionDate"].as_str(),
        Some("2020-03-05")
    );

    // The skipped row never reached the store.
    let students = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|s| s.len()), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
