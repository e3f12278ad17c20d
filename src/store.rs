use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

use crate::import::{CandidateRecord, FieldKind, StudentField, TypedValue};

/// Reference to a record the store accepted.
#[derive(Clone, Debug)]
pub struct RecordRef {
    pub row: usize,
    pub student_id: String,
    pub admission_no: String,
}

/// A record the store rejected, with enough identity to find it in the sheet.
#[derive(Clone, Debug)]
pub struct FailedRecord {
    pub row: usize,
    pub admission_no: Option<String>,
    pub first_name: Option<String>,
    pub error: String,
}

/// One outcome per submitted record: `success.len() + failed.len() == total`.
#[derive(Debug)]
pub struct BatchOutcome {
    pub total: usize,
    pub success: Vec<RecordRef>,
    pub failed: Vec<FailedRecord>,
}

/// A failure of the submission itself, as opposed to a per-record rejection.
/// Nothing is persisted; the caller must resubmit the whole batch.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Db(#[from] rusqlite::Error),
}

/// The record-store collaborator. It re-validates every record on its own
/// terms; the import pipeline's gates do not substitute for it.
pub trait RecordStore {
    fn submit_batch(&mut self, records: &[CandidateRecord]) -> Result<BatchOutcome, StoreError>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteStore { conn }
    }
}

impl RecordStore for SqliteStore<'_> {
    fn submit_batch(&mut self, records: &[CandidateRecord]) -> Result<BatchOutcome, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut success = Vec::new();
        let mut failed = Vec::new();
        let mut seen_admission: HashSet<String> = HashSet::new();

        for record in records {
            let admission_no = record.text(StudentField::AdmissionNo).map(|s| s.to_string());
            let first_name = record.text(StudentField::FirstName).map(|s| s.to_string());

            // A database error here is a failure of the store itself and
            // aborts the whole batch; only verdicts are per-record.
            if let Some(reason) = validate_record(&tx, record, &seen_admission)? {
                failed.push(FailedRecord {
                    row: record.row,
                    admission_no,
                    first_name,
                    error: reason,
                });
                continue;
            }

            let admission_no = admission_no.unwrap_or_default();
            seen_admission.insert(admission_no.clone());
            let student_id = insert_student(&tx, record)?;
            success.push(RecordRef {
                row: record.row,
                student_id,
                admission_no,
            });
        }

        tx.commit()?;
        Ok(BatchOutcome {
            total: records.len(),
            success,
            failed,
        })
    }
}

const GENDERS: &[&str] = &["male", "female", "other"];
const BLOOD_GROUPS: &[&str] = &["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];

fn reference_table(field: StudentField) -> Option<&'static str> {
    match field {
        StudentField::ClassId => Some("classes"),
        StudentField::SectionId => Some("sections"),
        StudentField::CategoryId => Some("categories"),
        StudentField::HouseId => Some("houses"),
        _ => None,
    }
}

/// Business validation for one field value; `Ok(Some(reason))` is a
/// rejection verdict, `Err` a store failure. Used for both batch submission
/// and single-record edits.
pub fn validate_field(
    conn: &Connection,
    field: StudentField,
    value: &TypedValue,
) -> rusqlite::Result<Option<String>> {
    match (field, value) {
        (StudentField::Gender, TypedValue::Text(s)) => {
            if GENDERS.iter().any(|g| s.eq_ignore_ascii_case(g)) {
                Ok(None)
            } else {
                Ok(Some(format!("unknown gender: {}", s)))
            }
        }
        (StudentField::BloodGroup, TypedValue::Text(s)) => {
            if BLOOD_GROUPS.iter().any(|g| s.eq_ignore_ascii_case(g)) {
                Ok(None)
            } else {
                Ok(Some(format!("unknown blood group: {}", s)))
            }
        }
        (_, TypedValue::Date(s)) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            Ok(_) => Ok(None),
            Err(_) => Ok(Some(format!(
                "{} is not a valid date: {}",
                field.column(),
                s
            ))),
        },
        (_, TypedValue::Integer(id)) => {
            let Some(table) = reference_table(field) else {
                return Ok(None);
            };
            let found: Option<i64> = conn
                .query_row(&format!("SELECT 1 FROM {} WHERE id = ?", table), [id], |r| {
                    r.get(0)
                })
                .optional()?;
            if found.is_some() {
                Ok(None)
            } else {
                Ok(Some(format!("unknown {}: {}", field.column(), id)))
            }
        }
        _ => Ok(None),
    }
}

fn validate_record(
    conn: &Connection,
    record: &CandidateRecord,
    seen_admission: &HashSet<String>,
) -> rusqlite::Result<Option<String>> {
    let Some(admission_no) = record
        .text(StudentField::AdmissionNo)
        .filter(|s| !s.is_empty())
    else {
        return Ok(Some("admission no is required".to_string()));
    };
    if record
        .text(StudentField::FirstName)
        .filter(|s| !s.is_empty())
        .is_none()
    {
        return Ok(Some("first name is required".to_string()));
    }

    if seen_admission.contains(admission_no) {
        return Ok(Some(format!(
            "duplicate admission no in batch: {}",
            admission_no
        )));
    }
    let existing: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE admission_no = ?",
            [admission_no],
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(Some(format!(
            "admission no already exists: {}",
            admission_no
        )));
    }

    for (field, value) in &record.fields {
        if let Some(reason) = validate_field(conn, *field, value)? {
            return Ok(Some(reason));
        }
    }
    Ok(None)
}

fn now_unix_string() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

fn insert_student(conn: &Connection, record: &CandidateRecord) -> rusqlite::Result<String> {
    let student_id = Uuid::new_v4().to_string();
    let now = now_unix_string();

    let mut columns = vec!["id", "created_at", "updated_at"];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(student_id.clone()),
        Box::new(now.clone()),
        Box::new(now),
    ];
    for (field, value) in &record.fields {
        columns.push(field.column());
        match value {
            TypedValue::Text(s) | TypedValue::Date(s) => params.push(Box::new(s.clone())),
            TypedValue::Integer(i) => params.push(Box::new(*i)),
        }
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO students({}) VALUES({})",
        columns.join(", "),
        placeholders
    );
    conn.execute(
        &sql,
        rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
    )?;
    Ok(student_id)
}

/// Build a candidate record from already-typed values, for the single-record
/// create path. Values are run through the same coercion kinds the sheet
/// pipeline uses.
pub fn record_from_values(
    row: usize,
    values: Vec<(StudentField, TypedValue)>,
) -> CandidateRecord {
    let mut record = CandidateRecord {
        row,
        fields: Default::default(),
    };
    for (field, value) in values {
        debug_assert!(matches!(
            (field.kind(), &value),
            (FieldKind::Integer, TypedValue::Integer(_))
                | (FieldKind::Date, TypedValue::Date(_))
                | (FieldKind::Text, TypedValue::Text(_))
                | (FieldKind::Enum, TypedValue::Text(_))
        ));
        record.fields.insert(field, value);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("schema");
        conn.execute("INSERT INTO classes(name) VALUES('Grade 6')", [])
            .expect("seed class");
        conn.execute("INSERT INTO sections(name) VALUES('A')", [])
            .expect("seed section");
        conn
    }

    fn record(row: usize, admission_no: &str, first_name: &str) -> CandidateRecord {
        record_from_values(
            row,
            vec![
                (
                    StudentField::AdmissionNo,
                    TypedValue::Text(admission_no.to_string()),
                ),
                (
                    StudentField::FirstName,
                    TypedValue::Text(first_name.to_string()),
                ),
            ],
        )
    }

    #[test]
    fn batch_outcome_conserves_every_submitted_record() {
        let conn = test_conn();
        let mut store = SqliteStore::new(&conn);

        let mut bad_class = record(4, "1003", "Diya");
        bad_class
            .fields
            .insert(StudentField::ClassId, TypedValue::Integer(99));
        let batch = vec![
            record(2, "1001", "Aarav"),
            record(3, "1001", "Aarav"), // duplicate within batch
            bad_class,
            record(5, "1004", "Ishaan"),
        ];

        let outcome = store.submit_batch(&batch).expect("submit");
        assert_eq!(outcome.total, 4);
        assert_eq!(outcome.success.len() + outcome.failed.len(), outcome.total);
        assert_eq!(outcome.success.len(), 2);
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.failed[0].error.contains("duplicate admission no"));
        assert!(outcome.failed[1].error.contains("unknown class_id"));

        // Rejected rows are not persisted; accepted rows are.
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn store_revalidates_independently_of_the_assembler_gate() {
        let conn = test_conn();
        let mut store = SqliteStore::new(&conn);

        // A record that skipped the pipeline and lacks a first name.
        let rec = record_from_values(
            2,
            vec![(
                StudentField::AdmissionNo,
                TypedValue::Text("1001".to_string()),
            )],
        );
        let outcome = store.submit_batch(&[rec]).expect("submit");
        assert_eq!(outcome.success.len(), 0);
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].error.contains("first name is required"));
    }

    #[test]
    fn enum_and_existing_admission_rejections_are_per_record() {
        let conn = test_conn();
        let mut store = SqliteStore::new(&conn);
        store
            .submit_batch(&[record(2, "1001", "Aarav")])
            .expect("seed student");

        let mut bad_gender = record(3, "1002", "Diya");
        bad_gender
            .fields
            .insert(StudentField::Gender, TypedValue::Text("unknown".to_string()));
        let outcome = store
            .submit_batch(&[record(2, "1001", "Twin"), bad_gender])
            .expect("submit");
        assert_eq!(outcome.success.len(), 0);
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.failed[0].error.contains("already exists"));
        assert!(outcome.failed[1].error.contains("unknown gender"));
    }

    #[test]
    fn missing_schema_is_a_whole_batch_store_error() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        let mut store = SqliteStore::new(&conn);
        let result = store.submit_batch(&[record(2, "1001", "Aarav")]);
        assert!(result.is_err());
    }
}
