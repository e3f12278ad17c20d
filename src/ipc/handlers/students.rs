use crate::import::{coerce_cell, CandidateRecord, StudentField, TypedValue};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sheet::RawCell;
use crate::store::{validate_field, RecordStore, SqliteStore};
use rusqlite::OptionalExtension;
use serde_json::{json, Value};

/// camelCase request key for a field, derived from its column name
/// (`admission_no` -> `admissionNo`).
fn param_key(field: StudentField) -> String {
    let mut out = String::new();
    for (i, part) in field.column().split('_').enumerate() {
        if i == 0 {
            out.push_str(part);
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

fn raw_from_json(value: &Value) -> Option<RawCell> {
    match value {
        Value::String(s) => Some(RawCell::Text(s.clone())),
        Value::Number(n) => n.as_f64().map(RawCell::Number),
        _ => None,
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let class_id = req.params.get("classId").and_then(|v| v.as_i64());
    let mut sql = String::from(
        "SELECT id, admission_no, roll_no, class_id, section_id, first_name, last_name,
                gender, date_of_birth, admission_date
         FROM students",
    );
    if class_id.is_some() {
        sql.push_str(" WHERE class_id = ?");
    }
    sql.push_str(" ORDER BY admission_no");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<Value> {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "admissionNo": row.get::<_, String>(1)?,
            "rollNo": row.get::<_, Option<i64>>(2)?,
            "classId": row.get::<_, Option<i64>>(3)?,
            "sectionId": row.get::<_, Option<i64>>(4)?,
            "firstName": row.get::<_, String>(5)?,
            "lastName": row.get::<_, Option<String>>(6)?,
            "gender": row.get::<_, Option<String>>(7)?,
            "dateOfBirth": row.get::<_, Option<String>>(8)?,
            "admissionDate": row.get::<_, Option<String>>(9)?,
        }))
    };
    let rows = if let Some(class_id) = class_id {
        stmt.query_map([class_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Pull typed field values out of a params object. Unknown keys are left
/// alone (callers may carry their own metadata); values that do not coerce
/// to the field's kind are collected as errors. A JSON null means "clear".
fn fields_from_params(
    params: &Value,
) -> Result<Vec<(StudentField, Option<TypedValue>)>, Vec<String>> {
    let mut fields = Vec::new();
    let mut bad = Vec::new();
    for field in StudentField::ALL {
        let key = param_key(*field);
        let Some(value) = params.get(&key) else {
            continue;
        };
        if value.is_null() {
            fields.push((*field, None));
            continue;
        }
        let coerced = raw_from_json(value).and_then(|raw| coerce_cell(field.kind(), &raw));
        match coerced {
            Some(v) => fields.push((*field, Some(v))),
            None => bad.push(key),
        }
    }
    if bad.is_empty() {
        Ok(fields)
    } else {
        Err(bad)
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let fields = match fields_from_params(&req.params) {
        Ok(fields) => fields,
        Err(bad) => {
            return err(
                &req.id,
                "bad_params",
                "some fields could not be read",
                Some(json!({ "fields": bad })),
            )
        }
    };
    let mut record = CandidateRecord {
        row: 0,
        fields: Default::default(),
    };
    for (field, value) in fields {
        if let Some(value) = value {
            record.fields.insert(field, value);
        }
    }

    // Single-record create goes through the same store submission as bulk
    // import, so validation cannot drift between the two paths.
    let mut store = SqliteStore::new(conn);
    match store.submit_batch(&[record]) {
        Ok(outcome) => {
            if let Some(success) = outcome.success.first() {
                ok(
                    &req.id,
                    json!({
                        "studentId": success.student_id,
                        "admissionNo": success.admission_no
                    }),
                )
            } else {
                let reason = outcome
                    .failed
                    .first()
                    .map(|f| f.error.clone())
                    .unwrap_or_else(|| "record rejected".to_string());
                err(&req.id, "validation_failed", reason, None)
            }
        }
        Err(e) => err(&req.id, "db_submit_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(patch) = req.params.get("patch").filter(|p| p.is_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let fields = match fields_from_params(patch) {
        Ok(fields) => fields,
        Err(bad) => {
            return err(
                &req.id,
                "bad_params",
                "some fields could not be read",
                Some(json!({ "fields": bad })),
            )
        }
    };
    if fields.is_empty() {
        return err(&req.id, "bad_params", "patch contains no known fields", None);
    }

    for (field, value) in &fields {
        let Some(value) = value else {
            if *field == StudentField::AdmissionNo || *field == StudentField::FirstName {
                return err(
                    &req.id,
                    "validation_failed",
                    format!("{} cannot be cleared", field.column()),
                    None,
                );
            }
            continue;
        };
        match validate_field(conn, *field, value) {
            Ok(None) => {}
            Ok(Some(reason)) => return err(&req.id, "validation_failed", reason, None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
        if *field == StudentField::AdmissionNo {
            if let TypedValue::Text(no) = value {
                let taken: Option<String> = match conn
                    .query_row(
                        "SELECT id FROM students WHERE admission_no = ? AND id != ?",
                        [no.as_str(), student_id],
                        |r| r.get(0),
                    )
                    .optional()
                {
                    Ok(v) => v,
                    Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
                };
                if taken.is_some() {
                    return err(
                        &req.id,
                        "validation_failed",
                        format!("admission no already exists: {}", no),
                        None,
                    );
                }
            }
        }
    }

    let mut assignments = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for (field, value) in &fields {
        assignments.push(format!("{} = ?", field.column()));
        match value {
            None => params.push(Box::new(rusqlite::types::Null)),
            Some(TypedValue::Text(s)) | Some(TypedValue::Date(s)) => {
                params.push(Box::new(s.clone()))
            }
            Some(TypedValue::Integer(i)) => params.push(Box::new(*i)),
        }
    }
    assignments.push("updated_at = strftime('%s','now')".to_string());
    params.push(Box::new(student_id.to_string()));

    let sql = format!(
        "UPDATE students SET {} WHERE id = ?",
        assignments.join(", ")
    );
    if let Err(e) = conn.execute(
        &sql,
        rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let deleted = match conn.execute("DELETE FROM students WHERE id = ?", [student_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let columns: Vec<&'static str> = StudentField::ALL.iter().map(|f| f.column()).collect();
    let sql = format!("SELECT {} FROM students WHERE id = ?", columns.join(", "));
    let row = conn
        .query_row(&sql, [student_id], |row| {
            let mut obj = serde_json::Map::new();
            for (i, field) in StudentField::ALL.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(i)?;
                let json_value = match value {
                    rusqlite::types::Value::Null => Value::Null,
                    rusqlite::types::Value::Integer(n) => json!(n),
                    rusqlite::types::Value::Real(n) => json!(n),
                    rusqlite::types::Value::Text(s) => json!(s),
                    rusqlite::types::Value::Blob(_) => Value::Null,
                };
                obj.insert(param_key(*field), json_value);
            }
            Ok(Value::Object(obj))
        })
        .optional();

    match row {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_keys_are_camel_case() {
        assert_eq!(param_key(StudentField::AdmissionNo), "admissionNo");
        assert_eq!(param_key(StudentField::FirstName), "firstName");
        assert_eq!(param_key(StudentField::Gender), "gender");
        assert_eq!(param_key(StudentField::GuardianRelation), "guardianRelation");
    }
}
