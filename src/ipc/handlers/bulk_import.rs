use std::path::Path;

use log::{debug, warn};
use serde_json::{json, Value};

use crate::import::{assemble_rows, build_column_map, template_csv, unmapped_headers};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sheet::load_sheet;
use crate::store::{BatchOutcome, RecordStore, SqliteStore};

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, None)
    }
}

fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
        })
}

fn outcome_json(outcome: &BatchOutcome) -> (Value, Value) {
    let success = outcome
        .success
        .iter()
        .map(|s| {
            json!({
                "row": s.row,
                "studentId": s.student_id,
                "admissionNo": s.admission_no
            })
        })
        .collect::<Vec<_>>();
    let failed = outcome
        .failed
        .iter()
        .map(|f| {
            json!({
                "row": f.row,
                "admissionNo": f.admission_no,
                "firstName": f.first_name,
                "error": f.error
            })
        })
        .collect::<Vec<_>>();
    (json!(success), json!(failed))
}

/// The whole import pipeline for one sheet: canonicalize headers, assemble
/// candidate records, submit the batch, relay the store's per-record
/// outcomes. Rows skipped at assembly are reported separately from rows the
/// store rejected.
fn handle_bulk_import(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Fatal file-format problems abort before any submission.
    let sheet = match load_sheet(Path::new(&in_path)) {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "parse_failed",
                e.to_string(),
                Some(json!({ "path": in_path })),
            )
        }
    };

    let map = build_column_map(&sheet.header);
    let unmapped = unmapped_headers(&sheet.header, &map);
    for column in &unmapped {
        warn!("bulk import: ignoring unrecognized column {:?}", column);
    }

    let batch = assemble_rows(&map, &sheet.rows);
    let diagnostics = batch
        .diagnostics
        .iter()
        .map(|d| {
            json!({
                "row": d.row,
                "field": d.field,
                "code": d.code,
                "message": d.message
            })
        })
        .collect::<Vec<_>>();

    let mut store = SqliteStore::new(conn);
    let outcome = match store.submit_batch(&batch.records) {
        Ok(o) => o,
        // The submission itself failed: nothing was processed, the caller
        // retries the whole batch.
        Err(e) => return err(&req.id, "db_submit_failed", e.to_string(), None),
    };

    debug!(
        "bulk import {}: {} rows, {} submitted, {} ok, {} rejected, {} skipped",
        in_path,
        batch.rows_total,
        outcome.total,
        outcome.success.len(),
        outcome.failed.len(),
        batch.skipped_missing_required
    );

    let (success, failed) = outcome_json(&outcome);
    ok(
        &req.id,
        json!({
            "path": in_path,
            "rowsTotal": batch.rows_total,
            "submitted": outcome.total,
            "skippedMissingRequired": batch.skipped_missing_required,
            "unmappedColumns": unmapped,
            "diagnostics": diagnostics,
            "success": success,
            "failed": failed
        }),
    )
}

/// Write the blank import template: canonical header labels plus one
/// example record.
fn handle_import_template(state: &mut AppState, req: &Request) -> Value {
    if state.db.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let csv = template_csv();
    if let Err(e) = std::fs::write(&out_path, &csv) {
        return err(
            &req.id,
            "write_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }

    let columns = csv.lines().next().map(|l| l.split(',').count()).unwrap_or(0);
    ok(&req.id, json!({ "path": out_path, "columns": columns }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.bulkImport" => Some(handle_bulk_import(state, req)),
        "students.importTemplate" => Some(handle_import_template(state, req)),
        _ => None,
    }
}
