use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Classes, sections, categories and houses are plain `{id, name}` lookup
/// tables; bulk-imported rows reference them by integer id.
fn handle_list(state: &mut AppState, req: &Request, table: &str, key: &str) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ key: [] }));
    };

    let mut stmt = match conn.prepare(&format!("SELECT id, name FROM {} ORDER BY id", table)) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(items) => ok(&req.id, json!({ key: items })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request, table: &str) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    if let Err(e) = conn.execute(
        &format!("INSERT INTO {}(name) VALUES(?)", table),
        [&name],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": table })),
        );
    }

    ok(
        &req.id,
        json!({ "id": conn.last_insert_rowid(), "name": name }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_list(state, req, "classes", "classes")),
        "classes.create" => Some(handle_create(state, req, "classes")),
        "sections.list" => Some(handle_list(state, req, "sections", "sections")),
        "sections.create" => Some(handle_create(state, req, "sections")),
        "categories.list" => Some(handle_list(state, req, "categories", "categories")),
        "categories.create" => Some(handle_create(state, req, "categories")),
        "houses.list" => Some(handle_list(state, req, "houses", "houses")),
        "houses.create" => Some(handle_create(state, req, "houses")),
        _ => None,
    }
}
