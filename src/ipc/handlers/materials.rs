use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_query_err, db_update_err, opt_str, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const KINDS: [&str; 4] = ["pdf", "video", "document", "presentation"];

fn validate_kind(kind: &str) -> Result<(), HandlerErr> {
    if KINDS.contains(&kind) {
        Ok(())
    } else {
        Err(HandlerErr {
            code: "bad_params",
            message: "kind must be one of: pdf, video, document, presentation".to_string(),
            details: Some(json!({ "kind": kind })),
        })
    }
}

// Materials live in Google Drive; only links into Drive/Docs are accepted.
fn validate_drive_link(link: &str) -> Result<(), HandlerErr> {
    if link.starts_with("https://drive.google.com") || link.starts_with("https://docs.google.com")
    {
        Ok(())
    } else {
        Err(HandlerErr::bad_params(
            "driveLink must be a Google Drive or Google Docs URL",
        ))
    }
}

fn handle_materials_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = opt_str(&req.params, "classId");
    let subject_id = opt_str(&req.params, "subjectId");

    let mut sql = String::from(
        "SELECT id, subject_id, class_id, title, description, kind, drive_link, download_count, created_at
         FROM materials WHERE is_active = 1",
    );
    let mut args: Vec<String> = Vec::new();
    if let Some(class_id) = class_id {
        sql.push_str(" AND class_id = ?");
        args.push(class_id);
    }
    if let Some(subject_id) = subject_id {
        sql.push_str(" AND subject_id = ?");
        args.push(subject_id);
    }
    sql.push_str(" ORDER BY created_at DESC, id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let id: String = row.get(0)?;
            let subject_id: String = row.get(1)?;
            let class_id: String = row.get(2)?;
            let title: String = row.get(3)?;
            let description: Option<String> = row.get(4)?;
            let kind: String = row.get(5)?;
            let drive_link: String = row.get(6)?;
            let download_count: i64 = row.get(7)?;
            let created_at: String = row.get(8)?;
            Ok(json!({
                "id": id,
                "subjectId": subject_id,
                "classId": class_id,
                "title": title,
                "description": description,
                "kind": kind,
                "driveLink": drive_link,
                "downloadCount": download_count,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(materials) => ok(&req.id, json!({ "materials": materials })),
        Err(e) => db_query_err(e).response(&req.id),
    }
}

fn handle_materials_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match require_str(&req.params, "subjectId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let title = match require_str(&req.params, "title") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let kind = match require_str(&req.params, "kind") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let drive_link = match require_str(&req.params, "driveLink") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let description = opt_str(&req.params, "description");

    if let Err(e) = validate_kind(&kind) {
        return e.response(&req.id);
    }
    if let Err(e) = validate_drive_link(&drive_link) {
        return e.response(&req.id);
    }

    let class_id: Option<String> = match conn
        .query_row(
            "SELECT class_id FROM subjects WHERE id = ? AND is_active = 1",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    let Some(class_id) = class_id else {
        return HandlerErr::not_found("subject not found").response(&req.id);
    };

    let material_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO materials(id, subject_id, class_id, title, description, kind, drive_link, download_count, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0, 1, ?)",
        (
            &material_id,
            &subject_id,
            &class_id,
            &title,
            &description,
            &kind,
            &drive_link,
            db::now_utc(),
        ),
    ) {
        return db_update_err(e).response(&req.id);
    }

    ok(
        &req.id,
        json!({ "materialId": material_id, "classId": class_id }),
    )
}

fn handle_materials_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let material_id = match require_str(&req.params, "materialId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let title = opt_str(&req.params, "title");
    let description = opt_str(&req.params, "description");
    let kind = opt_str(&req.params, "kind");
    let drive_link = opt_str(&req.params, "driveLink");
    if title.is_none() && description.is_none() && kind.is_none() && drive_link.is_none() {
        return HandlerErr::bad_params("nothing to update").response(&req.id);
    }
    if let Some(kind) = &kind {
        if let Err(e) = validate_kind(kind) {
            return e.response(&req.id);
        }
    }
    if let Some(link) = &drive_link {
        if let Err(e) = validate_drive_link(link) {
            return e.response(&req.id);
        }
    }

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM materials WHERE id = ? AND is_active = 1",
            [&material_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    if exists.is_none() {
        return HandlerErr::not_found("material not found").response(&req.id);
    }

    let updates: [(&str, &Option<String>); 4] = [
        ("title", &title),
        ("description", &description),
        ("kind", &kind),
        ("drive_link", &drive_link),
    ];
    for (column, value) in updates {
        if let Some(value) = value {
            let sql = format!("UPDATE materials SET {} = ? WHERE id = ?", column);
            if let Err(e) = conn.execute(&sql, (value, &material_id)) {
                return db_update_err(e).response(&req.id);
            }
        }
    }

    ok(&req.id, json!({ "materialId": material_id }))
}

fn handle_materials_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let material_id = match require_str(&req.params, "materialId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let changed = match conn.execute(
        "UPDATE materials SET is_active = 0 WHERE id = ? AND is_active = 1",
        [&material_id],
    ) {
        Ok(n) => n,
        Err(e) => return db_update_err(e).response(&req.id),
    };
    if changed == 0 {
        return HandlerErr::not_found("material not found").response(&req.id);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_materials_record_download(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let material_id = match require_str(&req.params, "materialId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let changed = match conn.execute(
        "UPDATE materials SET download_count = download_count + 1 WHERE id = ? AND is_active = 1",
        [&material_id],
    ) {
        Ok(n) => n,
        Err(e) => return db_update_err(e).response(&req.id),
    };
    if changed == 0 {
        return HandlerErr::not_found("material not found").response(&req.id);
    }

    let count: Result<i64, _> = conn.query_row(
        "SELECT download_count FROM materials WHERE id = ?",
        [&material_id],
        |r| r.get(0),
    );
    match count {
        Ok(download_count) => ok(&req.id, json!({ "downloadCount": download_count })),
        Err(e) => db_query_err(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "materials.list" => Some(handle_materials_list(state, req)),
        "materials.create" => Some(handle_materials_create(state, req)),
        "materials.update" => Some(handle_materials_update(state, req)),
        "materials.delete" => Some(handle_materials_delete(state, req)),
        "materials.recordDownload" => Some(handle_materials_record_download(state, req)),
        _ => None,
    }
}
