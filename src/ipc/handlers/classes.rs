use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_query_err, db_update_err, opt_i64, opt_str, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Include counts so the admin dashboard can render without extra calls.
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.description,
           c.level,
           c.category,
           (SELECT COUNT(*) FROM subjects s WHERE s.class_id = c.id AND s.is_active = 1) AS subject_count,
           (SELECT COUNT(*) FROM users u WHERE u.class_id = c.id AND u.is_active = 1) AS student_count
         FROM classes c
         WHERE c.is_active = 1
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let level: Option<i64> = row.get(3)?;
            let category: Option<String> = row.get(4)?;
            let subject_count: i64 = row.get(5)?;
            let student_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "description": description,
                "level": level,
                "category": category,
                "subjectCount": subject_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match require_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let description = opt_str(&req.params, "description");
    let level = match opt_i64(&req.params, "level") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let category = opt_str(&req.params, "category");

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, description, level, category, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (&class_id, &name, &description, level, &category, db::now_utc()),
    ) {
        return db_update_err(e).response(&req.id);
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match require_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM classes WHERE id = ? AND is_active = 1",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    if exists.is_none() {
        return HandlerErr::not_found("class not found").response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Deactivate in dependency order; any failure rolls the whole unit back
    // so readers never see a half-removed class.
    if let Err(e) = tx.execute(
        "UPDATE materials SET is_active = 0 WHERE class_id = ?",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "partial_failure",
            e.to_string(),
            Some(json!({ "table": "materials" })),
        );
    }

    if let Err(e) = tx.execute(
        "UPDATE subjects SET is_active = 0 WHERE class_id = ?",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "partial_failure",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    if let Err(e) = tx.execute(
        "UPDATE users SET class_id = NULL WHERE class_id = ?",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "partial_failure",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    if let Err(e) = tx.execute(
        "UPDATE classes SET is_active = 0 WHERE id = ?",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "partial_failure",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
