use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_query_err, db_update_err, opt_i64, opt_str, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::order::{self, OrderError, PositionUpdate, SiblingRow};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn order_err(e: OrderError) -> HandlerErr {
    match e {
        OrderError::ItemNotFound => HandlerErr::not_found("subject not found"),
        OrderError::OutOfRange { requested, max } => HandlerErr {
            code: "out_of_range",
            message: format!("position {} is outside [1, {}]", requested, max),
            details: Some(json!({ "requested": requested, "max": max })),
        },
    }
}

fn fetch_siblings(conn: &Connection, class_id: &str) -> Result<Vec<SiblingRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, position FROM subjects
             WHERE class_id = ? AND is_active = 1
             ORDER BY position",
        )
        .map_err(db_query_err)?;
    let rows = stmt
        .query_map([class_id], |row| {
            Ok(SiblingRow {
                id: row.get(0)?,
                position: row.get(1)?,
            })
        })
        .map_err(db_query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_query_err)?;
    Ok(rows)
}

fn apply_plan(conn: &Connection, plan: &[PositionUpdate]) -> Result<(), HandlerErr> {
    for u in plan {
        conn.execute(
            "UPDATE subjects SET position = ?, updated_at = ? WHERE id = ?",
            (u.position, db::now_utc(), &u.id),
        )
        .map_err(db_update_err)?;
    }
    Ok(())
}

/// Re-read the scope's positions before commit; a broken range means another
/// writer raced us and the unit must not land.
fn verify_density(
    conn: &Connection,
    class_id: &str,
    failure_code: &'static str,
) -> Result<(), HandlerErr> {
    let positions: Vec<i64> = fetch_siblings(conn, class_id)?
        .into_iter()
        .map(|s| s.position)
        .collect();
    if order::is_dense(&positions) {
        Ok(())
    } else {
        Err(HandlerErr {
            code: failure_code,
            message: "subject positions are no longer dense; retry with fresh positions"
                .to_string(),
            details: Some(json!({ "classId": class_id, "positions": positions })),
        })
    }
}

fn subject_json(conn: &Connection, subject_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, class_id, name, description, position
         FROM subjects WHERE id = ? AND is_active = 1",
        [subject_id],
        |row| {
            let id: String = row.get(0)?;
            let class_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let description: Option<String> = row.get(3)?;
            let position: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "classId": class_id,
                "name": name,
                "description": description,
                "position": position
            }))
        },
    )
    .optional()
    .map_err(db_query_err)?
    .ok_or_else(|| HandlerErr::not_found("subject not found"))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match require_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, description, position,
           (SELECT COUNT(*) FROM materials m WHERE m.subject_id = subjects.id AND m.is_active = 1)
         FROM subjects
         WHERE class_id = ? AND is_active = 1
         ORDER BY position",
    ) {
        Ok(s) => s,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    let rows = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let position: i64 = row.get(3)?;
            let material_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "description": description,
                "position": position,
                "materialCount": material_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => db_query_err(e).response(&req.id),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match require_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let name = match require_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let description = opt_str(&req.params, "description");
    let requested = match opt_i64(&req.params, "position") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let class_exists: Option<i64> = match conn
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
    if class_exists.is_none() {
        return HandlerErr::not_found("class not found").response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        let siblings = fetch_siblings(&tx, &class_id)?;
        let (position, plan) = order::plan_insertion(&siblings, requested).map_err(order_err)?;
        apply_plan(&tx, &plan)?;

        let subject_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO subjects(id, class_id, name, description, position, is_active, created_at)
             VALUES(?, ?, ?, ?, ?, 1, ?)",
            (&subject_id, &class_id, &name, &description, position, db::now_utc()),
        )
        .map_err(db_update_err)?;

        verify_density(&tx, &class_id, "storage_conflict")?;
        Ok(json!({ "subjectId": subject_id, "position": position }))
    })();

    match result {
        Ok(body) => {
            if let Err(e) = tx.commit() {
                return err(&req.id, "db_commit_failed", e.to_string(), None);
            }
            ok(&req.id, body)
        }
        Err(e) => {
            let _ = tx.rollback();
            e.response(&req.id)
        }
    }
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match require_str(&req.params, "subjectId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let name = opt_str(&req.params, "name");
    let description = opt_str(&req.params, "description");
    if name.is_none() && description.is_none() {
        return HandlerErr::bad_params("nothing to update").response(&req.id);
    }

    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        // Existence check first so a bad id reads as not_found, not a silent
        // zero-row update.
        subject_json(conn, &subject_id)?;
        if let Some(name) = &name {
            conn.execute(
                "UPDATE subjects SET name = ?, updated_at = ? WHERE id = ?",
                (name, db::now_utc(), &subject_id),
            )
            .map_err(db_update_err)?;
        }
        if let Some(description) = &description {
            conn.execute(
                "UPDATE subjects SET description = ?, updated_at = ? WHERE id = ?",
                (description, db::now_utc(), &subject_id),
            )
            .map_err(db_update_err)?;
        }
        subject_json(conn, &subject_id)
    })();

    match result {
        Ok(subject) => ok(&req.id, json!({ "subject": subject })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_subjects_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match require_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = match require_str(&req.params, "subjectId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let position = match opt_i64(&req.params, "position") {
        Ok(Some(v)) => v,
        Ok(None) => return HandlerErr::bad_params("missing params.position").response(&req.id),
        Err(e) => return e.response(&req.id),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        let siblings = fetch_siblings(&tx, &class_id)?;
        let plan = order::plan_reorder(&siblings, &subject_id, position).map_err(order_err)?;
        if !plan.is_empty() {
            apply_plan(&tx, &plan)?;
            verify_density(&tx, &class_id, "storage_conflict")?;
        }
        subject_json(&tx, &subject_id)
    })();

    match result {
        Ok(subject) => {
            if let Err(e) = tx.commit() {
                return err(&req.id, "db_commit_failed", e.to_string(), None);
            }
            ok(&req.id, json!({ "subject": subject }))
        }
        Err(e) => {
            let _ = tx.rollback();
            e.response(&req.id)
        }
    }
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match require_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = match require_str(&req.params, "subjectId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Cascade materials, deactivate the subject, then compact siblings.
    // Everything or nothing: a partial cascade must not leave the subject
    // half-removed or the range with a gap.
    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        let siblings = fetch_siblings(&tx, &class_id)?;
        let plan = order::plan_compaction(&siblings, &subject_id).map_err(order_err)?;

        let materials_removed = tx
            .execute(
                "UPDATE materials SET is_active = 0 WHERE subject_id = ? AND is_active = 1",
                [&subject_id],
            )
            .map_err(|e| HandlerErr {
                code: "partial_failure",
                message: e.to_string(),
                details: Some(json!({ "table": "materials" })),
            })?;

        tx.execute(
            "UPDATE subjects SET is_active = 0, updated_at = ? WHERE id = ?",
            (db::now_utc(), &subject_id),
        )
        .map_err(|e| HandlerErr {
            code: "partial_failure",
            message: e.to_string(),
            details: Some(json!({ "table": "subjects" })),
        })?;

        apply_plan(&tx, &plan)?;
        verify_density(&tx, &class_id, "partial_failure")?;
        Ok(json!({ "ok": true, "materialsRemoved": materials_removed }))
    })();

    match result {
        Ok(body) => {
            if let Err(e) = tx.commit() {
                return err(&req.id, "db_commit_failed", e.to_string(), None);
            }
            ok(&req.id, body)
        }
        Err(e) => {
            let _ = tx.rollback();
            e.response(&req.id)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.reorder" => Some(handle_subjects_reorder(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
