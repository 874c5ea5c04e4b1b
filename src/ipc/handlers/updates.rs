use crate::db;
use crate::fanout::{self, Audience, DirectoryUser, UpdateSnapshot};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_query_err, db_update_err, opt_bool, opt_str, pagination, require_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::mentions;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const KINDS: [&str; 5] = ["general", "exam", "holiday", "schedule", "important"];
const PRIORITIES: [&str; 3] = ["low", "medium", "high"];
const MAX_TITLE_CHARS: usize = 200;
const MAX_CONTENT_CHARS: usize = 2000;

fn validate_title_content(title: &str, content: &str) -> Result<(), HandlerErr> {
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(HandlerErr::bad_params("title cannot exceed 200 characters"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(HandlerErr::bad_params(
            "content cannot exceed 2000 characters",
        ));
    }
    Ok(())
}

fn parse_audience(params: &serde_json::Value) -> Result<Audience, HandlerErr> {
    match params.get("audience") {
        None | Some(serde_json::Value::Null) => Ok(Audience::default()),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| HandlerErr {
            code: "bad_params",
            message: format!("invalid audience: {}", e),
            details: Some(json!({ "audience": v.clone() })),
        }),
    }
}

fn load_directory(conn: &Connection) -> Result<Vec<DirectoryUser>, HandlerErr> {
    let map_err = |e: rusqlite::Error| HandlerErr {
        code: "directory_unavailable",
        message: e.to_string(),
        details: None,
    };
    let mut stmt = conn
        .prepare("SELECT id, username, role, is_active FROM users")
        .map_err(map_err)?;
    let users = stmt
        .query_map([], |row| {
            let active: i64 = row.get(3)?;
            Ok(DirectoryUser {
                id: row.get(0)?,
                username: row.get(1)?,
                role: row.get(2)?,
                active: active != 0,
            })
        })
        .map_err(map_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_err)?;
    Ok(users)
}

struct UpdateRow {
    id: String,
    title: String,
    content: String,
    audience: Audience,
    mentioned_usernames: Vec<String>,
    published: bool,
    fanned_out_at: Option<String>,
}

fn load_update(conn: &Connection, update_id: &str) -> Result<UpdateRow, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, title, content, audience, mentioned_usernames, published, fanned_out_at
             FROM updates WHERE id = ?",
            [update_id],
            |row| {
                let id: String = row.get(0)?;
                let title: String = row.get(1)?;
                let content: String = row.get(2)?;
                let audience: String = row.get(3)?;
                let mentioned: String = row.get(4)?;
                let published: i64 = row.get(5)?;
                let fanned_out_at: Option<String> = row.get(6)?;
                Ok((id, title, content, audience, mentioned, published, fanned_out_at))
            },
        )
        .optional()
        .map_err(db_query_err)?;

    let Some((id, title, content, audience, mentioned, published, fanned_out_at)) = row else {
        return Err(HandlerErr::not_found("update not found"));
    };
    let audience: Audience = serde_json::from_str(&audience).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: format!("stored audience is unreadable: {}", e),
        details: None,
    })?;
    let mentioned_usernames: Vec<String> =
        serde_json::from_str(&mentioned).map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: format!("stored mentions are unreadable: {}", e),
            details: None,
        })?;
    Ok(UpdateRow {
        id,
        title,
        content,
        audience,
        mentioned_usernames,
        published: published != 0,
        fanned_out_at,
    })
}

/// Persist the fan-out for one update. INSERT OR IGNORE against the
/// (update_id, recipient_id) uniqueness key makes a replayed fan-out a
/// no-op per recipient.
fn persist_fanout(conn: &Connection, update: &UpdateRow) -> Result<usize, HandlerErr> {
    let directory = load_directory(conn)?;
    let snapshot = UpdateSnapshot {
        id: &update.id,
        title: &update.title,
        content: &update.content,
        audience: &update.audience,
        mentioned_usernames: &update.mentioned_usernames,
    };
    let drafts = fanout::build_notifications(&snapshot, &directory);

    let mut inserted = 0usize;
    for draft in &drafts {
        let n = conn
            .execute(
                "INSERT OR IGNORE INTO notifications(id, update_id, recipient_id, title, message, created_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &draft.update_id,
                    &draft.recipient_id,
                    &draft.title,
                    &draft.message,
                    db::now_utc(),
                ),
            )
            .map_err(db_update_err)?;
        inserted += n;
    }
    Ok(inserted)
}

fn mark_published(conn: &Connection, update_id: &str) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE updates
         SET published = 1, publish_date = ?, fanned_out_at = ?, updated_at = ?
         WHERE id = ?",
        (db::now_utc(), db::now_utc(), db::now_utc(), update_id),
    )
    .map_err(db_update_err)?;
    Ok(())
}

fn handle_updates_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let title = match require_str(&req.params, "title") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let content = match require_str(&req.params, "content") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = validate_title_content(&title, &content) {
        return e.response(&req.id);
    }
    let kind = opt_str(&req.params, "kind").unwrap_or_else(|| "general".to_string());
    if !KINDS.contains(&kind.as_str()) {
        return HandlerErr::bad_params(
            "kind must be one of: general, exam, holiday, schedule, important",
        )
        .response(&req.id);
    }
    let priority = opt_str(&req.params, "priority").unwrap_or_else(|| "medium".to_string());
    if !PRIORITIES.contains(&priority.as_str()) {
        return HandlerErr::bad_params("priority must be one of: low, medium, high")
            .response(&req.id);
    }
    let audience = match parse_audience(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let publish = opt_bool(&req.params, "publish");

    let mentioned = mentions::extract_mentions(&content);
    let update_id = Uuid::new_v4().to_string();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        let audience_json = serde_json::to_string(&audience).map_err(|e| HandlerErr {
            code: "bad_params",
            message: e.to_string(),
            details: None,
        })?;
        let mentioned_json = serde_json::to_string(&mentioned).unwrap_or_else(|_| "[]".to_string());
        tx.execute(
            "INSERT INTO updates(id, title, content, kind, priority, published, audience, mentioned_usernames, view_count, created_at)
             VALUES(?, ?, ?, ?, ?, 0, ?, ?, 0, ?)",
            (
                &update_id,
                &title,
                &content,
                &kind,
                &priority,
                &audience_json,
                &mentioned_json,
                db::now_utc(),
            ),
        )
        .map_err(db_update_err)?;

        let mut notifications_created = 0usize;
        if publish {
            let row = load_update(&tx, &update_id)?;
            notifications_created = persist_fanout(&tx, &row)?;
            mark_published(&tx, &update_id)?;
        }

        Ok(json!({
            "updateId": update_id,
            "published": publish,
            "mentionedUsernames": mentioned,
            "notificationsCreated": notifications_created
        }))
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

fn handle_updates_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let update_id = match require_str(&req.params, "updateId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let result = (|| -> Result<serde_json::Value, HandlerErr> {
        let row = load_update(&tx, &update_id)?;

        // Fan-out runs exactly once per update. Re-publishing is harmless:
        // the flag stays set and no new notifications appear.
        let already_published = row.published && row.fanned_out_at.is_some();
        let notifications_created = if row.fanned_out_at.is_none() {
            let n = persist_fanout(&tx, &row)?;
            mark_published(&tx, &update_id)?;
            n
        } else {
            0
        };

        Ok(json!({
            "updateId": update_id,
            "published": true,
            "alreadyPublished": already_published,
            "notificationsCreated": notifications_created
        }))
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

fn handle_updates_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let update_id = match require_str(&req.params, "updateId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let row = match load_update(conn, &update_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let title = opt_str(&req.params, "title").unwrap_or(row.title);
    let content = opt_str(&req.params, "content");
    let kind = opt_str(&req.params, "kind");
    let priority = opt_str(&req.params, "priority");
    let audience = match req.params.get("audience") {
        None | Some(serde_json::Value::Null) => None,
        Some(_) => match parse_audience(&req.params) {
            Ok(v) => Some(v),
            Err(e) => return e.response(&req.id),
        },
    };

    if let Some(kind) = &kind {
        if !KINDS.contains(&kind.as_str()) {
            return HandlerErr::bad_params(
                "kind must be one of: general, exam, holiday, schedule, important",
            )
            .response(&req.id);
        }
    }
    if let Some(priority) = &priority {
        if !PRIORITIES.contains(&priority.as_str()) {
            return HandlerErr::bad_params("priority must be one of: low, medium, high")
                .response(&req.id);
        }
    }
    if let Err(e) = validate_title_content(&title, content.as_deref().unwrap_or("")) {
        return e.response(&req.id);
    }

    let result = (|| -> Result<(), HandlerErr> {
        conn.execute(
            "UPDATE updates SET title = ?, updated_at = ? WHERE id = ?",
            (&title, db::now_utc(), &update_id),
        )
        .map_err(db_update_err)?;

        // Content edits re-derive the mention list but never re-trigger
        // fan-out; only the original publish action creates notifications.
        if let Some(content) = &content {
            let mentioned = mentions::extract_mentions(content);
            let mentioned_json =
                serde_json::to_string(&mentioned).unwrap_or_else(|_| "[]".to_string());
            conn.execute(
                "UPDATE updates SET content = ?, mentioned_usernames = ?, updated_at = ? WHERE id = ?",
                (content, &mentioned_json, db::now_utc(), &update_id),
            )
            .map_err(db_update_err)?;
        }
        if let Some(kind) = &kind {
            conn.execute(
                "UPDATE updates SET kind = ?, updated_at = ? WHERE id = ?",
                (kind, db::now_utc(), &update_id),
            )
            .map_err(db_update_err)?;
        }
        if let Some(priority) = &priority {
            conn.execute(
                "UPDATE updates SET priority = ?, updated_at = ? WHERE id = ?",
                (priority, db::now_utc(), &update_id),
            )
            .map_err(db_update_err)?;
        }
        if let Some(audience) = &audience {
            let audience_json = serde_json::to_string(audience).map_err(|e| HandlerErr {
                code: "bad_params",
                message: e.to_string(),
                details: None,
            })?;
            conn.execute(
                "UPDATE updates SET audience = ?, updated_at = ? WHERE id = ?",
                (&audience_json, db::now_utc(), &update_id),
            )
            .map_err(db_update_err)?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => ok(&req.id, json!({ "updateId": update_id })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_updates_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let status = opt_str(&req.params, "status").unwrap_or_else(|| "all".to_string());
    let filter = match status.as_str() {
        "published" => " WHERE published = 1",
        "draft" => " WHERE published = 0",
        "all" => "",
        _ => {
            return HandlerErr::bad_params("status must be one of: published, draft, all")
                .response(&req.id)
        }
    };
    let (page, limit) = match pagination(&req.params, 10) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let total: i64 = match conn.query_row(
        &format!("SELECT COUNT(*) FROM updates{}", filter),
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(e).response(&req.id),
    };

    let sql = format!(
        "SELECT id, title, content, kind, priority, published, publish_date, audience,
                mentioned_usernames, view_count, created_at
         FROM updates{}
         ORDER BY created_at DESC, id
         LIMIT ? OFFSET ?",
        filter
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    let rows = stmt
        .query_map((limit, (page - 1) * limit), |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let content: String = row.get(2)?;
            let kind: String = row.get(3)?;
            let priority: String = row.get(4)?;
            let published: i64 = row.get(5)?;
            let publish_date: Option<String> = row.get(6)?;
            let audience: String = row.get(7)?;
            let mentioned: String = row.get(8)?;
            let view_count: i64 = row.get(9)?;
            let created_at: String = row.get(10)?;
            Ok(json!({
                "id": id,
                "title": title,
                "content": content,
                "kind": kind,
                "priority": priority,
                "published": published != 0,
                "publishDate": publish_date,
                "audience": serde_json::from_str::<serde_json::Value>(&audience)
                    .unwrap_or(serde_json::Value::Null),
                "mentionedUsernames": serde_json::from_str::<serde_json::Value>(&mentioned)
                    .unwrap_or_else(|_| json!([])),
                "viewCount": view_count,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(updates) => {
            let count = updates.len();
            ok(
                &req.id,
                json!({
                    "updates": updates,
                    "pagination": {
                        "current": page,
                        "total": (total + limit - 1) / limit,
                        "count": count,
                        "totalUpdates": total
                    }
                }),
            )
        }
        Err(e) => db_query_err(e).response(&req.id),
    }
}

fn handle_updates_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let update_id = match require_str(&req.params, "updateId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Delivered notifications stay; the system never deletes them.
    let changed = match conn.execute("DELETE FROM updates WHERE id = ?", [&update_id]) {
        Ok(n) => n,
        Err(e) => return db_update_err(e).response(&req.id),
    };
    if changed == 0 {
        return HandlerErr::not_found("update not found").response(&req.id);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_updates_record_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let update_id = match require_str(&req.params, "updateId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let changed = match conn.execute(
        "UPDATE updates SET view_count = view_count + 1 WHERE id = ? AND published = 1",
        [&update_id],
    ) {
        Ok(n) => n,
        Err(e) => return db_update_err(e).response(&req.id),
    };
    if changed == 0 {
        return HandlerErr::not_found("published update not found").response(&req.id);
    }

    let count: Result<i64, _> = conn.query_row(
        "SELECT view_count FROM updates WHERE id = ?",
        [&update_id],
        |r| r.get(0),
    );
    match count {
        Ok(view_count) => ok(&req.id, json!({ "viewCount": view_count })),
        Err(e) => db_query_err(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "updates.list" => Some(handle_updates_list(state, req)),
        "updates.create" => Some(handle_updates_create(state, req)),
        "updates.update" => Some(handle_updates_update(state, req)),
        "updates.publish" => Some(handle_updates_publish(state, req)),
        "updates.delete" => Some(handle_updates_delete(state, req)),
        "updates.recordView" => Some(handle_updates_record_view(state, req)),
        _ => None,
    }
}
