use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_query_err, db_update_err, opt_bool, pagination, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn require_user(conn: &Connection, user_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(db_query_err)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("user not found"));
    }
    Ok(())
}

fn handle_notifications_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, &user_id) {
        return e.response(&req.id);
    }
    let unread_only = opt_bool(&req.params, "unreadOnly");
    let (page, limit) = match pagination(&req.params, 20) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let filter = if unread_only {
        " AND read_at IS NULL"
    } else {
        ""
    };
    let total: i64 = match conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?{}",
            filter
        ),
        [&user_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    let unread_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = ? AND read_at IS NULL",
        [&user_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_query_err(e).response(&req.id),
    };

    let sql = format!(
        "SELECT id, update_id, title, message, created_at, read_at
         FROM notifications
         WHERE recipient_id = ?{}
         ORDER BY created_at DESC, id
         LIMIT ? OFFSET ?",
        filter
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_query_err(e).response(&req.id),
    };
    let rows = stmt
        .query_map((&user_id, limit, (page - 1) * limit), |row| {
            let id: String = row.get(0)?;
            let update_id: String = row.get(1)?;
            let title: String = row.get(2)?;
            let message: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            let read_at: Option<String> = row.get(5)?;
            Ok(json!({
                "id": id,
                "updateId": update_id,
                "title": title,
                "message": message,
                "createdAt": created_at,
                "isRead": read_at.is_some(),
                "readAt": read_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(notifications) => {
            let count = notifications.len();
            ok(
                &req.id,
                json!({
                    "notifications": notifications,
                    "pagination": {
                        "current": page,
                        "total": (total + limit - 1) / limit,
                        "count": count,
                        "totalNotifications": total
                    },
                    "unreadCount": unread_count
                }),
            )
        }
        Err(e) => db_query_err(e).response(&req.id),
    }
}

fn handle_notifications_mark_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let notification_id = match require_str(&req.params, "notificationId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Idempotent: marking an already-read notification keeps its readAt.
    let changed = match conn.execute(
        "UPDATE notifications SET read_at = ?
         WHERE id = ? AND recipient_id = ? AND read_at IS NULL",
        (db::now_utc(), &notification_id, &user_id),
    ) {
        Ok(n) => n,
        Err(e) => return db_update_err(e).response(&req.id),
    };

    if changed == 0 {
        let exists: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM notifications WHERE id = ? AND recipient_id = ?",
                (&notification_id, &user_id),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return db_query_err(e).response(&req.id),
        };
        if exists.is_none() {
            return HandlerErr::not_found("notification not found").response(&req.id);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_notifications_mark_all_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_user(conn, &user_id) {
        return e.response(&req.id);
    }

    let marked = match conn.execute(
        "UPDATE notifications SET read_at = ? WHERE recipient_id = ? AND read_at IS NULL",
        (db::now_utc(), &user_id),
    ) {
        Ok(n) => n,
        Err(e) => return db_update_err(e).response(&req.id),
    };

    ok(&req.id, json!({ "marked": marked }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(handle_notifications_list(state, req)),
        "notifications.markRead" => Some(handle_notifications_mark_read(state, req)),
        "notifications.markAllRead" => Some(handle_notifications_mark_all_read(state, req)),
        _ => None,
    }
}
